use bevy::prelude::*;

use crate::{
    resources::{MarketTelemetry, SimulationClock},
    scheduler::{ListingBoard, SearchBoard},
};

/// Flat per-tick export of the market's counters and gauges, for hosts
/// that poll instead of subscribing to events.
#[derive(Resource, Default, Debug, Clone)]
pub struct MarketMetrics {
    pub tick: u64,
    pub day: u64,
    pub hours: u64,
    pub active_searches: u32,
    pub open_listings: u32,
    pub searches_submitted: u32,
    pub searches_succeeded: u32,
    pub searches_failed: u32,
    pub searches_cancelled: u32,
    pub listings_posted: u32,
    pub listings_expired: u32,
    pub deliveries: u32,
    pub premium_offers_triggered: u32,
    pub premium_offers_expired: u32,
    pub premium_acquired: u32,
}

pub fn export_market_metrics(
    clock: Res<SimulationClock>,
    telemetry: Res<MarketTelemetry>,
    board: Res<SearchBoard>,
    listings: Res<ListingBoard>,
    metrics: Option<ResMut<MarketMetrics>>,
) {
    let Some(mut metrics) = metrics else {
        return;
    };
    metrics.tick += 1;
    metrics.day = clock.day();
    metrics.hours = clock.hours();
    metrics.active_searches = board.records().filter(|record| record.is_active()).count() as u32;
    metrics.open_listings = listings.listings().count() as u32;
    metrics.searches_submitted = telemetry.searches_submitted;
    metrics.searches_succeeded = telemetry.searches_succeeded;
    metrics.searches_failed = telemetry.searches_failed;
    metrics.searches_cancelled = telemetry.searches_cancelled;
    metrics.listings_posted = telemetry.listings_posted;
    metrics.listings_expired = telemetry.listings_expired;
    metrics.deliveries = telemetry.deliveries;
    metrics.premium_offers_triggered = telemetry.premium_offers_triggered;
    metrics.premium_offers_expired = telemetry.premium_offers_expired;
    metrics.premium_acquired = telemetry.premium_acquired;
}
