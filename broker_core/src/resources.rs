use bevy::prelude::*;

/// Simulated hours in one scheduler day.
pub const HOURS_PER_DAY: i64 = 24;

/// Global configuration for the brokerage simulation.
#[derive(Resource, Debug, Clone)]
pub struct SimulationConfig {
    pub rng_seed: u64,
    /// How long a posted listing stays purchasable, in simulated hours.
    pub listing_window_hours: u64,
    pub premium_base_chance: f64,
    pub premium_pity_threshold: u32,
    pub premium_offer_window_hours: u64,
    pub premium_min_purchases: u32,
    pub premium_min_score: i32,
    /// Owned fixtures at or below this condition count as degraded.
    pub premium_wear_threshold: f32,
    pub premium_price: i64,
    pub premium_catalog_key: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rng_seed: 0x00B2_04E8_9ACD_51C3,
            listing_window_hours: 72,
            premium_base_chance: 0.04,
            premium_pity_threshold: 25,
            premium_offer_window_hours: 72,
            premium_min_purchases: 3,
            premium_min_score: 600,
            premium_wear_threshold: 35.0,
            premium_price: 85_000,
            premium_catalog_key: "premium_ceiling".to_owned(),
        }
    }
}

/// Authoritative simulated time, set only by the host before a tick.
///
/// The clock is monotonic non-decreasing; a decreasing input is undefined
/// behavior per the tick contract, so `set_hours` asserts in debug builds
/// and otherwise ignores the rewind.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationClock {
    hours: u64,
}

impl SimulationClock {
    pub fn new(hours: u64) -> Self {
        Self { hours }
    }

    pub fn hours(&self) -> u64 {
        self.hours
    }

    pub fn day(&self) -> u64 {
        self.hours / HOURS_PER_DAY as u64
    }

    pub fn hour_of_day(&self) -> u64 {
        self.hours % HOURS_PER_DAY as u64
    }

    pub fn advance(&mut self, delta_hours: u64) {
        self.hours += delta_hours;
    }

    pub fn set_hours(&mut self, hours: u64) {
        debug_assert!(hours >= self.hours, "simulated time must not decrease");
        if hours > self.hours {
            self.hours = hours;
        }
    }
}

/// Running counters reset never; exported once per tick into
/// [`crate::metrics::MarketMetrics`].
#[derive(Resource, Debug, Clone, Default)]
pub struct MarketTelemetry {
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
    pub records_skipped_on_load: u32,
}
