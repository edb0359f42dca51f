#![allow(dead_code)]

use std::collections::BTreeMap;

use bevy::prelude::App;

use broker_core::collaborators::{FixedRating, MemoryLedger, RecordingAcquisition};
use broker_core::{
    build_headless_app_with, AcquisitionHandle, ClientId, ItemRef, LedgerHandle, RatingHandle,
    SearchRequest, SimulationConfig,
};

/// App with in-memory collaborators wired in, the way a host would.
pub fn wired_app() -> App {
    wired_app_with(SimulationConfig::default())
}

pub fn wired_app_with(config: SimulationConfig) -> App {
    let mut app = build_headless_app_with(config);
    app.insert_resource(LedgerHandle(Box::new(MemoryLedger::default())));
    app.insert_resource(AcquisitionHandle(Box::new(RecordingAcquisition::default())));
    app
}

pub fn with_rating(app: &mut App, client: ClientId, score: i32) {
    let mut rating = FixedRating::default();
    rating.set_score(client, score);
    app.insert_resource(RatingHandle(Box::new(rating)));
}

pub fn deposit(app: &mut App, client: ClientId, amount: i64) {
    app.world
        .resource_mut::<LedgerHandle>()
        .0
        .credit(client, amount);
}

pub fn standard_request(client: ClientId) -> SearchRequest {
    SearchRequest {
        client,
        item: ItemRef {
            catalog_key: "sedan_b".into(),
            display_name: "Sedan B".into(),
            base_price: 10_000,
        },
        tier: "standard".into(),
        band: "fair".into(),
        requested_configs: BTreeMap::from([(2, 1)]),
    }
}
