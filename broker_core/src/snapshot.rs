use bevy::prelude::*;

use broker_schema::{
    encode_snapshot, ListingState, MarketSnapshot, MarketSnapshotHeader, PremiumGateStateRecord,
    SearchRecordState, SearchStatus,
};

use crate::{
    premium::{PremiumGateBoard, PremiumGateState},
    record::{ClientId, SearchRecord},
    resources::{SimulationClock, SimulationConfig},
    scheduler::{Listing, ListingBoard, SearchBoard},
    PREMIUM_GATE_SEED_OFFSET,
};

/// Latest authoritative snapshot plus its encoded wire frame, refreshed at
/// the end of every tick.
#[derive(Resource, Default)]
pub struct SnapshotHistory {
    pub last_snapshot: Option<MarketSnapshot>,
    pub encoded_snapshot: Option<Vec<u8>>,
}

impl SnapshotHistory {
    fn update(&mut self, snapshot: MarketSnapshot) {
        self.encoded_snapshot =
            Some(encode_snapshot(&snapshot).expect("snapshot serialization failed"));
        self.last_snapshot = Some(snapshot);
    }
}

pub fn capture_snapshot(
    clock: Res<SimulationClock>,
    board: Res<SearchBoard>,
    listings: Res<ListingBoard>,
    gate: Res<PremiumGateBoard>,
    mut history: ResMut<SnapshotHistory>,
) {
    let mut record_states: Vec<SearchRecordState> =
        board.records().map(SearchRecord::to_state).collect();
    record_states.sort_unstable_by_key(|state| state.id);

    let mut listing_states: Vec<ListingState> =
        listings.listings().map(Listing::to_state).collect();
    listing_states.sort_unstable_by_key(|state| state.search_id);

    let mut gate_states: Vec<PremiumGateStateRecord> = gate
        .states()
        .map(|(client, state)| state.to_state(client))
        .collect();
    gate_states.sort_unstable_by_key(|state| state.client);

    let header = MarketSnapshotHeader::new(
        clock.day(),
        clock.hours(),
        record_states.len(),
        listing_states.len(),
        gate_states.len(),
    );

    let snapshot = MarketSnapshot {
        header,
        records: record_states,
        listings: listing_states,
        gates: gate_states,
    }
    .finalize();

    history.update(snapshot);
}

/// Rebuild every board from a decoded snapshot, replacing current state.
///
/// The active-slot index is not persisted; it is reconstructed from record
/// status: active records occupy a slot, and succeeded records do while
/// their listing is still posted.
pub fn restore_market_from_snapshot(world: &mut World, snapshot: &MarketSnapshot) {
    let config = world.resource::<SimulationConfig>().clone();

    let mut listings = ListingBoard::default();
    for state in &snapshot.listings {
        listings.post(Listing::from_state(state));
    }

    let mut board = SearchBoard::new(config.rng_seed);
    for state in &snapshot.records {
        let record = SearchRecord::from_state(state);
        let occupies_slot = match record.status {
            SearchStatus::Active => true,
            SearchStatus::Succeeded => listings.get(record.id).is_some(),
            _ => false,
        };
        board.register_restored(record, occupies_slot);
    }
    board.set_last_processed_day(snapshot.header.day);

    let mut gate = PremiumGateBoard::new(config.rng_seed ^ PREMIUM_GATE_SEED_OFFSET);
    for state in &snapshot.gates {
        gate.register_restored(ClientId(state.client), PremiumGateState::from_state(state));
    }

    world
        .resource_mut::<SimulationClock>()
        .set_hours(snapshot.header.hours);
    world.insert_resource(board);
    world.insert_resource(listings);
    world.insert_resource(gate);
}
