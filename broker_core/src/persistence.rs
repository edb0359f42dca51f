use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use broker_schema::{
    attributes::{
        gate_state_from_attributes, gate_state_to_attributes, listing_from_attributes,
        listing_to_attributes, search_record_from_attributes, search_record_to_attributes,
    },
    AttributeList, SearchStatus,
};

use crate::{
    premium::{PremiumGateBoard, PremiumGateState},
    record::{ClientId, SearchRecord},
    resources::{MarketTelemetry, SimulationClock, SimulationConfig},
    scheduler::{Listing, ListingBoard, SearchBoard},
    PREMIUM_GATE_SEED_OFFSET,
};

/// Durable form of the whole market: attribute entries only, no version
/// field. Loaders tolerate absent keys, so older archives keep loading as
/// fields are added.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketArchive {
    pub day: u64,
    pub hours: u64,
    pub searches: Vec<AttributeList>,
    pub listings: Vec<AttributeList>,
    pub gates: Vec<AttributeList>,
}

pub fn encode_archive_json(archive: &MarketArchive) -> serde_json::Result<String> {
    serde_json::to_string_pretty(archive)
}

pub fn decode_archive_json(data: &str) -> serde_json::Result<MarketArchive> {
    serde_json::from_str(data)
}

/// Write every board out as attribute entries, sorted by identity.
pub fn archive_market(world: &World) -> MarketArchive {
    let clock = world.resource::<SimulationClock>();
    let board = world.resource::<SearchBoard>();
    let listings = world.resource::<ListingBoard>();
    let gate = world.resource::<PremiumGateBoard>();

    let mut records: Vec<SearchRecord> = board.records().cloned().collect();
    records.sort_unstable_by_key(|record| record.id);

    let mut listing_entries: Vec<Listing> = listings.listings().cloned().collect();
    listing_entries.sort_unstable_by_key(|listing| listing.search_id);

    let mut gates: Vec<(ClientId, &PremiumGateState)> = gate.states().collect();
    gates.sort_unstable_by_key(|(client, _)| *client);

    MarketArchive {
        day: board.last_processed_day(),
        hours: clock.hours(),
        searches: records
            .iter()
            .map(|record| search_record_to_attributes(&record.to_state()))
            .collect(),
        listings: listing_entries
            .iter()
            .map(|listing| listing_to_attributes(&listing.to_state()))
            .collect(),
        gates: gates
            .iter()
            .map(|(client, state)| gate_state_to_attributes(&state.to_state(*client)))
            .collect(),
    }
}

/// Rebuild the boards from an archive, replacing current state.
///
/// A corrupt entry is skipped with a warning rather than failing the load;
/// the skip count lands in [`MarketTelemetry::records_skipped_on_load`].
pub fn restore_market_from_archive(world: &mut World, archive: &MarketArchive) {
    let config = world.resource::<SimulationConfig>().clone();
    let mut skipped: u32 = 0;

    let mut listings = ListingBoard::default();
    for entry in &archive.listings {
        match listing_from_attributes(entry) {
            Ok(state) => listings.post(Listing::from_state(&state)),
            Err(error) => {
                warn!(target: "brokerage::persistence", %error, "skipping corrupt listing entry");
                skipped += 1;
            }
        }
    }

    let mut board = SearchBoard::new(config.rng_seed);
    for entry in &archive.searches {
        match search_record_from_attributes(entry) {
            Ok(state) => {
                let record = SearchRecord::from_state(&state);
                let occupies_slot = match record.status {
                    SearchStatus::Active => true,
                    SearchStatus::Succeeded => listings.get(record.id).is_some(),
                    _ => false,
                };
                board.register_restored(record, occupies_slot);
            }
            Err(error) => {
                warn!(target: "brokerage::persistence", %error, "skipping corrupt search entry");
                skipped += 1;
            }
        }
    }
    board.set_last_processed_day(archive.day);

    let mut gate = PremiumGateBoard::new(config.rng_seed ^ PREMIUM_GATE_SEED_OFFSET);
    for entry in &archive.gates {
        match gate_state_from_attributes(entry) {
            Ok(state) => gate.register_restored(
                ClientId(state.client),
                PremiumGateState::from_state(&state),
            ),
            Err(error) => {
                warn!(target: "brokerage::persistence", %error, "skipping corrupt gate entry");
                skipped += 1;
            }
        }
    }

    world
        .resource_mut::<SimulationClock>()
        .set_hours(archive.hours);
    if let Some(mut telemetry) = world.get_resource_mut::<MarketTelemetry>() {
        telemetry.records_skipped_on_load += skipped;
    }
    world.insert_resource(board);
    world.insert_resource(listings);
    world.insert_resource(gate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryLedger;
    use crate::record::ItemRef;
    use crate::scheduler::SearchRequest;
    use crate::TierCatalog;
    use std::collections::BTreeMap;

    fn seeded_world() -> World {
        let mut world = World::new();
        let config = SimulationConfig::default();
        let mut board = SearchBoard::new(config.rng_seed);
        let catalog = TierCatalog::builtin();
        let mut ledger = MemoryLedger::with_balance(ClientId(6), 50_000);
        for _ in 0..3 {
            board
                .submit(
                    &catalog,
                    &mut ledger,
                    SearchRequest {
                        client: ClientId(6),
                        item: ItemRef {
                            catalog_key: "sedan_b".into(),
                            display_name: "Sedan B".into(),
                            base_price: 10_000,
                        },
                        tier: "economy".into(),
                        band: "salvage".into(),
                        requested_configs: BTreeMap::new(),
                    },
                    0.0,
                    12,
                )
                .expect("submit");
        }
        world.insert_resource(config.clone());
        world.insert_resource(SimulationClock::new(12));
        world.insert_resource(MarketTelemetry::default());
        world.insert_resource(board);
        world.insert_resource(ListingBoard::default());
        world.insert_resource(PremiumGateBoard::new(
            config.rng_seed ^ PREMIUM_GATE_SEED_OFFSET,
        ));
        world
    }

    #[test]
    fn archive_round_trips_through_json() {
        let mut world = seeded_world();
        let archive = archive_market(&world);
        let json = encode_archive_json(&archive).expect("encode");
        let decoded = decode_archive_json(&json).expect("decode");

        restore_market_from_archive(&mut world, &decoded);
        let board = world.resource::<SearchBoard>();
        assert_eq!(board.records().count(), 3);
        assert_eq!(board.active_ids_for(ClientId(6)).len(), 3);
        assert_eq!(
            world.resource::<MarketTelemetry>().records_skipped_on_load,
            0
        );

        let rearchived = archive_market(&world);
        assert_eq!(rearchived.searches, archive.searches);
        assert_eq!(rearchived.gates, archive.gates);
    }

    #[test]
    fn corrupt_entries_are_skipped_not_fatal() {
        let mut world = seeded_world();
        let mut archive = archive_market(&world);
        // identity key gone: the whole entry is unusable
        archive.searches.push(vec![("client".into(), "6".into())]);
        // unparseable field: same treatment
        archive.searches.push(vec![
            ("id".into(), "99".into()),
            ("ttl".into(), "soon".into()),
        ]);

        restore_market_from_archive(&mut world, &archive);
        let board = world.resource::<SearchBoard>();
        assert_eq!(board.records().count(), 3);
        assert_eq!(
            world.resource::<MarketTelemetry>().records_skipped_on_load,
            2
        );
    }

    #[test]
    fn absent_optional_fields_default_on_load() {
        let mut world = seeded_world();
        let mut archive = MarketArchive::default();
        archive.searches.push(vec![("id".into(), "7".into())]);

        restore_market_from_archive(&mut world, &archive);
        let board = world.resource::<SearchBoard>();
        let record = board.record(crate::record::SearchId(7)).expect("loaded");
        assert_eq!(record.status, SearchStatus::Active);
        assert_eq!(record.cost, 0);
    }
}
