use std::collections::{BTreeMap, HashMap};

use bevy::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::info;

use broker_schema::{ListingState, SearchStatus};

use crate::{
    catalog::{CatalogError, TierCatalog},
    collaborators::{Acquisition, InsufficientFunds, LedgerAccess, SpawnFailure},
    outcome::search_fee,
    record::{ClientId, CompletionDue, ItemRef, SearchId, SearchRecord},
    resources::{MarketTelemetry, SimulationClock, SimulationConfig, HOURS_PER_DAY},
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error("no search with that id")]
    NotFound,
    #[error("search is no longer active")]
    InvalidState,
}

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("no listing for that search id")]
    NotFound,
    #[error("record is not awaiting pickup")]
    InvalidState,
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),
    /// The charge was refunded; the listing stays purchasable.
    #[error(transparent)]
    Spawn(#[from] SpawnFailure),
}

/// Everything a host provides when a consumer requests a search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub client: ClientId,
    pub item: ItemRef,
    pub tier: String,
    pub band: String,
    pub requested_configs: BTreeMap<u16, u8>,
}

/// A materialized, purchasable result of a successful search, separate
/// from the search record itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub search_id: SearchId,
    pub client: ClientId,
    pub catalog_key: String,
    pub display_name: String,
    pub condition: f32,
    pub price: i64,
    pub configs: BTreeMap<u16, u8>,
    pub expires_at: u64,
}

impl Listing {
    pub fn to_state(&self) -> ListingState {
        ListingState {
            search_id: self.search_id.0,
            client: self.client.0,
            catalog_key: self.catalog_key.clone(),
            display_name: self.display_name.clone(),
            condition: self.condition,
            price: self.price,
            configs: self.configs.iter().map(|(k, v)| (*k, *v)).collect(),
            expires_at: self.expires_at,
        }
    }

    pub fn from_state(state: &ListingState) -> Self {
        Self {
            search_id: SearchId(state.search_id),
            client: ClientId(state.client),
            catalog_key: state.catalog_key.clone(),
            display_name: state.display_name.clone(),
            condition: state.condition,
            price: state.price,
            configs: state.configs.iter().copied().collect(),
            expires_at: state.expires_at,
        }
    }
}

/// Notice emitted when a search runs out its lifetime without success.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureNotice {
    pub search_id: SearchId,
    pub client: ClientId,
    pub catalog_key: String,
    pub display_name: String,
}

/// Batch result of one daily rollup. Listings become externally visible
/// only after the whole batch is computed.
#[derive(Debug, Default)]
pub struct DayRollup {
    pub days_processed: u64,
    pub listings: Vec<Listing>,
    pub failures: Vec<FailureNotice>,
}

/// Authoritative owner of every search record across all consumers.
///
/// `records` keeps full history (settled records included); `by_client` is
/// the active-slot index: membership means the search still occupies one
/// of the consumer's slots.
#[derive(Resource, Debug, Clone)]
pub struct SearchBoard {
    records: HashMap<SearchId, SearchRecord>,
    by_client: HashMap<ClientId, Vec<SearchId>>,
    next_id: u64,
    last_processed_day: u64,
    rng: ChaCha8Rng,
}

impl SearchBoard {
    pub fn new(seed: u64) -> Self {
        Self {
            records: HashMap::new(),
            by_client: HashMap::new(),
            next_id: 1,
            last_processed_day: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn record(&self, id: SearchId) -> Option<&SearchRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &SearchRecord> {
        self.records.values()
    }

    pub fn active_ids_for(&self, client: ClientId) -> &[SearchId] {
        self.by_client
            .get(&client)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn last_processed_day(&self) -> u64 {
        self.last_processed_day
    }

    /// Charge the fee, resolve the outcome once, and register the record.
    ///
    /// The fee is computed before the charge so the ledger sees exactly one
    /// call per logical charge; resolution uses the same formula and cannot
    /// disagree with it.
    pub fn submit(
        &mut self,
        catalog: &TierCatalog,
        ledger: &mut dyn LedgerAccess,
        request: SearchRequest,
        fee_modifier: f64,
        now_hours: u64,
    ) -> Result<SearchId, SubmitError> {
        let tier = catalog.tier(&request.tier)?;
        let band = catalog.band(&request.band)?;

        let fee = search_fee(tier, request.item.base_price, fee_modifier);
        ledger.charge(request.client, fee)?;

        let id = SearchId(self.next_id);
        self.next_id += 1;
        let record = SearchRecord::create(
            id,
            request.client,
            request.item,
            tier,
            band,
            request.requested_configs,
            fee_modifier,
            now_hours,
            &mut self.rng,
        );
        info!(
            target: "brokerage::analytics",
            event = "search_submitted",
            search = %id,
            client = %request.client,
            tier = %record.tier,
            band = %record.band,
            fee,
            ttl = record.ttl,
        );
        self.by_client.entry(request.client).or_default().push(id);
        self.records.insert(id, record);
        Ok(id)
    }

    /// Register an already-resolved record, used by persistence restore.
    pub fn register_restored(&mut self, record: SearchRecord, occupies_slot: bool) {
        self.next_id = self.next_id.max(record.id.0 + 1);
        if occupies_slot {
            self.by_client
                .entry(record.client)
                .or_default()
                .push(record.id);
        }
        self.records.insert(record.id, record);
    }

    pub fn set_last_processed_day(&mut self, day: u64) {
        self.last_processed_day = day;
    }

    /// Advance every active record through the days elapsed since the last
    /// rollup. Days are processed strictly sequentially so no record ever
    /// observes more than one day's decrement per simulated day; within a
    /// day the result is order-independent across consumers, but ids are
    /// walked sorted so emitted batches replay identically. Listing expiry
    /// is anchored to the day the completion commits, not the wall-clock
    /// hour of the rollup, so a fast-forward over N days produces the same
    /// listings as N single-day rollups.
    pub fn roll_days(&mut self, current_day: u64, listing_window_hours: u64) -> DayRollup {
        let mut rollup = DayRollup::default();
        if current_day <= self.last_processed_day {
            return rollup;
        }
        let days_elapsed = current_day - self.last_processed_day;

        for offset in 1..=days_elapsed {
            let day = self.last_processed_day + offset;
            let mut due: Vec<SearchId> = Vec::new();
            let mut ids: Vec<SearchId> = self
                .records
                .iter()
                .filter(|(_, record)| record.is_active())
                .map(|(id, _)| *id)
                .collect();
            ids.sort_unstable();

            for id in ids {
                let record = self
                    .records
                    .get_mut(&id)
                    .expect("active id collected from the record map");
                record.advance(HOURS_PER_DAY);
                if record.completion_due() != CompletionDue::None {
                    due.push(id);
                }
            }

            // Commit after the whole day's decrement pass; listing
            // visibility is deferred further, to the end of the rollup.
            let completed_at_hours = day * HOURS_PER_DAY as u64;
            for id in due {
                self.commit_completion(id, completed_at_hours, listing_window_hours, &mut rollup);
            }
        }

        self.last_processed_day = current_day;
        rollup.days_processed = days_elapsed;
        rollup
    }

    fn commit_completion(
        &mut self,
        id: SearchId,
        completed_at_hours: u64,
        listing_window_hours: u64,
        rollup: &mut DayRollup,
    ) {
        let record = match self.records.get_mut(&id) {
            Some(record) => record,
            None => return,
        };
        let due = record.completion_due();
        if due == CompletionDue::None {
            return;
        }
        // A restored record can carry counters that promise a success its
        // state cannot deliver; it settles as a failure.
        match (due, record.found.clone()) {
            (CompletionDue::Success, Some(found)) => {
                record.status = SearchStatus::Succeeded;
                let listing = Listing {
                    search_id: id,
                    client: record.client,
                    catalog_key: record.item.catalog_key.clone(),
                    display_name: record.item.display_name.clone(),
                    condition: found.condition,
                    price: found.price,
                    configs: found.configs.clone(),
                    expires_at: completed_at_hours + listing_window_hours,
                };
                info!(
                    target: "brokerage::analytics",
                    event = "search_succeeded",
                    search = %id,
                    client = %listing.client,
                    price = listing.price,
                    condition = listing.condition,
                );
                // The slot stays occupied until the listing is purchased
                // or expires.
                rollup.listings.push(listing);
            }
            _ => {
                record.status = SearchStatus::Failed;
                let notice = FailureNotice {
                    search_id: id,
                    client: record.client,
                    catalog_key: record.item.catalog_key.clone(),
                    display_name: record.item.display_name.clone(),
                };
                info!(
                    target: "brokerage::analytics",
                    event = "search_failed",
                    search = %id,
                    client = %notice.client,
                );
                self.release_slot(id);
                rollup.failures.push(notice);
            }
        }
    }

    /// Remove a search from its consumer's active-slot index.
    pub fn release_slot(&mut self, id: SearchId) {
        let client = match self.records.get(&id) {
            Some(record) => record.client,
            None => return,
        };
        if let Some(slots) = self.by_client.get_mut(&client) {
            slots.retain(|slot| *slot != id);
            if slots.is_empty() {
                self.by_client.remove(&client);
            }
        }
    }

    /// Only valid while the record is still active. The fee stays sunk.
    pub fn cancel(&mut self, id: SearchId) -> Result<(), CancelError> {
        let record = self.records.get_mut(&id).ok_or(CancelError::NotFound)?;
        if !record.is_active() {
            return Err(CancelError::InvalidState);
        }
        record.cancel();
        info!(
            target: "brokerage::analytics",
            event = "search_cancelled",
            search = %id,
            client = %record.client,
        );
        self.release_slot(id);
        Ok(())
    }

    /// Charge the listing price, hand the item to the acquisition
    /// collaborator, and free the slot. A spawn failure refunds the charge
    /// and leaves the listing purchasable.
    pub fn purchase(
        &mut self,
        listings: &mut ListingBoard,
        ledger: &mut dyn LedgerAccess,
        acquisition: &mut dyn Acquisition,
        id: SearchId,
    ) -> Result<Listing, PurchaseError> {
        let listing = listings.get(id).cloned().ok_or(PurchaseError::NotFound)?;
        let record = self.records.get_mut(&id).ok_or(PurchaseError::NotFound)?;
        if record.status != SearchStatus::Succeeded {
            return Err(PurchaseError::InvalidState);
        }

        ledger.charge(listing.client, listing.price)?;
        if let Err(spawn) = acquisition.materialize(&listing.catalog_key, listing.client) {
            ledger.credit(listing.client, listing.price);
            return Err(PurchaseError::Spawn(spawn));
        }

        record.status = SearchStatus::Delivered;
        listings.remove(id);
        self.release_slot(id);
        info!(
            target: "brokerage::analytics",
            event = "listing_purchased",
            search = %id,
            client = %listing.client,
            price = listing.price,
        );
        Ok(listing)
    }
}

/// Posted listings awaiting purchase, keyed by their originating search.
#[derive(Resource, Debug, Clone, Default)]
pub struct ListingBoard {
    listings: HashMap<SearchId, Listing>,
}

impl ListingBoard {
    pub fn post(&mut self, listing: Listing) {
        self.listings.insert(listing.search_id, listing);
    }

    pub fn get(&self, id: SearchId) -> Option<&Listing> {
        self.listings.get(&id)
    }

    pub fn remove(&mut self, id: SearchId) -> Option<Listing> {
        self.listings.remove(&id)
    }

    pub fn listings(&self) -> impl Iterator<Item = &Listing> {
        self.listings.values()
    }

    pub fn listings_for(&self, client: ClientId) -> Vec<&Listing> {
        let mut entries: Vec<&Listing> = self
            .listings
            .values()
            .filter(|listing| listing.client == client)
            .collect();
        entries.sort_unstable_by_key(|listing| listing.search_id);
        entries
    }

    /// Remove and return every listing whose window has closed.
    pub fn drain_expired(&mut self, now_hours: u64) -> Vec<Listing> {
        let mut expired: Vec<SearchId> = self
            .listings
            .values()
            .filter(|listing| now_hours >= listing.expires_at)
            .map(|listing| listing.search_id)
            .collect();
        expired.sort_unstable();
        expired
            .into_iter()
            .filter_map(|id| self.listings.remove(&id))
            .collect()
    }
}

#[derive(Event, Debug, Clone)]
pub struct ListingPostedEvent {
    pub listing: Listing,
}

#[derive(Event, Debug, Clone)]
pub struct ListingExpiredEvent {
    pub listing: Listing,
}

#[derive(Event, Debug, Clone)]
pub struct SearchFailedEvent {
    pub notice: FailureNotice,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct DeliveryCompletedEvent {
    pub search_id: SearchId,
    pub client: ClientId,
}

/// Day-granular rollup. Correctly fast-forwards multi-day jumps; a tick
/// that lands within an already-processed day is a no-op.
pub fn process_daily_searches(
    clock: Res<SimulationClock>,
    config: Res<SimulationConfig>,
    mut board: ResMut<SearchBoard>,
    mut listings: ResMut<ListingBoard>,
    mut telemetry: ResMut<MarketTelemetry>,
    mut posted: EventWriter<ListingPostedEvent>,
    mut failed: EventWriter<SearchFailedEvent>,
) {
    let rollup = board.roll_days(clock.day(), config.listing_window_hours);
    if rollup.days_processed == 0 {
        return;
    }
    for listing in rollup.listings {
        telemetry.searches_succeeded += 1;
        telemetry.listings_posted += 1;
        listings.post(listing.clone());
        posted.send(ListingPostedEvent { listing });
    }
    for notice in rollup.failures {
        telemetry.searches_failed += 1;
        failed.send(SearchFailedEvent { notice });
    }
}

/// Hourly inspection pass, independent of the day-based queue: listings
/// whose pickup window closed are withdrawn and their slots released. This
/// never touches `ttl`/`tts`, so the two cadences cannot double-count.
pub fn inspect_hourly_listings(
    clock: Res<SimulationClock>,
    mut board: ResMut<SearchBoard>,
    mut listings: ResMut<ListingBoard>,
    mut telemetry: ResMut<MarketTelemetry>,
    mut expired: EventWriter<ListingExpiredEvent>,
) {
    for listing in listings.drain_expired(clock.hours()) {
        telemetry.listings_expired += 1;
        board.release_slot(listing.search_id);
        info!(
            target: "brokerage::analytics",
            event = "listing_expired",
            search = %listing.search_id,
            client = %listing.client,
        );
        expired.send(ListingExpiredEvent { listing });
    }
}
