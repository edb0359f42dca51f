use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;

use broker_schema::{SearchRecordState, SearchStatus};

use crate::{
    catalog::{QualityBandDef, SearchTierDef},
    outcome::{resolve_search_outcome, FoundItem},
};

/// Identifier for one submitted search. Monotonic within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchId(pub u64);

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a consumer participating in the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to the catalog item a search is hunting for.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRef {
    pub catalog_key: String,
    pub display_name: String,
    pub base_price: i64,
}

/// What a completion check found, without committing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDue {
    None,
    Success,
    Failure,
}

/// One in-flight request with its outcome frozen at creation.
///
/// `advance` only decrements the counters; nothing is ever re-rolled, which
/// is what keeps outcomes stable across save/reload and replication.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub id: SearchId,
    pub client: ClientId,
    pub item: ItemRef,
    pub tier: String,
    pub band: String,
    pub requested_configs: BTreeMap<u16, u8>,
    pub cost: i64,
    pub ttl: i64,
    pub tts: i64,
    pub status: SearchStatus,
    pub found: Option<FoundItem>,
    pub created_at: u64,
}

impl SearchRecord {
    /// Resolve the outcome once and freeze every derived field.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: SearchId,
        client: ClientId,
        item: ItemRef,
        tier: &SearchTierDef,
        band: &QualityBandDef,
        requested_configs: BTreeMap<u16, u8>,
        fee_modifier: f64,
        created_at: u64,
        rng: &mut impl Rng,
    ) -> Self {
        let outcome = resolve_search_outcome(
            tier,
            band,
            item.base_price,
            fee_modifier,
            &requested_configs,
            rng,
        );
        Self {
            id,
            client,
            item,
            tier: tier.id.clone(),
            band: band.id.clone(),
            requested_configs,
            cost: outcome.cost,
            ttl: outcome.ttl,
            tts: outcome.tts,
            status: SearchStatus::Active,
            found: outcome.found,
            created_at,
        }
    }

    /// Decrement both countdowns. Values may go negative; callers inspect
    /// the sign through [`SearchRecord::completion_due`].
    pub fn advance(&mut self, delta_hours: i64) {
        self.ttl -= delta_hours;
        self.tts -= delta_hours;
    }

    /// Evaluate the stored commitments without mutating status; the
    /// scheduler commits transitions so listing generation stays atomic.
    pub fn completion_due(&self) -> CompletionDue {
        if self.status != SearchStatus::Active {
            return CompletionDue::None;
        }
        if self.tts <= 0 {
            return CompletionDue::Success;
        }
        if self.ttl <= 0 {
            return CompletionDue::Failure;
        }
        CompletionDue::None
    }

    /// Idempotent. The fee stays sunk.
    pub fn cancel(&mut self) {
        if self.status == SearchStatus::Active {
            self.status = SearchStatus::Cancelled;
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SearchStatus::Active
    }

    pub fn to_state(&self) -> SearchRecordState {
        let (found_condition, found_price, found_configs) = match &self.found {
            Some(found) => (
                found.condition,
                found.price,
                found.configs.iter().map(|(k, v)| (*k, *v)).collect(),
            ),
            None => (0.0, 0, Vec::new()),
        };
        SearchRecordState {
            id: self.id.0,
            client: self.client.0,
            catalog_key: self.item.catalog_key.clone(),
            display_name: self.item.display_name.clone(),
            base_price: self.item.base_price,
            tier: self.tier.clone(),
            band: self.band.clone(),
            requested_configs: self
                .requested_configs
                .iter()
                .map(|(k, v)| (*k, *v))
                .collect(),
            cost: self.cost,
            ttl: self.ttl,
            tts: self.tts,
            status: self.status,
            found_condition,
            found_price,
            found_configs,
            created_at: self.created_at,
        }
    }

    pub fn from_state(state: &SearchRecordState) -> Self {
        let found = if state.outcome_succeeds() {
            Some(FoundItem {
                condition: state.found_condition,
                price: state.found_price,
                configs: state.found_configs.iter().copied().collect(),
            })
        } else {
            None
        };
        Self {
            id: SearchId(state.id),
            client: ClientId(state.client),
            item: ItemRef {
                catalog_key: state.catalog_key.clone(),
                display_name: state.display_name.clone(),
                base_price: state.base_price,
            },
            tier: state.tier.clone(),
            band: state.band.clone(),
            requested_configs: state.requested_configs.iter().copied().collect(),
            cost: state.cost,
            ttl: state.ttl,
            tts: state.tts,
            status: state.status,
            found,
            created_at: state.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TierCatalog;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn make_record(seed: u64) -> SearchRecord {
        let catalog = TierCatalog::builtin();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        SearchRecord::create(
            SearchId(1),
            ClientId(4),
            ItemRef {
                catalog_key: "sedan_b".into(),
                display_name: "Sedan B".into(),
                base_price: 10_000,
            },
            catalog.tier("standard").expect("tier"),
            catalog.band("fair").expect("band"),
            BTreeMap::from([(1, 0), (5, 2)]),
            0.0,
            7,
            &mut rng,
        )
    }

    fn record_with_outcome(succeeds: bool) -> SearchRecord {
        for seed in 0..512 {
            let record = make_record(seed);
            if record.found.is_some() == succeeds {
                return record;
            }
        }
        unreachable!("both outcome kinds occur within 512 seeds");
    }

    #[test]
    fn advance_zero_is_idempotent() {
        let mut record = make_record(1);
        let (ttl, tts) = (record.ttl, record.tts);
        for _ in 0..10 {
            record.advance(0);
        }
        assert_eq!((record.ttl, record.tts), (ttl, tts));
    }

    #[test]
    fn failure_outcome_never_reports_success() {
        let mut record = record_with_outcome(false);
        assert!(record.tts > record.ttl);
        while record.ttl > 0 {
            assert_ne!(record.completion_due(), CompletionDue::Success);
            record.advance(1);
        }
        assert_eq!(record.completion_due(), CompletionDue::Failure);
    }

    #[test]
    fn success_outcome_fires_at_tts() {
        let mut record = record_with_outcome(true);
        assert!(record.tts >= 1);
        assert!(record.tts <= record.ttl);
        let tts = record.tts;
        record.advance(tts);
        assert_eq!(record.completion_due(), CompletionDue::Success);
    }

    #[test]
    fn scenario_ttl_24_tts_20_completes_after_20() {
        let mut record = make_record(0);
        record.ttl = 24;
        record.tts = 20;
        record.advance(20);
        assert_eq!(record.completion_due(), CompletionDue::Success);
    }

    #[test]
    fn cancel_is_idempotent_and_blocks_completion() {
        let mut record = record_with_outcome(true);
        record.cancel();
        record.cancel();
        assert_eq!(record.status, SearchStatus::Cancelled);
        record.advance(record.tts.max(record.ttl));
        assert_eq!(record.completion_due(), CompletionDue::None);
    }

    #[test]
    fn state_round_trip_is_lossless() {
        for seed in [0, 3, 11, 42] {
            let record = make_record(seed);
            let restored = SearchRecord::from_state(&record.to_state());
            assert_eq!(restored, record);
        }
    }

    #[test]
    fn failed_record_round_trips_with_zeroed_success_fields() {
        let record = record_with_outcome(false);
        let state = record.to_state();
        assert_eq!(state.found_price, 0);
        assert_eq!(state.found_condition, 0.0);
        assert!(state.found_configs.is_empty());
        assert_eq!(SearchRecord::from_state(&state), record);
    }
}
