//! Data contracts for the brokerage simulation.
//!
//! Everything that crosses a persistence or replication boundary lives here
//! as plain serde structs, so `broker_core` can stay the only crate that
//! knows the live in-memory shapes. The bincode wire form serializes fields
//! in struct declaration order; readers must consume in the same order as
//! writers, which is a caller contract on both ends rather than a runtime
//! check.

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::hash::{BuildHasher, Hasher};

pub mod attributes;

pub use attributes::{AttributeError, AttributeList};

/// Lifecycle of a search record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum SearchStatus {
    Active = 0,
    Succeeded = 1,
    Failed = 2,
    Cancelled = 3,
    Delivered = 4,
}

impl Default for SearchStatus {
    fn default() -> Self {
        SearchStatus::Active
    }
}

impl SearchStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SearchStatus::Active),
            1 => Some(SearchStatus::Succeeded),
            2 => Some(SearchStatus::Failed),
            3 => Some(SearchStatus::Cancelled),
            4 => Some(SearchStatus::Delivered),
            _ => None,
        }
    }
}

/// Persisted/replicated form of one in-flight or settled search.
///
/// Success-only fields (`found_condition`, `found_price`, `found_configs`)
/// are zeroed/empty on records whose pre-committed outcome is failure.
/// Whether the frozen outcome is a success is derivable: a success always
/// keeps `tts <= ttl`, a failure keeps a constant positive `tts - ttl`
/// slack, and both counters decrement in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchRecordState {
    pub id: u64,
    pub client: u32,
    pub catalog_key: String,
    pub display_name: String,
    pub base_price: i64,
    pub tier: String,
    pub band: String,
    pub requested_configs: Vec<(u16, u8)>,
    pub cost: i64,
    pub ttl: i64,
    pub tts: i64,
    pub status: SearchStatus,
    pub found_condition: f32,
    pub found_price: i64,
    pub found_configs: Vec<(u16, u8)>,
    pub created_at: u64,
}

impl SearchRecordState {
    /// True when the frozen outcome of this record is a success.
    pub fn outcome_succeeds(&self) -> bool {
        self.tts <= self.ttl
    }
}

/// A materialized, purchasable result of a successful search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListingState {
    pub search_id: u64,
    pub client: u32,
    pub catalog_key: String,
    pub display_name: String,
    pub condition: f32,
    pub price: i64,
    pub configs: Vec<(u16, u8)>,
    pub expires_at: u64,
}

/// Per-client premium unlock state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PremiumGateStateRecord {
    pub client: u32,
    pub discovered: bool,
    pub purchased: bool,
    pub offer_active: bool,
    pub offer_expires_at: u64,
    pub pity_counter: u32,
    pub display_score: i32,
    pub display_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshotHeader {
    pub day: u64,
    pub hours: u64,
    pub record_count: u32,
    pub listing_count: u32,
    pub gate_count: u32,
    pub hash: u64,
}

impl MarketSnapshotHeader {
    pub fn new(
        day: u64,
        hours: u64,
        record_count: usize,
        listing_count: usize,
        gate_count: usize,
    ) -> Self {
        Self {
            day,
            hours,
            record_count: record_count as u32,
            listing_count: listing_count as u32,
            gate_count: gate_count as u32,
            hash: 0,
        }
    }
}

impl Default for MarketSnapshotHeader {
    fn default() -> Self {
        Self {
            day: 0,
            hours: 0,
            record_count: 0,
            listing_count: 0,
            gate_count: 0,
            hash: 0,
        }
    }
}

/// Full authoritative state of the market, in replication order.
///
/// State vectors are expected to be sorted by their identity fields before
/// encoding so that equal simulations produce byte-identical frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MarketSnapshot {
    pub header: MarketSnapshotHeader,
    pub records: Vec<SearchRecordState>,
    pub listings: Vec<ListingState>,
    pub gates: Vec<PremiumGateStateRecord>,
}

impl MarketSnapshot {
    pub fn finalize(mut self) -> Self {
        let hash = hash_snapshot(&self);
        let mut header = self.header.clone();
        header.hash = hash;
        self.header = header;
        self
    }
}

pub fn hash_snapshot(snapshot: &MarketSnapshot) -> u64 {
    let mut clone = snapshot.clone();
    clone.header.hash = 0;
    let encoded = bincode::serialize(&clone).expect("snapshot serialization for hashing");
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

pub fn encode_snapshot(snapshot: &MarketSnapshot) -> bincode::Result<Vec<u8>> {
    bincode::serialize(snapshot)
}

pub fn decode_snapshot(data: &[u8]) -> bincode::Result<MarketSnapshot> {
    bincode::deserialize(data)
}

pub fn encode_snapshot_json(snapshot: &MarketSnapshot) -> serde_json::Result<String> {
    serde_json::to_string(snapshot)
}

pub fn decode_snapshot_json(data: &str) -> serde_json::Result<MarketSnapshot> {
    serde_json::from_str(data)
}
