use std::collections::HashMap;

use bevy::prelude::*;
use thiserror::Error;

use crate::record::ClientId;

/// Neutral score assumed when no rating collaborator is wired in.
pub const DEFAULT_RATING_SCORE: i32 = 650;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("client {client} has insufficient funds for a charge of {amount}")]
pub struct InsufficientFunds {
    pub client: ClientId,
    pub amount: i64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to materialize '{catalog_key}' for client {client}")]
pub struct SpawnFailure {
    pub catalog_key: String,
    pub client: ClientId,
}

/// External currency ledger. A logical charge is issued at most once;
/// refunds go through `credit`.
pub trait LedgerAccess: Send + Sync {
    fn charge(&mut self, client: ClientId, amount: i64) -> Result<(), InsufficientFunds>;
    fn credit(&mut self, client: ClientId, amount: i64);
}

/// External credit-rating input. `None` means the collaborator has no data
/// for this client; callers fall back to [`DEFAULT_RATING_SCORE`].
pub trait RatingProvider: Send + Sync {
    fn score(&self, client: ClientId) -> Option<i32>;
}

/// External spawn/acquire collaborator. Must be safe to retry; the caller
/// refunds when materialization fails.
pub trait Acquisition: Send + Sync {
    fn materialize(&mut self, catalog_key: &str, client: ClientId) -> Result<(), SpawnFailure>;
}

#[derive(Resource)]
pub struct LedgerHandle(pub Box<dyn LedgerAccess>);

#[derive(Resource)]
pub struct RatingHandle(pub Box<dyn RatingProvider>);

#[derive(Resource)]
pub struct AcquisitionHandle(pub Box<dyn Acquisition>);

/// Score for a client, defaulting when the provider has no data.
pub fn rating_score(provider: &dyn RatingProvider, client: ClientId) -> i32 {
    provider.score(client).unwrap_or(DEFAULT_RATING_SCORE)
}

/// Signed fee fraction derived from a credit score: clients above the
/// neutral score earn a discount, clients below pay a surcharge. Applied to
/// search fees only, never to success probability.
pub fn fee_modifier_for_score(score: i32) -> f64 {
    (f64::from(DEFAULT_RATING_SCORE - score) / 1_000.0).clamp(-0.25, 0.5)
}

/// In-memory ledger used by the headless binary and the test suites.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    balances: HashMap<ClientId, i64>,
}

impl MemoryLedger {
    pub fn with_balance(client: ClientId, amount: i64) -> Self {
        let mut ledger = Self::default();
        ledger.deposit(client, amount);
        ledger
    }

    pub fn deposit(&mut self, client: ClientId, amount: i64) {
        *self.balances.entry(client).or_default() += amount;
    }

    pub fn balance(&self, client: ClientId) -> i64 {
        self.balances.get(&client).copied().unwrap_or(0)
    }
}

impl LedgerAccess for MemoryLedger {
    fn charge(&mut self, client: ClientId, amount: i64) -> Result<(), InsufficientFunds> {
        let balance = self.balances.entry(client).or_default();
        if *balance < amount {
            return Err(InsufficientFunds { client, amount });
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(&mut self, client: ClientId, amount: i64) {
        *self.balances.entry(client).or_default() += amount;
    }
}

/// Static score table; clients without an entry fall through to the
/// neutral default at the call site.
#[derive(Debug, Clone, Default)]
pub struct FixedRating {
    scores: HashMap<ClientId, i32>,
}

impl FixedRating {
    pub fn set_score(&mut self, client: ClientId, score: i32) {
        self.scores.insert(client, score);
    }
}

impl RatingProvider for FixedRating {
    fn score(&self, client: ClientId) -> Option<i32> {
        self.scores.get(&client).copied()
    }
}

/// Acquisition stub that records every materialization and can be armed to
/// fail the next call, for exercising the refund path.
#[derive(Debug, Clone, Default)]
pub struct RecordingAcquisition {
    pub materialized: Vec<(String, ClientId)>,
    pub fail_next: bool,
}

impl Acquisition for RecordingAcquisition {
    fn materialize(&mut self, catalog_key: &str, client: ClientId) -> Result<(), SpawnFailure> {
        if self.fail_next {
            self.fail_next = false;
            return Err(SpawnFailure {
                catalog_key: catalog_key.to_owned(),
                client,
            });
        }
        self.materialized.push((catalog_key.to_owned(), client));
        Ok(())
    }
}
