use std::collections::HashMap;

use bevy::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::info;

use broker_schema::PremiumGateStateRecord;

use crate::{
    collaborators::{
        rating_score, Acquisition, AcquisitionHandle, InsufficientFunds, LedgerAccess,
        LedgerHandle, RatingHandle, SpawnFailure,
    },
    record::ClientId,
    resources::{MarketTelemetry, SimulationClock, SimulationConfig},
    scheduler::DeliveryCompletedEvent,
};

/// Prerequisite failure reasons, stable strings surfaced to the host UI.
pub mod prereq_reasons {
    pub const NOT_ENOUGH_PURCHASES: &str = "not_enough_purchases";
    pub const RATING_BELOW_MINIMUM: &str = "rating_below_minimum";
    pub const NO_DEGRADED_CEILING: &str = "no_degraded_ceiling";
}

#[derive(Debug, Error)]
pub enum OfferError {
    #[error("client has no active premium offer")]
    NoOpportunity,
    #[error(transparent)]
    InsufficientFunds(#[from] InsufficientFunds),
    /// The charge was refunded; the offer stays active.
    #[error(transparent)]
    Spawn(#[from] SpawnFailure),
}

/// Outcome of a prerequisite check, cached for display.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityReport {
    pub eligible: bool,
    pub reason: Option<&'static str>,
    pub detail: String,
}

impl EligibilityReport {
    fn eligible() -> Self {
        Self {
            eligible: true,
            reason: None,
            detail: String::new(),
        }
    }

    fn blocked(reason: &'static str, detail: String) -> Self {
        Self {
            eligible: false,
            reason: Some(reason),
            detail,
        }
    }
}

/// Hidden unlock state for one client. `offer_active` implies `discovered`;
/// the pity counter only moves while the gate is still hidden.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PremiumGateState {
    pub discovered: bool,
    pub purchased: bool,
    pub offer_active: bool,
    pub offer_expires_at: u64,
    pub pity_counter: u32,
    pub display_score: i32,
    pub display_reason: String,
}

impl PremiumGateState {
    pub fn to_state(&self, client: ClientId) -> PremiumGateStateRecord {
        PremiumGateStateRecord {
            client: client.0,
            discovered: self.discovered,
            purchased: self.purchased,
            offer_active: self.offer_active,
            offer_expires_at: self.offer_expires_at,
            pity_counter: self.pity_counter,
            display_score: self.display_score,
            display_reason: self.display_reason.clone(),
        }
    }

    pub fn from_state(state: &PremiumGateStateRecord) -> Self {
        Self {
            discovered: state.discovered,
            purchased: state.purchased,
            offer_active: state.offer_active,
            offer_expires_at: state.offer_expires_at,
            pity_counter: state.pity_counter,
            display_score: state.display_score,
            display_reason: state.display_reason.clone(),
        }
    }
}

/// Per-client count of completed deliveries; the gate's tracked usage
/// counter and its qualifying-event source.
#[derive(Resource, Debug, Clone, Default)]
pub struct ActivityLedger {
    purchases: HashMap<ClientId, u32>,
}

impl ActivityLedger {
    pub fn record_purchase(&mut self, client: ClientId) -> u32 {
        let entry = self.purchases.entry(client).or_default();
        *entry = entry.saturating_add(1);
        *entry
    }

    pub fn purchases_for(&self, client: ClientId) -> u32 {
        self.purchases.get(&client).copied().unwrap_or(0)
    }
}

/// Condition of the fixtures each client owns, fed in by the host world.
/// Conditions share the 0–100 scale of the quality bands.
#[derive(Resource, Debug, Clone, Default)]
pub struct CeilingRegistry {
    owned: HashMap<ClientId, Vec<f32>>,
}

impl CeilingRegistry {
    pub fn set_owned(&mut self, client: ClientId, conditions: Vec<f32>) {
        self.owned.insert(client, conditions);
    }

    pub fn has_degraded(&self, client: ClientId, threshold: f32) -> bool {
        self.owned
            .get(&client)
            .map(|conditions| conditions.iter().any(|condition| *condition <= threshold))
            .unwrap_or(false)
    }
}

/// Per-client premium unlock machine. One discovery lifetime per client:
/// once the offer expires the gate never re-arms.
#[derive(Resource, Debug, Clone)]
pub struct PremiumGateBoard {
    states: HashMap<ClientId, PremiumGateState>,
    rng: ChaCha8Rng,
}

impl PremiumGateBoard {
    pub fn new(seed: u64) -> Self {
        Self {
            states: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn state_for(&self, client: ClientId) -> Option<&PremiumGateState> {
        self.states.get(&client)
    }

    pub fn states(&self) -> impl Iterator<Item = (ClientId, &PremiumGateState)> {
        self.states.iter().map(|(client, state)| (*client, state))
    }

    pub fn register_restored(&mut self, client: ClientId, state: PremiumGateState) {
        self.states.insert(client, state);
    }

    /// Check every prerequisite, short-circuiting on the first failure, and
    /// cache the result for display.
    pub fn check_prerequisites(
        &mut self,
        client: ClientId,
        activity: &ActivityLedger,
        score: i32,
        ceilings: &CeilingRegistry,
        config: &SimulationConfig,
    ) -> EligibilityReport {
        let purchases = activity.purchases_for(client);
        let report = if purchases < config.premium_min_purchases {
            EligibilityReport::blocked(
                prereq_reasons::NOT_ENOUGH_PURCHASES,
                format!("{}/{}", purchases, config.premium_min_purchases),
            )
        } else if score < config.premium_min_score {
            EligibilityReport::blocked(
                prereq_reasons::RATING_BELOW_MINIMUM,
                format!("{}/{}", score, config.premium_min_score),
            )
        } else if !ceilings.has_degraded(client, config.premium_wear_threshold) {
            EligibilityReport::blocked(
                prereq_reasons::NO_DEGRADED_CEILING,
                format!("threshold {}", config.premium_wear_threshold),
            )
        } else {
            EligibilityReport::eligible()
        };

        let state = self.states.entry(client).or_default();
        state.display_score = score;
        state.display_reason = report.reason.unwrap_or("").to_owned();
        report
    }

    /// Qualifying external event. Ineligible clients are a no-op; eligible
    /// ones advance the pity counter and roll, with a guaranteed trigger
    /// once the counter reaches the configured threshold.
    pub fn on_qualifying_event(
        &mut self,
        client: ClientId,
        activity: &ActivityLedger,
        score: i32,
        ceilings: &CeilingRegistry,
        config: &SimulationConfig,
        now_hours: u64,
    ) -> bool {
        if let Some(state) = self.states.get(&client) {
            if state.discovered || state.purchased {
                return false;
            }
        }
        let report = self.check_prerequisites(client, activity, score, ceilings, config);
        if !report.eligible {
            return false;
        }

        let state = self.states.entry(client).or_default();
        state.pity_counter = state.pity_counter.saturating_add(1);
        let threshold = if state.pity_counter >= config.premium_pity_threshold {
            1.0
        } else {
            config.premium_base_chance
        };
        let roll: f64 = self.rng.gen();
        if roll > threshold {
            return false;
        }

        let state = self
            .states
            .get_mut(&client)
            .expect("state inserted by the pity update");
        state.discovered = true;
        state.offer_active = true;
        state.offer_expires_at = now_hours + config.premium_offer_window_hours;
        info!(
            target: "brokerage::analytics",
            event = "premium_offer_triggered",
            client = %client,
            pity = state.pity_counter,
            expires_at = state.offer_expires_at,
        );
        true
    }

    /// Accept the active offer. Spawn failure refunds the charge and keeps
    /// the offer active for a caller-initiated retry.
    pub fn accept(
        &mut self,
        client: ClientId,
        ledger: &mut dyn LedgerAccess,
        acquisition: &mut dyn Acquisition,
        config: &SimulationConfig,
    ) -> Result<(), OfferError> {
        let state = self
            .states
            .get_mut(&client)
            .filter(|state| state.offer_active)
            .ok_or(OfferError::NoOpportunity)?;

        ledger.charge(client, config.premium_price)?;
        if let Err(spawn) = acquisition.materialize(&config.premium_catalog_key, client) {
            ledger.credit(client, config.premium_price);
            return Err(OfferError::Spawn(spawn));
        }

        state.offer_active = false;
        state.purchased = true;
        info!(
            target: "brokerage::analytics",
            event = "premium_offer_accepted",
            client = %client,
            price = config.premium_price,
        );
        Ok(())
    }

    /// Acknowledge a decline. The offer stays active until it expires and
    /// is never re-rolled.
    pub fn decline(&self, client: ClientId) {
        info!(
            target: "brokerage::analytics",
            event = "premium_offer_declined",
            client = %client,
        );
    }

    /// Deactivate every timed-out offer. Discovery is not reset, so no
    /// further rolls occur for those clients.
    pub fn expire_check(&mut self, now_hours: u64) -> Vec<ClientId> {
        let mut expired: Vec<ClientId> = self
            .states
            .iter()
            .filter(|(_, state)| state.offer_active && now_hours >= state.offer_expires_at)
            .map(|(client, _)| *client)
            .collect();
        expired.sort_unstable();
        for client in &expired {
            if let Some(state) = self.states.get_mut(client) {
                state.offer_active = false;
            }
            info!(
                target: "brokerage::analytics",
                event = "premium_offer_expired",
                client = %client,
            );
        }
        expired
    }
}

#[derive(Event, Debug, Clone, Copy)]
pub struct PremiumOfferEvent {
    pub client: ClientId,
}

#[derive(Event, Debug, Clone, Copy)]
pub struct PremiumOfferExpiredEvent {
    pub client: ClientId,
}

/// Every completed delivery is a qualifying event for the hidden unlock.
#[allow(clippy::too_many_arguments)]
pub fn qualify_premium_on_delivery(
    clock: Res<SimulationClock>,
    config: Res<SimulationConfig>,
    mut gate: ResMut<PremiumGateBoard>,
    activity: Res<ActivityLedger>,
    ceilings: Res<CeilingRegistry>,
    rating: Option<Res<RatingHandle>>,
    mut telemetry: ResMut<MarketTelemetry>,
    mut deliveries: EventReader<DeliveryCompletedEvent>,
    mut offers: EventWriter<PremiumOfferEvent>,
) {
    for delivery in deliveries.read() {
        let score = match rating.as_deref() {
            Some(handle) => rating_score(handle.0.as_ref(), delivery.client),
            None => crate::collaborators::DEFAULT_RATING_SCORE,
        };
        let triggered = gate.on_qualifying_event(
            delivery.client,
            &activity,
            score,
            &ceilings,
            &config,
            clock.hours(),
        );
        if triggered {
            telemetry.premium_offers_triggered += 1;
            offers.send(PremiumOfferEvent {
                client: delivery.client,
            });
        }
    }
}

pub fn expire_premium_offers(
    clock: Res<SimulationClock>,
    mut gate: ResMut<PremiumGateBoard>,
    mut telemetry: ResMut<MarketTelemetry>,
    mut expired: EventWriter<PremiumOfferExpiredEvent>,
) {
    for client in gate.expire_check(clock.hours()) {
        telemetry.premium_offers_expired += 1;
        expired.send(PremiumOfferExpiredEvent { client });
    }
}

/// World-level accept helper for hosts driving the app directly.
pub fn accept_premium_offer(world: &mut World, client: ClientId) -> Result<(), OfferError> {
    let config = world.resource::<SimulationConfig>().clone();
    world.resource_scope(|world, mut gate: Mut<PremiumGateBoard>| {
        world.resource_scope(|world, mut ledger: Mut<LedgerHandle>| {
            let mut acquisition = world.resource_mut::<AcquisitionHandle>();
            let result = gate.accept(
                client,
                ledger.0.as_mut(),
                acquisition.0.as_mut(),
                &config,
            );
            if result.is_ok() {
                world.resource_mut::<MarketTelemetry>().premium_acquired += 1;
            }
            result
        })
    })
}
