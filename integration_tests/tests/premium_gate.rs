mod common;

use bevy::prelude::{App, Events};

use broker_core::{
    accept_premium_offer, prereq_reasons, run_hour, run_hours, ActivityLedger, CeilingRegistry,
    ClientId, DeliveryCompletedEvent, MarketTelemetry, OfferError, PremiumGateBoard,
    PremiumOfferEvent, SearchId, SimulationConfig,
};

const CLIENT: ClientId = ClientId(7);

fn gate_config() -> SimulationConfig {
    SimulationConfig {
        premium_base_chance: 0.0,
        premium_pity_threshold: 5,
        premium_min_purchases: 3,
        premium_price: 50_000,
        ..Default::default()
    }
}

fn qualified_app() -> App {
    let mut app = common::wired_app_with(gate_config());
    for _ in 0..3 {
        app.world
            .resource_mut::<ActivityLedger>()
            .record_purchase(CLIENT);
    }
    app.world
        .resource_mut::<CeilingRegistry>()
        .set_owned(CLIENT, vec![88.0, 22.0]);
    app
}

fn deliver(app: &mut App) {
    app.world.send_event(DeliveryCompletedEvent {
        search_id: SearchId(0),
        client: CLIENT,
    });
    run_hour(app);
}

#[test]
fn pity_counter_guarantees_an_offer() {
    let mut app = qualified_app();
    let threshold = gate_config().premium_pity_threshold;

    for _ in 0..threshold - 1 {
        deliver(&mut app);
        let gate = app.world.resource::<PremiumGateBoard>();
        assert!(!gate.state_for(CLIENT).expect("state").discovered);
    }

    deliver(&mut app);
    let gate = app.world.resource::<PremiumGateBoard>();
    let state = gate.state_for(CLIENT).expect("state");
    assert!(state.discovered && state.offer_active);
    assert_eq!(state.pity_counter, threshold);
    assert_eq!(app.world.resource::<Events<PremiumOfferEvent>>().len(), 1);
    assert_eq!(
        app.world
            .resource::<MarketTelemetry>()
            .premium_offers_triggered,
        1
    );
}

#[test]
fn ineligible_clients_are_told_why() {
    let mut app = common::wired_app_with(gate_config());
    // no purchases at all: the first prerequisite reports
    deliver(&mut app);
    {
        let gate = app.world.resource::<PremiumGateBoard>();
        let state = gate.state_for(CLIENT).expect("state cached for display");
        assert_eq!(state.display_reason, prereq_reasons::NOT_ENOUGH_PURCHASES);
        assert_eq!(state.pity_counter, 0);
    }

    // purchases and rating fine, but every owned fixture is pristine
    for _ in 0..3 {
        app.world
            .resource_mut::<ActivityLedger>()
            .record_purchase(CLIENT);
    }
    app.world
        .resource_mut::<CeilingRegistry>()
        .set_owned(CLIENT, vec![95.0, 70.0]);
    deliver(&mut app);
    let gate = app.world.resource::<PremiumGateBoard>();
    let state = gate.state_for(CLIENT).expect("state");
    assert_eq!(state.display_reason, prereq_reasons::NO_DEGRADED_CEILING);
    assert_eq!(state.pity_counter, 0, "blocked events never accrue pity");
}

#[test]
fn low_rating_blocks_the_gate() {
    let mut app = qualified_app();
    common::with_rating(&mut app, CLIENT, 480);

    deliver(&mut app);
    let gate = app.world.resource::<PremiumGateBoard>();
    let state = gate.state_for(CLIENT).expect("state");
    assert_eq!(state.display_reason, prereq_reasons::RATING_BELOW_MINIMUM);
    assert_eq!(state.display_score, 480);
}

#[test]
fn accepting_the_offer_charges_and_materializes() {
    let mut app = qualified_app();
    for _ in 0..gate_config().premium_pity_threshold {
        deliver(&mut app);
    }
    assert!(app
        .world
        .resource::<PremiumGateBoard>()
        .state_for(CLIENT)
        .expect("state")
        .offer_active);

    let err = accept_premium_offer(&mut app.world, CLIENT).expect_err("no funds yet");
    assert!(matches!(err, OfferError::InsufficientFunds(_)));

    common::deposit(&mut app, CLIENT, 60_000);
    accept_premium_offer(&mut app.world, CLIENT).expect("funded accept");

    let gate = app.world.resource::<PremiumGateBoard>();
    let state = gate.state_for(CLIENT).expect("state");
    assert!(state.purchased && !state.offer_active);
    assert_eq!(app.world.resource::<MarketTelemetry>().premium_acquired, 1);
}

#[test]
fn unanswered_offers_expire_for_good() {
    let mut app = qualified_app();
    let config = gate_config();
    for _ in 0..config.premium_pity_threshold {
        deliver(&mut app);
    }

    run_hours(&mut app, config.premium_offer_window_hours);
    let gate = app.world.resource::<PremiumGateBoard>();
    let state = gate.state_for(CLIENT).expect("state");
    assert!(state.discovered && !state.offer_active);
    assert_eq!(
        app.world
            .resource::<MarketTelemetry>()
            .premium_offers_expired,
        1
    );

    // the discovery lifetime is spent; further deliveries change nothing
    for _ in 0..20 {
        deliver(&mut app);
    }
    let gate = app.world.resource::<PremiumGateBoard>();
    assert!(!gate.state_for(CLIENT).expect("state").offer_active);
    let err = accept_premium_offer(&mut app.world, CLIENT).expect_err("window closed");
    assert!(matches!(err, OfferError::NoOpportunity));
}
