use std::collections::BTreeMap;

use rand::Rng;

use crate::catalog::{effective_success, QualityBandDef, SearchTierDef};

/// Added to the rolled duration to produce the unreachable `tts` of a
/// failure outcome. The offset is constant so the success/failure flag of a
/// persisted record stays derivable from `tts - ttl` alone.
pub const FAILURE_TTS_SLACK: i64 = 1_000;

/// Success-path payload, drawn once at resolution time and frozen.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundItem {
    pub condition: f32,
    pub price: i64,
    /// Requested configurations that matched the request. Requested keys
    /// absent here receive a substitute option chosen by the catalog layer.
    pub configs: BTreeMap<u16, u8>,
}

/// Everything a search commits to at creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutcome {
    pub cost: i64,
    pub duration_hours: i64,
    pub ttl: i64,
    pub tts: i64,
    pub found: Option<FoundItem>,
}

impl ResolvedOutcome {
    pub fn succeeds(&self) -> bool {
        self.found.is_some()
    }
}

/// Fee charged up front for a search, in whole credits.
pub fn search_fee(tier: &SearchTierDef, base_price: i64, fee_modifier: f64) -> i64 {
    ((base_price as f64) * tier.fee_fraction * (1.0 + fee_modifier)).floor() as i64
}

/// Resolve a search outcome with a single pass over the random source.
///
/// Draw order is a replay contract shared by every implementation of this
/// pipeline: duration, one warm-up draw, the success roll, then (success
/// only) `tts`, condition, price wobble, and one match roll per requested
/// configuration in ascending key order. Time advancement never consumes
/// randomness, so outcomes replay identically at any tick granularity.
pub fn resolve_search_outcome(
    tier: &SearchTierDef,
    band: &QualityBandDef,
    base_price: i64,
    fee_modifier: f64,
    requested_configs: &BTreeMap<u16, u8>,
    rng: &mut impl Rng,
) -> ResolvedOutcome {
    let cost = search_fee(tier, base_price, fee_modifier);
    let duration = if tier.min_duration_hours == tier.max_duration_hours {
        tier.min_duration_hours
    } else {
        rng.gen_range(tier.min_duration_hours..=tier.max_duration_hours)
    };

    let chance = effective_success(tier, band);
    let _warm_up: f64 = rng.gen();
    let roll: f64 = rng.gen();

    if roll > chance {
        return ResolvedOutcome {
            cost,
            duration_hours: duration,
            ttl: duration,
            tts: duration + FAILURE_TTS_SLACK,
            found: None,
        };
    }

    // Success lands in the back half of the window, modeling the lead time
    // between locating an item and handing it over.
    let earliest = (duration / 2).max(1);
    let tts = if earliest == duration {
        duration
    } else {
        rng.gen_range(earliest..=duration)
    };

    let condition = rng.gen_range(band.min_condition..band.max_condition);
    let wobble: f64 = rng.gen_range(0.9..=1.1);
    let price = ((base_price as f64)
        * band.price_multiplier
        * (condition as f64 / band.max_condition as f64)
        * wobble)
        .floor() as i64;

    let mut configs = BTreeMap::new();
    for (&config, &option) in requested_configs {
        if rng.gen::<f64>() < tier.config_match_chance {
            configs.insert(config, option);
        }
    }

    ResolvedOutcome {
        cost,
        duration_hours: duration,
        ttl: duration,
        tts,
        found: Some(FoundItem {
            condition,
            price,
            configs,
        }),
    }
}
