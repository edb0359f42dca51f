use std::collections::HashMap;

use bevy::prelude::*;
use serde::Deserialize;
use thiserror::Error;

/// Built-in service tier and quality band table, embedded so a headless
/// deployment needs no data directory. Hosts may replace it at startup via
/// [`TierCatalog::load_catalog_from_str`].
pub const BUILTIN_SEARCH_TIER_CATALOG: &str = include_str!("data/search_tiers.json");

/// Floor applied to the combined success probability of any tier/band pair.
pub const MIN_SUCCESS_CHANCE: f64 = 0.05;
/// Ceiling applied to the combined success probability of any tier/band pair.
pub const MAX_SUCCESS_CHANCE: f64 = 0.95;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse search tier catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate search tier id '{id}'")]
    DuplicateTier { id: String },
    #[error("duplicate quality band id '{id}'")]
    DuplicateBand { id: String },
    #[error("search tier '{id}' has min duration above max duration")]
    InvertedDuration { id: String },
    #[error("search tier '{id}' has a non-positive minimum duration")]
    NonPositiveDuration { id: String },
    #[error("quality band '{id}' has an empty condition range")]
    EmptyConditionRange { id: String },
    #[error("unknown search tier '{id}'")]
    UnknownTier { id: String },
    #[error("unknown quality band '{id}'")]
    UnknownBand { id: String },
}

/// A named service level with fixed cost/duration/probability parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SearchTierDef {
    pub id: String,
    pub name: String,
    pub fee_fraction: f64,
    pub min_duration_hours: i64,
    pub max_duration_hours: i64,
    pub base_success: f64,
    pub config_match_chance: f64,
}

/// A named condition bracket affecting success difficulty, generated
/// condition, and price. The condition range is half-open: `[min, max)`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QualityBandDef {
    pub id: String,
    pub name: String,
    pub min_condition: f32,
    pub max_condition: f32,
    pub price_multiplier: f64,
    pub success_modifier: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    tiers: Vec<SearchTierDef>,
    #[serde(default)]
    bands: Vec<QualityBandDef>,
}

/// Static lookup table for tiers and bands, loaded once at startup.
#[derive(Resource, Debug, Clone, Default)]
pub struct TierCatalog {
    tiers: HashMap<String, SearchTierDef>,
    bands: HashMap<String, QualityBandDef>,
}

impl TierCatalog {
    /// Parse and register every tier/band from a JSON catalog document.
    pub fn load_catalog_from_str(&mut self, catalog: &str) -> Result<usize, CatalogError> {
        let file: CatalogFile = serde_json::from_str(catalog)?;
        let mut added = 0;
        for tier in file.tiers {
            if tier.min_duration_hours < 1 {
                return Err(CatalogError::NonPositiveDuration { id: tier.id });
            }
            if tier.min_duration_hours > tier.max_duration_hours {
                return Err(CatalogError::InvertedDuration { id: tier.id });
            }
            if self.tiers.contains_key(&tier.id) {
                return Err(CatalogError::DuplicateTier { id: tier.id });
            }
            self.tiers.insert(tier.id.clone(), tier);
            added += 1;
        }
        for band in file.bands {
            if band.min_condition >= band.max_condition {
                return Err(CatalogError::EmptyConditionRange { id: band.id });
            }
            if self.bands.contains_key(&band.id) {
                return Err(CatalogError::DuplicateBand { id: band.id });
            }
            self.bands.insert(band.id.clone(), band);
            added += 1;
        }
        Ok(added)
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        catalog
            .load_catalog_from_str(BUILTIN_SEARCH_TIER_CATALOG)
            .expect("builtin search tier catalog must parse");
        catalog
    }

    pub fn tier(&self, id: &str) -> Result<&SearchTierDef, CatalogError> {
        self.tiers.get(id).ok_or_else(|| CatalogError::UnknownTier {
            id: id.to_owned(),
        })
    }

    pub fn band(&self, id: &str) -> Result<&QualityBandDef, CatalogError> {
        self.bands.get(id).ok_or_else(|| CatalogError::UnknownBand {
            id: id.to_owned(),
        })
    }

    pub fn tiers(&self) -> impl Iterator<Item = &SearchTierDef> {
        self.tiers.values()
    }

    pub fn bands(&self) -> impl Iterator<Item = &QualityBandDef> {
        self.bands.values()
    }
}

/// Combined success probability of a tier/band pair, clamped to the
/// catalog-wide bounds after the additive modifier is applied.
pub fn effective_success(tier: &SearchTierDef, band: &QualityBandDef) -> f64 {
    (tier.base_success + band.success_modifier).clamp(MIN_SUCCESS_CHANCE, MAX_SUCCESS_CHANCE)
}
