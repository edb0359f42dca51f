//! Versionless key-value attribute form used for durable persistence.
//!
//! Each record is one flat list of `(key, value)` string pairs. Keys other
//! than the identity key are optional and default when absent; an entry
//! missing its identity key is corrupt and should be skipped by the loader
//! rather than failing the whole load.

use std::collections::HashMap;

use thiserror::Error;

use crate::{ListingState, PremiumGateStateRecord, SearchRecordState, SearchStatus};

/// One persisted entry: ordered `(key, value)` pairs.
pub type AttributeList = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum AttributeError {
    #[error("entry is missing its identity attribute '{key}'")]
    MissingIdentity { key: &'static str },
    #[error("attribute '{key}' holds an unparseable value '{value}'")]
    Malformed { key: String, value: String },
}

fn index(entry: &[(String, String)]) -> HashMap<&str, &str> {
    entry
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect()
}

fn parse_field<T: std::str::FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    default: T,
) -> Result<T, AttributeError> {
    match fields.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| AttributeError::Malformed {
            key: key.to_owned(),
            value: (*raw).to_owned(),
        }),
    }
}

fn text_field(fields: &HashMap<&str, &str>, key: &str) -> String {
    fields.get(key).map(|raw| (*raw).to_owned()).unwrap_or_default()
}

fn encode_configs(configs: &[(u16, u8)]) -> String {
    configs
        .iter()
        .map(|(key, option)| format!("{}:{}", key, option))
        .collect::<Vec<_>>()
        .join(";")
}

fn decode_configs(raw: &str, key: &str) -> Result<Vec<(u16, u8)>, AttributeError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let mut configs = Vec::new();
    for pair in raw.split(';') {
        let malformed = || AttributeError::Malformed {
            key: key.to_owned(),
            value: raw.to_owned(),
        };
        let (config, option) = pair.split_once(':').ok_or_else(malformed)?;
        let config = config.parse().map_err(|_| malformed())?;
        let option = option.parse().map_err(|_| malformed())?;
        configs.push((config, option));
    }
    Ok(configs)
}

pub fn search_record_to_attributes(state: &SearchRecordState) -> AttributeList {
    vec![
        ("id".into(), state.id.to_string()),
        ("client".into(), state.client.to_string()),
        ("catalog_key".into(), state.catalog_key.clone()),
        ("display_name".into(), state.display_name.clone()),
        ("base_price".into(), state.base_price.to_string()),
        ("tier".into(), state.tier.clone()),
        ("band".into(), state.band.clone()),
        (
            "requested_configs".into(),
            encode_configs(&state.requested_configs),
        ),
        ("cost".into(), state.cost.to_string()),
        ("ttl".into(), state.ttl.to_string()),
        ("tts".into(), state.tts.to_string()),
        ("status".into(), state.status.as_u8().to_string()),
        ("found_condition".into(), state.found_condition.to_string()),
        ("found_price".into(), state.found_price.to_string()),
        ("found_configs".into(), encode_configs(&state.found_configs)),
        ("created_at".into(), state.created_at.to_string()),
    ]
}

pub fn search_record_from_attributes(
    entry: &[(String, String)],
) -> Result<SearchRecordState, AttributeError> {
    let fields = index(entry);
    let id = fields
        .get("id")
        .ok_or(AttributeError::MissingIdentity { key: "id" })?
        .parse()
        .map_err(|_| AttributeError::Malformed {
            key: "id".into(),
            value: text_field(&fields, "id"),
        })?;

    let status_raw: u8 = parse_field(&fields, "status", 0)?;
    let status = SearchStatus::from_u8(status_raw).ok_or_else(|| AttributeError::Malformed {
        key: "status".into(),
        value: status_raw.to_string(),
    })?;

    Ok(SearchRecordState {
        id,
        client: parse_field(&fields, "client", 0)?,
        catalog_key: text_field(&fields, "catalog_key"),
        display_name: text_field(&fields, "display_name"),
        base_price: parse_field(&fields, "base_price", 0)?,
        tier: text_field(&fields, "tier"),
        band: text_field(&fields, "band"),
        requested_configs: decode_configs(
            &text_field(&fields, "requested_configs"),
            "requested_configs",
        )?,
        cost: parse_field(&fields, "cost", 0)?,
        ttl: parse_field(&fields, "ttl", 0)?,
        tts: parse_field(&fields, "tts", 0)?,
        status,
        found_condition: parse_field(&fields, "found_condition", 0.0)?,
        found_price: parse_field(&fields, "found_price", 0)?,
        found_configs: decode_configs(&text_field(&fields, "found_configs"), "found_configs")?,
        created_at: parse_field(&fields, "created_at", 0)?,
    })
}

pub fn listing_to_attributes(state: &ListingState) -> AttributeList {
    vec![
        ("search_id".into(), state.search_id.to_string()),
        ("client".into(), state.client.to_string()),
        ("catalog_key".into(), state.catalog_key.clone()),
        ("display_name".into(), state.display_name.clone()),
        ("condition".into(), state.condition.to_string()),
        ("price".into(), state.price.to_string()),
        ("configs".into(), encode_configs(&state.configs)),
        ("expires_at".into(), state.expires_at.to_string()),
    ]
}

pub fn listing_from_attributes(
    entry: &[(String, String)],
) -> Result<ListingState, AttributeError> {
    let fields = index(entry);
    let search_id = fields
        .get("search_id")
        .ok_or(AttributeError::MissingIdentity { key: "search_id" })?
        .parse()
        .map_err(|_| AttributeError::Malformed {
            key: "search_id".into(),
            value: text_field(&fields, "search_id"),
        })?;

    Ok(ListingState {
        search_id,
        client: parse_field(&fields, "client", 0)?,
        catalog_key: text_field(&fields, "catalog_key"),
        display_name: text_field(&fields, "display_name"),
        condition: parse_field(&fields, "condition", 0.0)?,
        price: parse_field(&fields, "price", 0)?,
        configs: decode_configs(&text_field(&fields, "configs"), "configs")?,
        expires_at: parse_field(&fields, "expires_at", 0)?,
    })
}

pub fn gate_state_to_attributes(state: &PremiumGateStateRecord) -> AttributeList {
    vec![
        ("client".into(), state.client.to_string()),
        ("discovered".into(), state.discovered.to_string()),
        ("purchased".into(), state.purchased.to_string()),
        ("offer_active".into(), state.offer_active.to_string()),
        ("offer_expires_at".into(), state.offer_expires_at.to_string()),
        ("pity_counter".into(), state.pity_counter.to_string()),
        ("display_score".into(), state.display_score.to_string()),
        ("display_reason".into(), state.display_reason.clone()),
    ]
}

pub fn gate_state_from_attributes(
    entry: &[(String, String)],
) -> Result<PremiumGateStateRecord, AttributeError> {
    let fields = index(entry);
    let client = fields
        .get("client")
        .ok_or(AttributeError::MissingIdentity { key: "client" })?
        .parse()
        .map_err(|_| AttributeError::Malformed {
            key: "client".into(),
            value: text_field(&fields, "client"),
        })?;

    Ok(PremiumGateStateRecord {
        client,
        discovered: parse_field(&fields, "discovered", false)?,
        purchased: parse_field(&fields, "purchased", false)?,
        offer_active: parse_field(&fields, "offer_active", false)?,
        offer_expires_at: parse_field(&fields, "offer_expires_at", 0)?,
        pity_counter: parse_field(&fields, "pity_counter", 0)?,
        display_score: parse_field(&fields, "display_score", 0)?,
        display_reason: text_field(&fields, "display_reason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_record_attribute_round_trip() {
        let state = SearchRecordState {
            id: 41,
            client: 7,
            catalog_key: "wagon_c".into(),
            display_name: "Wagon C".into(),
            base_price: 18_500,
            tier: "premium".into(),
            band: "showroom".into(),
            requested_configs: vec![(1, 0), (4, 2)],
            cost: 1_110,
            ttl: 60,
            tts: 44,
            status: SearchStatus::Active,
            found_condition: 93.25,
            found_price: 22_817,
            found_configs: vec![(4, 2)],
            created_at: 480,
        };
        let entry = search_record_to_attributes(&state);
        let decoded = search_record_from_attributes(&entry).expect("round trip");
        assert_eq!(decoded, state);
    }

    #[test]
    fn failed_record_round_trips_with_zeroed_success_fields() {
        let state = SearchRecordState {
            id: 8,
            client: 2,
            ttl: 24,
            tts: 24 + 1_000,
            status: SearchStatus::Failed,
            ..Default::default()
        };
        let entry = search_record_to_attributes(&state);
        let decoded = search_record_from_attributes(&entry).expect("round trip");
        assert_eq!(decoded, state);
        assert_eq!(decoded.found_price, 0);
        assert!(decoded.found_configs.is_empty());
    }

    #[test]
    fn missing_identity_is_corrupt() {
        let entry = vec![("client".to_string(), "2".to_string())];
        let err = search_record_from_attributes(&entry).expect_err("missing id");
        assert!(matches!(err, AttributeError::MissingIdentity { key: "id" }));
    }

    #[test]
    fn absent_optionals_take_defaults() {
        let entry = vec![("id".to_string(), "19".to_string())];
        let decoded = search_record_from_attributes(&entry).expect("defaults");
        assert_eq!(decoded.id, 19);
        assert_eq!(decoded.status, SearchStatus::Active);
        assert_eq!(decoded.cost, 0);
        assert!(decoded.requested_configs.is_empty());
    }

    #[test]
    fn malformed_value_is_reported_with_its_key() {
        let entry = vec![
            ("id".to_string(), "3".to_string()),
            ("ttl".to_string(), "soon".to_string()),
        ];
        let err = search_record_from_attributes(&entry).expect_err("bad ttl");
        match err {
            AttributeError::Malformed { key, value } => {
                assert_eq!(key, "ttl");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn gate_state_attribute_round_trip() {
        let state = PremiumGateStateRecord {
            client: 11,
            discovered: true,
            purchased: false,
            offer_active: true,
            offer_expires_at: 960,
            pity_counter: 14,
            display_score: 688,
            display_reason: String::new(),
        };
        let entry = gate_state_to_attributes(&state);
        let decoded = gate_state_from_attributes(&entry).expect("round trip");
        assert_eq!(decoded, state);
    }
}
