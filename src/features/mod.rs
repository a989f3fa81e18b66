//! Feature extractor: pure function from a transaction plus
//! historical context views to a schema-versioned [`FeatureVector`].
//!
//! Missing source values produce the feature's declared default rather
//! than an error — the historical/device/location views are collaborator
//! data that may legitimately be incomplete for a new actor or device.

use serde::Deserialize;

use crate::domain::{Channel, FeatureVector, Transaction};

pub const SCHEMA_VERSION: u32 = 1;

/// Upstream view of an actor's recent transaction history. Values are
/// already normalized by the collaborator (e.g. `customer_tenure_months`
/// is months, not days).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActorHistoryView {
    pub previous_transaction_count_24h: Option<f64>,
    pub previous_transaction_amount_24h: Option<f64>,
    pub account_age_days: Option<f64>,
    pub customer_tenure_months: Option<f64>,
    pub velocity_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceView {
    pub is_known_device: Option<bool>,
    pub time_since_last_transaction_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationView {
    pub is_unusual_geography: Option<bool>,
    pub is_new_location: Option<bool>,
}

fn channel_code(channel: Channel) -> f64 {
    match channel {
        Channel::Online => 0.0,
        Channel::CardPresent => 1.0,
        Channel::Ach => 2.0,
        Channel::Wire => 3.0,
        Channel::Sepa => 4.0,
        Channel::Internal => 5.0,
    }
}

pub fn extract(
    transaction: &Transaction,
    history: &ActorHistoryView,
    device: &DeviceView,
    location: &LocationView,
) -> FeatureVector {
    let features = vec![
        ("amount".to_string(), transaction.amount.major_units()),
        ("channel".to_string(), channel_code(transaction.channel)),
        ("card_present".to_string(), if transaction.channel == Channel::CardPresent { 1.0 } else { 0.0 }),
        ("previous_transaction_count_24h".to_string(), history.previous_transaction_count_24h.unwrap_or(0.0)),
        ("previous_transaction_amount_24h".to_string(), history.previous_transaction_amount_24h.unwrap_or(0.0)),
        ("account_age_days".to_string(), history.account_age_days.unwrap_or(0.0)),
        ("customer_tenure_months".to_string(), history.customer_tenure_months.unwrap_or(0.0)),
        ("velocity_score".to_string(), history.velocity_score.unwrap_or(0.0).clamp(0.0, 1.0)),
        ("is_known_device".to_string(), bool_to_f64(device.is_known_device, 0.0)),
        (
            "time_since_last_transaction_secs".to_string(),
            device.time_since_last_transaction_secs.unwrap_or(86_400.0),
        ),
        ("is_unusual_geography".to_string(), bool_to_f64(location.is_unusual_geography, 0.0)),
        ("is_new_location".to_string(), bool_to_f64(location.is_new_location, 0.0)),
    ];

    FeatureVector {
        transaction_fingerprint: transaction.fingerprint.clone(),
        schema_version: SCHEMA_VERSION,
        features,
    }
}

fn bool_to_f64(value: Option<bool>, default: f64) -> f64 {
    value.map(|b| if b { 1.0 } else { 0.0 }).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockReading;
    use crate::domain::{Currency, Money};
    use chrono::Utc;

    fn sample_transaction() -> Transaction {
        Transaction {
            fingerprint: "fp-1".to_string(),
            actor_id: "actor-1".to_string(),
            counterparty_id: "merchant-1".to_string(),
            amount: Money::new(15_000, Currency::USD),
            timestamp: ClockReading { wall: Utc::now(), monotonic_nanos: 0 },
            channel: Channel::Online,
            merchant_category: None,
            device_fingerprint: None,
            network_origin: None,
            geo: None,
        }
    }

    #[test]
    fn missing_history_falls_back_to_declared_defaults() {
        let vector = extract(&sample_transaction(), &ActorHistoryView::default(), &DeviceView::default(), &LocationView::default());
        assert_eq!(vector.schema_version, SCHEMA_VERSION);
        assert_eq!(vector.get("previous_transaction_count_24h"), Some(0.0));
        assert_eq!(vector.get("time_since_last_transaction_secs"), Some(86_400.0));
    }

    #[test]
    fn amount_feature_uses_major_units() {
        let vector = extract(&sample_transaction(), &ActorHistoryView::default(), &DeviceView::default(), &LocationView::default());
        assert_eq!(vector.get("amount"), Some(150.0));
    }
}
