//! Compliance screening hooks: three synchronous checks invoked
//! from the decision pipeline. These are pure decisions — durable
//! record-keeping is the downstream collaborator's responsibility.

use serde::Deserialize;

use crate::config::ComplianceConfig;
use crate::domain::{Currency, DecisionAction, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaRequirement {
    Required,
    Exempt,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ScaContext {
    pub trusted_beneficiary: bool,
    pub corporate_payment: bool,
}

/// PSD2-style strong customer authentication requirement.
pub fn sca_requirement(amount: Money, config: &ComplianceConfig, context: ScaContext) -> ScaRequirement {
    let low_value = amount.currency == Currency::EUR && amount.minor_units <= config.sca_low_value_eur_minor;
    if low_value || context.trusted_beneficiary || context.corporate_payment {
        ScaRequirement::Exempt
    } else {
        ScaRequirement::Required
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuspiciousActivityContext {
    pub recent_count: u32,
    pub unusual_geography: bool,
}

#[derive(Debug, Clone)]
pub struct SuspiciousActivityResult {
    pub flagged: bool,
    pub indicators: Vec<&'static str>,
}

/// FinCEN-style suspicious-activity detection: flags when at least two of
/// the named indicators hold.
pub fn suspicious_activity(amount: Money, config: &ComplianceConfig, context: &SuspiciousActivityContext) -> SuspiciousActivityResult {
    let mut indicators = Vec::new();

    if amount.minor_units >= config.ctr_threshold_usd_minor {
        indicators.push("amount_at_or_above_10k");
    }
    if context.recent_count > 20 {
        indicators.push("recent_transaction_count_above_20");
    }
    if amount.minor_units >= config.structuring_band_low_usd_minor && amount.minor_units < config.structuring_band_high_usd_minor {
        indicators.push("potential_structuring");
    }
    if context.unusual_geography {
        indicators.push("unusual_geography");
    }

    SuspiciousActivityResult { flagged: indicators.len() >= 2, indicators }
}

/// Currency transaction reporting threshold check. Does not change the
/// decisioned action; only records a reportable event.
pub fn ctr_reportable(amount: Money, config: &ComplianceConfig) -> bool {
    amount.currency == Currency::USD && amount.minor_units >= config.ctr_threshold_usd_minor
}

/// Minimum action floor implied by compliance checks, fed into the
/// decision policy's tie-break.
pub fn compliance_floor(sca: ScaRequirement, suspicious: &SuspiciousActivityResult) -> Option<DecisionAction> {
    let mut floor = None;
    if sca == ScaRequirement::Required {
        floor = Some(DecisionAction::StepUp);
    }
    if suspicious.flagged {
        floor = Some(match floor {
            Some(existing) => existing.strongest(DecisionAction::Review),
            None => DecisionAction::Review,
        });
    }
    floor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ComplianceConfig {
        ComplianceConfig::default()
    }

    #[test]
    fn low_value_eur_is_exempt() {
        let amount = Money::new(3_000, Currency::EUR);
        assert_eq!(sca_requirement(amount, &config(), ScaContext::default()), ScaRequirement::Exempt);
    }

    #[test]
    fn high_value_requires_sca() {
        let amount = Money::new(10_000, Currency::EUR);
        assert_eq!(sca_requirement(amount, &config(), ScaContext::default()), ScaRequirement::Required);
    }

    #[test]
    fn flags_structuring_plus_high_count() {
        let amount = Money::new(950_000, Currency::USD);
        let context = SuspiciousActivityContext { recent_count: 25, unusual_geography: false };
        let result = suspicious_activity(amount, &config(), &context);
        assert!(result.flagged);
        assert!(result.indicators.contains(&"potential_structuring"));
    }

    #[test]
    fn ctr_threshold_requires_usd_and_amount() {
        let amount = Money::new(1_000_000, Currency::USD);
        assert!(ctr_reportable(amount, &config()));
        let eur_amount = Money::new(1_000_000, Currency::EUR);
        assert!(!ctr_reportable(eur_amount, &config()));
    }
}
