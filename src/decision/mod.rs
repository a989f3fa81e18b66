//! Decision policy: maps risk score + policy thresholds + rule
//! outcomes to a terminal action.
//!
//! The score-band table is a total function: every score in `[0,1]` maps
//! to exactly one `(risk_level, action)` pair.

use crate::config::RiskConfig;
use crate::domain::{DecisionAction, RiskLevel};
use crate::rules::EvaluationReport;

pub fn score_to_band(score: f64, thresholds: &RiskConfig) -> (RiskLevel, DecisionAction) {
    if score < thresholds.low_threshold {
        (RiskLevel::Low, DecisionAction::Allow)
    } else if score < thresholds.medium_threshold {
        (RiskLevel::Medium, DecisionAction::Review)
    } else if score < thresholds.high_threshold {
        (RiskLevel::High, DecisionAction::StepUp)
    } else {
        (RiskLevel::Critical, DecisionAction::Block)
    }
}

/// Combines the score band with rule outcomes and any compliance-imposed
/// floor action. BLOCK > STEP_UP > REVIEW > ALLOW tie-break order.
pub fn decide(
    score: f64,
    thresholds: &RiskConfig,
    rule_report: &EvaluationReport,
    compliance_floor: Option<DecisionAction>,
) -> (RiskLevel, DecisionAction) {
    let (level, mut action) = score_to_band(score, thresholds);

    if rule_report.block_requested() {
        action = action.strongest(DecisionAction::Block);
    }
    if rule_report.require_approval_requested() {
        action = action.strongest(DecisionAction::StepUp);
    }
    if let Some(floor) = compliance_floor {
        action = action.strongest(floor);
    }

    (level, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleOutcome;
    use crate::domain::Action;

    fn thresholds() -> RiskConfig {
        RiskConfig::default()
    }

    #[test]
    fn every_score_maps_to_exactly_one_band() {
        for score in [0.0, 0.15, 0.3, 0.45, 0.6, 0.75, 0.8, 0.95, 1.0] {
            let (_, action) = score_to_band(score, &thresholds());
            match action {
                DecisionAction::Allow | DecisionAction::Review | DecisionAction::StepUp | DecisionAction::Block => {}
            }
        }
    }

    #[test]
    fn block_rule_overrides_lower_score_band() {
        let report = EvaluationReport {
            outcomes: vec![RuleOutcome {
                rule_id: "r".to_string(),
                fired: true,
                errored: false,
                actions: vec![Action::BlockTransaction],
            }],
            budget_exceeded: false,
        };
        let (_, action) = decide(0.1, &thresholds(), &report, None);
        assert_eq!(action, DecisionAction::Block);
    }

    #[test]
    fn rule_monotonicity_block_never_weakens_action() {
        let empty_report = EvaluationReport::default();
        let (_, baseline) = decide(0.75, &thresholds(), &empty_report, None);
        let block_report = EvaluationReport {
            outcomes: vec![RuleOutcome { rule_id: "r".into(), fired: true, errored: false, actions: vec![Action::BlockTransaction] }],
            budget_exceeded: false,
        };
        let (_, with_block) = decide(0.75, &thresholds(), &block_report, None);
        assert!(with_block.severity() >= baseline.severity());
    }
}
