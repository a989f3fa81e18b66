//! Rule engine: typed condition evaluator + pluggable action executor.
//!
//! Rules are read-mostly administrative configuration. The current catalog
//! is published as an immutable snapshot behind an atomic pointer swap
//! (`arc_swap::ArcSwap`) so readers never observe a torn revision while a
//! writer republishes a new one.

mod expr;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::domain::{Action, Combinator, Condition, Operand, Operator, Rule};

pub use expr::{ExprError, Token};

/// Per-request mutable scratch the rule engine reads from and writes to.
/// Not durable until the decision commits.
#[derive(Debug, Clone, Default)]
pub struct WorkingRecord {
    fields: HashMap<String, Operand>,
}

impl WorkingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: &str, value: Operand) {
        self.fields.insert(path.to_string(), value);
    }

    /// Dot-notation field lookup. Missing fields coerce to `Operand::Null`.
    pub fn get(&self, path: &str) -> Operand {
        self.fields.get(path).cloned().unwrap_or(Operand::Null)
    }
}

fn operand_to_f64(op: &Operand) -> Option<f64> {
    match op {
        Operand::Number(n) => Some(*n),
        _ => None,
    }
}

fn operand_to_str(op: &Operand) -> Option<String> {
    match op {
        Operand::Text(s) => Some(s.clone()),
        _ => None,
    }
}

/// Evaluates a single condition against the working record. Comparisons
/// involving null yield false, except `isNull`/`isNotNull`.
pub fn evaluate_condition(condition: &Condition, record: &WorkingRecord) -> bool {
    let field = record.get(&condition.field_path);

    match condition.operator {
        Operator::IsNull => matches!(field, Operand::Null),
        Operator::IsNotNull => !matches!(field, Operand::Null),
        _ if matches!(field, Operand::Null) => false,
        Operator::Equals => operands_eq(&field, &condition.operand),
        Operator::NotEquals => !operands_eq(&field, &condition.operand),
        Operator::LessThan => match (operand_to_f64(&field), operand_to_f64(&condition.operand)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        Operator::LessEqual => match (operand_to_f64(&field), operand_to_f64(&condition.operand)) {
            (Some(a), Some(b)) => a <= b,
            _ => false,
        },
        Operator::GreaterThan => match (operand_to_f64(&field), operand_to_f64(&condition.operand)) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        Operator::GreaterEqual => match (operand_to_f64(&field), operand_to_f64(&condition.operand)) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        },
        Operator::Contains => match (operand_to_str(&field), operand_to_str(&condition.operand)) {
            (Some(a), Some(b)) => a.contains(&b),
            _ => false,
        },
        Operator::StartsWith => match (operand_to_str(&field), operand_to_str(&condition.operand)) {
            (Some(a), Some(b)) => a.starts_with(&b),
            _ => false,
        },
        Operator::EndsWith => match (operand_to_str(&field), operand_to_str(&condition.operand)) {
            (Some(a), Some(b)) => a.ends_with(&b),
            _ => false,
        },
        Operator::Matches => match (operand_to_str(&field), operand_to_str(&condition.operand)) {
            (Some(a), Some(pattern)) => simple_glob_match(&pattern, &a),
            _ => false,
        },
        Operator::In => match &condition.operand {
            Operand::List(items) => items.iter().any(|item| operands_eq(&field, item)),
            _ => false,
        },
        Operator::NotIn => match &condition.operand {
            Operand::List(items) => !items.iter().any(|item| operands_eq(&field, item)),
            _ => true,
        },
        Operator::Between => match (&condition.operand, operand_to_f64(&field)) {
            (Operand::Range(lo, hi), Some(value)) => value >= *lo && value <= *hi,
            _ => false,
        },
    }
}

fn operands_eq(a: &Operand, b: &Operand) -> bool {
    match (a, b) {
        (Operand::Number(x), Operand::Number(y)) => (x - y).abs() < f64::EPSILON,
        (Operand::Text(x), Operand::Text(y)) => x == y,
        (Operand::Bool(x), Operand::Bool(y)) => x == y,
        (Operand::Null, Operand::Null) => true,
        _ => false,
    }
}

/// A fixed, bounded-execution substitute for a real regex engine: `*`
/// wildcards only, no catastrophic backtracking.
fn simple_glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub fired: bool,
    pub errored: bool,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub outcomes: Vec<RuleOutcome>,
    pub budget_exceeded: bool,
}

impl EvaluationReport {
    pub fn block_requested(&self) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.fired)
            .flat_map(|o| o.actions.iter())
            .any(|a| matches!(a, Action::BlockTransaction))
    }

    pub fn require_approval_requested(&self) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.fired)
            .flat_map(|o| o.actions.iter())
            .any(|a| matches!(a, Action::RequireApproval))
    }
}

/// Read-mostly, atomically-swapped rule catalog.
pub struct RuleCatalog {
    current: ArcSwap<Vec<Rule>>,
}

impl RuleCatalog {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { current: ArcSwap::new(Arc::new(rules)) }
    }

    pub fn publish(&self, rules: Vec<Rule>) {
        self.current.store(Arc::new(rules));
    }

    pub fn snapshot(&self) -> Arc<Vec<Rule>> {
        self.current.load_full()
    }
}

/// The catalog entry a real deployment's externally-managed rules would
/// carry to cover lone-indicator structuring: `suspicious_activity`'s 2-of-N
/// threshold alone never flags a single `potential_structuring` hit, so
/// without this rule a $9,500 transfer with no other indicator resolves
/// only to whatever the risk score's band assigns it. Keyed directly on the
/// `structuring_flag` the caller sets from `compliance::suspicious_activity`
/// before evaluation, independent of the score band and of
/// `compliance::compliance_floor`'s REVIEW-level floor.
pub fn structuring_block_rule() -> Rule {
    Rule {
        id: "seeded-structuring-block".to_string(),
        revision_nonce: 1,
        category: "fraud".to_string(),
        priority: 1000,
        name: "structuring_indicator_block".to_string(),
        enabled: true,
        conditions: vec![Condition {
            field_path: "structuring_flag".to_string(),
            operator: Operator::Equals,
            operand: Operand::Bool(true),
        }],
        combinator: Combinator::And,
        custom_expression: None,
        actions: vec![Action::BlockTransaction],
        final_rule: true,
    }
}

/// Evaluates all enabled rules in `category` against `record`, mutating it
/// as pipeline-style `set-field`/`update-status` actions fire. When
/// `side_effects` is false (rule-test mode) no actions actually execute;
/// the engine still reports which ones would have fired.
pub fn evaluate(
    catalog: &RuleCatalog,
    category: &str,
    record: &mut WorkingRecord,
    side_effects: bool,
    budget: Duration,
) -> EvaluationReport {
    let started = Instant::now();
    let rules = catalog.snapshot();

    let mut applicable: Vec<&Rule> = rules.iter().filter(|r| r.enabled && r.category == category).collect();
    // Descending priority, then ascending name.
    applicable.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));

    let mut report = EvaluationReport::default();

    for rule in applicable {
        if started.elapsed() > budget {
            report.budget_exceeded = true;
            break;
        }

        let outcome = evaluate_rule(rule, record, side_effects);
        let should_stop = rule.final_rule && outcome.fired;
        report.outcomes.push(outcome);
        if should_stop {
            break;
        }
    }

    report
}

fn evaluate_rule(rule: &Rule, record: &mut WorkingRecord, side_effects: bool) -> RuleOutcome {
    let condition_results: Vec<bool> = rule.conditions.iter().map(|c| evaluate_condition(c, record)).collect();

    let combined = match rule.combinator {
        Combinator::And => condition_results.iter().all(|r| *r),
        Combinator::Or => condition_results.iter().any(|r| *r),
        Combinator::Custom => match &rule.custom_expression {
            Some(expression) => match expr::evaluate(expression, &condition_results) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(rule = %rule.id, error = %err, "rule custom expression failed to evaluate");
                    return RuleOutcome { rule_id: rule.id.clone(), fired: false, errored: true, actions: vec![] };
                }
            },
            None => false,
        },
    };

    if !combined {
        return RuleOutcome { rule_id: rule.id.clone(), fired: false, errored: false, actions: vec![] };
    }

    if !side_effects {
        return RuleOutcome { rule_id: rule.id.clone(), fired: true, errored: false, actions: rule.actions.clone() };
    }

    let mut applied_set_fields: Vec<(String, Operand)> = Vec::new();
    for action in &rule.actions {
        match execute_action(action, record) {
            Ok(Some((field, previous))) => applied_set_fields.push((field, previous)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(rule = %rule.id, action = ?action, error = %err, "rule action failed");
                if action.is_critical() {
                    for (field, previous) in applied_set_fields.into_iter().rev() {
                        record.set(&field, previous);
                    }
                    return RuleOutcome { rule_id: rule.id.clone(), fired: true, errored: true, actions: vec![] };
                }
            }
        }
    }

    RuleOutcome { rule_id: rule.id.clone(), fired: true, errored: false, actions: rule.actions.clone() }
}

/// Executes one action against the working record. Returns the prior value
/// of a mutated field (for rollback) when the action sets one.
fn execute_action(action: &Action, record: &mut WorkingRecord) -> anyhow::Result<Option<(String, Operand)>> {
    match action {
        Action::SetField { field, value } => {
            let previous = record.get(field);
            record.set(field, value.clone());
            Ok(Some((field.clone(), previous)))
        }
        Action::Calculate { field, expression } => {
            let value = expr::evaluate_arithmetic(expression, record)?;
            let previous = record.get(field);
            record.set(field, Operand::Number(value));
            Ok(Some((field.clone(), previous)))
        }
        Action::UpdateStatus { status } => {
            let previous = record.get("status");
            record.set("status", Operand::Text(status.clone()));
            Ok(Some(("status".to_string(), previous)))
        }
        Action::LogEvent { message } => {
            tracing::info!(message, "rule log-event action");
            Ok(None)
        }
        Action::BlockTransaction | Action::RequireApproval | Action::SendNotification { .. } | Action::TriggerWorkflow { .. } => {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, priority: i32, name: &str, conditions: Vec<Condition>, actions: Vec<Action>) -> Rule {
        Rule {
            id: id.to_string(),
            revision_nonce: 1,
            category: "fraud".to_string(),
            priority,
            name: name.to_string(),
            enabled: true,
            conditions,
            combinator: Combinator::And,
            custom_expression: None,
            actions,
            final_rule: false,
        }
    }

    #[test]
    fn fires_on_matching_condition() {
        let mut record = WorkingRecord::new();
        record.set("amount", Operand::Number(500.0));
        let r = rule(
            "r1",
            10,
            "amt",
            vec![Condition { field_path: "amount".into(), operator: Operator::GreaterThan, operand: Operand::Number(100.0) }],
            vec![Action::LogEvent { message: "hit".into() }],
        );
        let catalog = RuleCatalog::new(vec![r]);
        let report = evaluate(&catalog, "fraud", &mut record, true, Duration::from_millis(50));
        assert!(report.outcomes[0].fired);
    }

    #[test]
    fn higher_priority_evaluates_first_and_final_stops() {
        let mut record = WorkingRecord::new();
        let high = Rule { final_rule: true, ..rule("high", 100, "a", vec![], vec![]) };
        let low = rule("low", 1, "b", vec![], vec![]);
        let catalog = RuleCatalog::new(vec![low, high]);
        let report = evaluate(&catalog, "fraud", &mut record, true, Duration::from_millis(50));
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].rule_id, "high");
    }

    #[test]
    fn block_rule_is_detected() {
        let mut record = WorkingRecord::new();
        let r = rule("block", 1, "b", vec![], vec![Action::BlockTransaction]);
        let catalog = RuleCatalog::new(vec![r]);
        let report = evaluate(&catalog, "fraud", &mut record, false, Duration::from_millis(50));
        assert!(report.block_requested());
    }

    /// A $9,500 transfer with three recent transactions and a risk score of
    /// 0.72 trips exactly one suspicious-activity indicator (structuring);
    /// `compliance::suspicious_activity`'s 2-of-N threshold alone leaves it
    /// at the 0.72 score band's STEP_UP. The seeded structuring rule is
    /// what escalates it to BLOCK.
    #[test]
    fn seeded_structuring_rule_blocks_lone_indicator_that_compliance_floor_alone_would_not() {
        use crate::compliance::{suspicious_activity, SuspiciousActivityContext};
        use crate::config::{ComplianceConfig, RiskConfig};
        use crate::decision::decide;
        use crate::domain::{Currency, DecisionAction, Money};

        let compliance_config = ComplianceConfig::default();
        let amount = Money::new(950_000, Currency::USD);
        let context = SuspiciousActivityContext { recent_count: 3, unusual_geography: false };
        let suspicious = suspicious_activity(amount, &compliance_config, &context);
        assert_eq!(suspicious.indicators, vec!["potential_structuring"]);
        assert!(!suspicious.flagged, "a lone indicator should not itself trip the 2-of-N compliance floor");

        let mut record = WorkingRecord::new();
        record.set("risk_score", Operand::Number(0.72));
        record.set("structuring_flag", Operand::Bool(suspicious.indicators.contains(&"potential_structuring")));

        let catalog = RuleCatalog::new(vec![structuring_block_rule()]);
        let report = evaluate(&catalog, "fraud", &mut record, true, Duration::from_millis(50));
        assert!(report.block_requested());

        let (_level, action) = decide(0.72, &RiskConfig::default(), &report, None);
        assert_eq!(action, DecisionAction::Block);
    }
}
