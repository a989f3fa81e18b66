//! Shared data model for the gateway core.
//!
//! Types here are plain data, not behavior: the domain entities rendered
//! as Rust structs/enums. Components import the shapes they need from this
//! module rather than each declaring their own.

use serde::{Deserialize, Serialize};

use crate::clock::ClockReading;

/// ISO-4217 currency code, closed to the set this platform actually settles.
/// `Currency::Other` carries the raw code for anything else so the type
/// never has to reject an otherwise-valid transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    Other(CurrencyCode),
}

pub type CurrencyCode = [u8; 3];

impl Currency {
    pub fn as_str(&self) -> String {
        match self {
            Currency::USD => "USD".to_string(),
            Currency::EUR => "EUR".to_string(),
            Currency::GBP => "GBP".to_string(),
            Currency::Other(code) => String::from_utf8_lossy(code).to_string(),
        }
    }
}

/// An exact amount of money: minor units (cents) in a given currency.
/// Never represented as a float anywhere in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub minor_units: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(minor_units: i64, currency: Currency) -> Self {
        Self { minor_units, currency }
    }

    /// Major-unit (e.g. dollars) value as `f64`, for threshold comparisons
    /// only — never stored or round-tripped.
    pub fn major_units(&self) -> f64 {
        self.minor_units as f64 / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Online,
    CardPresent,
    Ach,
    Wire,
    Sepa,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    pub city: Option<String>,
}

/// Immutable input to the core, produced by an upstream collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub fingerprint: String,
    pub actor_id: String,
    pub counterparty_id: String,
    pub amount: Money,
    pub timestamp: ClockReading,
    pub channel: Channel,
    pub merchant_category: Option<String>,
    pub device_fingerprint: Option<String>,
    pub network_origin: Option<String>,
    pub geo: Option<GeoLocation>,
}

/// Schema-versioned, ordered set of named numeric features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub transaction_fingerprint: String,
    pub schema_version: u32,
    pub features: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.features.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionAction {
    Allow,
    Review,
    StepUp,
    Block,
}

impl DecisionAction {
    /// BLOCK > STEP_UP > REVIEW > ALLOW tie-break order.
    pub fn severity(&self) -> u8 {
        match self {
            DecisionAction::Allow => 0,
            DecisionAction::Review => 1,
            DecisionAction::StepUp => 2,
            DecisionAction::Block => 3,
        }
    }

    pub fn strongest(self, other: DecisionAction) -> DecisionAction {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub weight: f64,
}

/// Durable output of risk scoring + decisioning for one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub fingerprint: String,
    pub risk_score: f64,
    pub anomaly_component: f64,
    pub supervised_component: f64,
    pub risk_level: RiskLevel,
    pub action: DecisionAction,
    pub explanation: Vec<FeatureContribution>,
    pub model_version: String,
    pub elapsed_ms: u64,
    pub created_at: ClockReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerMode {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    pub name: String,
    pub mode: BreakerMode,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure: Option<ClockReading>,
    pub half_open_probe_count: u32,
}

/// Condition operators over a single dot-notation field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Number(f64),
    Text(String),
    Bool(bool),
    List(Vec<Operand>),
    Range(f64, f64),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field_path: String,
    pub operator: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    And,
    Or,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetField { field: String, value: Operand },
    Calculate { field: String, expression: String },
    BlockTransaction,
    RequireApproval,
    UpdateStatus { status: String },
    LogEvent { message: String },
    SendNotification { channel: String, template: String },
    TriggerWorkflow { workflow: String },
}

impl Action {
    /// Actions whose failure must trigger rollback of prior set-field
    /// mutations in the same rule.
    pub fn is_critical(&self) -> bool {
        matches!(self, Action::BlockTransaction | Action::RequireApproval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub revision_nonce: u64,
    pub category: String,
    pub priority: i32,
    pub name: String,
    pub enabled: bool,
    pub conditions: Vec<Condition>,
    pub combinator: Combinator,
    pub custom_expression: Option<String>,
    pub actions: Vec<Action>,
    pub final_rule: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub actor_id: String,
    pub created_at: ClockReading,
    pub expires_at: ClockReading,
    pub risk_score_at_creation: f64,
    pub methods_satisfied: Vec<String>,
    pub last_activity: ClockReading,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence_no: u64,
    pub event_class: String,
    pub actor_id: String,
    pub subject_id: String,
    pub timestamp: ClockReading,
    pub payload: serde_json::Value,
    pub hash: String,
}
