use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::error::AlertError;
use crate::rule::entity::Severity;

/// State of an acknowledgment row.
///
/// `Silenced` and `Resolved` are reserved; the gateway itself only writes
/// `Active` (throttled MV) and `Acknowledged` (operator or auto-resolver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Active,
    Acknowledged,
    Silenced,
    Resolved,
}

impl AlertState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Silenced => "silenced",
            Self::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "acknowledged" => Ok(Self::Acknowledged),
            "silenced" => Ok(Self::Silenced),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("unknown alert state: {s}")),
        }
    }
}

/// Composite alert identity: `<rule_id>:<entity_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertId {
    pub rule_id: String,
    pub entity_id: String,
}

impl AlertId {
    /// Parse the composite form. The first `:` separates the parts, so
    /// entity ids may themselves contain colons.
    pub fn parse(s: &str) -> Result<Self, AlertError> {
        match s.split_once(':') {
            Some((rule_id, entity_id)) if !rule_id.is_empty() && !entity_id.is_empty() => {
                Ok(Self {
                    rule_id: rule_id.to_string(),
                    entity_id: entity_id.to_string(),
                })
            }
            _ => Err(AlertError::InvalidId(s.to_string())),
        }
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.rule_id, self.entity_id)
    }
}

/// Logical alert: the acknowledgment row projected for display, enriched
/// with rule metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Composite id `<rule_id>:<entity_id>`.
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub triggered_at: DateTime<Utc>,
    /// JSON string describing the alert key and state.
    pub data: String,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_by: String,
}
