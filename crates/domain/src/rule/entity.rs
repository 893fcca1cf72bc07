use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::{catalog, sql};

/// Lifecycle status of a rule.
///
/// `created → starting → running ⇄ stopping → stopped`; `failed` is reachable
/// from `starting` or `running` and permits another Start once the user has
/// fixed the rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    #[default]
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl RuleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown rule status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A user-declared alert rule plus its engine artifact references.
///
/// Artifact names all derive from the sanitized rule id so that teardown
/// stays possible even if the persisted record is lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_query: Option<String>,
    pub status: RuleStatus,
    pub severity: Severity,
    #[serde(default)]
    pub throttle_minutes: i32,
    #[serde(default)]
    pub entity_id_columns: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Tri-state on purpose: `None` means "not set" and must survive
    /// round-trips so that update-with-omitted-flag stays "unchanged".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated_alert_acks_stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_acks_stream_name: Option<String>,
    pub result_stream: String,
    pub view_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_view_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Rule {
    /// Rule id with `-` replaced by `_`, valid in bare engine identifiers.
    pub fn sanitized_id(&self) -> String {
        sql::sanitize_name(&self.id)
    }

    pub fn mv_name(&self) -> String {
        format!("rule_{}_mv", self.sanitized_id())
    }

    pub fn resolve_mv_name(&self) -> String {
        format!("rule_{}_resolve_mv", self.sanitized_id())
    }

    pub fn dedicated_acks_stream_name(&self) -> String {
        format!("rule_{}_alert_acks", self.sanitized_id())
    }

    /// Target acknowledgment stream: explicit override, then the dedicated
    /// per-rule stream, then the shared global stream.
    pub fn acks_stream(&self) -> String {
        if let Some(name) = &self.alert_acks_stream_name {
            if !name.is_empty() {
                return name.clone();
            }
        }
        if self.dedicated_alert_acks_stream == Some(true) {
            return self.dedicated_acks_stream_name();
        }
        catalog::ALERT_ACKS_STREAM.to_string()
    }

    /// Whether this rule writes to a stream it owns (and must drop on delete).
    pub fn uses_dedicated_acks_stream(&self) -> bool {
        self.acks_stream() != catalog::ALERT_ACKS_STREAM
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("rule name must not be empty".to_string());
        }
        if self.query.trim().is_empty() {
            return Err("rule query must not be empty".to_string());
        }
        Ok(())
    }

    /// Apply a field-level patch. Omitted fields keep their stored value;
    /// this is what makes `dedicated_alert_acks_stream` "unchanged" when the
    /// update body leaves it out.
    pub fn apply_patch(&mut self, patch: RulePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(query) = patch.query {
            self.query = query;
        }
        if let Some(resolve_query) = patch.resolve_query {
            self.resolve_query = if resolve_query.is_empty() {
                None
            } else {
                Some(resolve_query)
            };
            self.resolve_view_name = self
                .resolve_query
                .as_ref()
                .map(|_| format!("rule_{}_resolve_view", self.sanitized_id()));
        }
        if let Some(severity) = patch.severity {
            self.severity = severity;
        }
        if let Some(minutes) = patch.throttle_minutes {
            self.throttle_minutes = minutes;
        }
        if let Some(columns) = patch.entity_id_columns {
            self.entity_id_columns = columns;
        }
        if let Some(dedicated) = patch.dedicated_alert_acks_stream {
            self.dedicated_alert_acks_stream = Some(dedicated);
        }
        if let Some(name) = patch.alert_acks_stream_name {
            self.alert_acks_stream_name = if name.is_empty() { None } else { Some(name) };
        }
    }
}

/// Parameters for creating a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub query: String,
    #[serde(default)]
    pub resolve_query: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub throttle_minutes: i32,
    #[serde(default)]
    pub entity_id_columns: String,
    #[serde(default)]
    pub dedicated_alert_acks_stream: Option<bool>,
    #[serde(default)]
    pub alert_acks_stream_name: Option<String>,
}

/// Field-level patch for updating a rule. Every field is optional; absent
/// fields leave the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub resolve_query: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub throttle_minutes: Option<i32>,
    #[serde(default)]
    pub entity_id_columns: Option<String>,
    #[serde(default)]
    pub dedicated_alert_acks_stream: Option<bool>,
    #[serde(default)]
    pub alert_acks_stream_name: Option<String>,
}
