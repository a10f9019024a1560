use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One log document returned from a search, `_source` merged with
/// `_index` and `_id`.
pub type LogDocument = serde_json::Map<String, serde_json::Value>;

/// One predicate of a rule's condition list.
///
/// `value` is deliberately untyped: the config surface stores raw JSON and
/// the query builder validates the operator/value combination when the rule
/// is executed. Both `operator` and the legacy `op` spelling are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCondition {
    pub field: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<String>,
}

impl QueryCondition {
    /// The operator, with the legacy `op` spelling as fallback.
    pub fn effective_operator(&self) -> Option<&str> {
        self.operator
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.op.as_deref().filter(|s| !s.is_empty()))
    }

    /// The combining logic, defaulting to `or`.
    pub fn effective_logic(&self) -> &str {
        match self.logic.as_deref() {
            Some("and") => "and",
            _ => "or",
        }
    }
}

/// Delivery status of a persisted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Sent,
    Failed,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Sent => write!(f, "sent"),
            AlertStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(AlertStatus::Sent),
            "failed" => Ok(AlertStatus::Failed),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Retention-sweep configuration, stored as one JSON blob under the
/// `retention_config` system-config key.
///
/// The three `last_execution_*` fields are owned by the cleanup worker;
/// config writes must carry them over unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: bool,
    /// Local-time hour of the daily sweep (0-23).
    pub hour: u32,
    /// Local-time minute of the daily sweep (0-59).
    pub minute: u32,
    pub retention_days: u32,
    #[serde(default = "default_execution_status")]
    pub last_execution_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_execution_result: String,
}

fn default_execution_status() -> String {
    "never".to_string()
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 3,
            minute: 0,
            retention_days: 90,
            last_execution_status: default_execution_status(),
            last_execution_time: None,
            last_execution_result: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_falls_back_to_legacy_op() {
        let cond: QueryCondition =
            serde_json::from_str(r#"{"field":"status","op":">=","value":500}"#).unwrap();
        assert_eq!(cond.effective_operator(), Some(">="));

        let cond: QueryCondition =
            serde_json::from_str(r#"{"field":"status","operator":"=","op":">","value":1}"#)
                .unwrap();
        assert_eq!(cond.effective_operator(), Some("="));
    }

    #[test]
    fn logic_defaults_to_or() {
        let cond: QueryCondition =
            serde_json::from_str(r#"{"field":"a","value":1}"#).unwrap();
        assert_eq!(cond.effective_logic(), "or");

        let cond: QueryCondition =
            serde_json::from_str(r#"{"field":"a","value":1,"logic":"and"}"#).unwrap();
        assert_eq!(cond.effective_logic(), "and");

        let cond: QueryCondition =
            serde_json::from_str(r#"{"field":"a","value":1,"logic":"xor"}"#).unwrap();
        assert_eq!(cond.effective_logic(), "or");
    }

    #[test]
    fn retention_config_deserializes_partial_json() {
        let config: RetentionConfig = serde_json::from_str(
            r#"{"enabled":true,"hour":3,"minute":0,"retention_days":7}"#,
        )
        .unwrap();
        assert_eq!(config.last_execution_status, "never");
        assert!(config.last_execution_time.is_none());
        assert!(config.last_execution_result.is_empty());
    }

    #[test]
    fn alert_status_roundtrip() {
        assert_eq!("sent".parse::<AlertStatus>().unwrap(), AlertStatus::Sent);
        assert_eq!(AlertStatus::Failed.to_string(), "failed");
        assert!("bogus".parse::<AlertStatus>().is_err());
    }
}
