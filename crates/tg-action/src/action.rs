// action.rs — ProposedAction: the unit the governor evaluates.
//
// Every side-effecting call an agent wants to make (place an order, run a
// script, fetch a URL) is described as a ProposedAction before it is allowed
// to execute. Parameters are a string-keyed map of typed values so rules can
// address them by name ("amount", "ticker", "script").

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The kind of side effect an action produces.
///
/// Well-known types get their own variant; anything else is carried as
/// `Other` so new tools do not require a code change to be governed.
/// Serializes as the plain snake_case string (e.g. `"place_order"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    PlaceOrder,
    ExecuteCode,
    NetworkFetch,
    ExportData,
    Other(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::PlaceOrder => "place_order",
            ActionType::ExecuteCode => "execute_code",
            ActionType::NetworkFetch => "network_fetch",
            ActionType::ExportData => "export_data",
            ActionType::Other(name) => name,
        }
    }
}

impl From<&str> for ActionType {
    fn from(name: &str) -> Self {
        match name {
            "place_order" => ActionType::PlaceOrder,
            "execute_code" => ActionType::ExecuteCode,
            "network_fetch" => ActionType::NetworkFetch,
            "export_data" => ActionType::ExportData,
            other => ActionType::Other(other.to_string()),
        }
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        ActionType::from(name.as_str())
    }
}

impl From<ActionType> for String {
    fn from(action_type: ActionType) -> Self {
        action_type.as_str().to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed parameter value.
///
/// `#[serde(untagged)]` means the JSON value's own shape picks the variant:
/// `true` → Bool, `12.5` → Number, `"AAPL"` → Text, `[..]` → List.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Numeric view of the value. Text that parses as a number counts,
    /// since agents frequently send amounts as strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Every text leaf of this value, descending into lists.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            ParamValue::Text(s) => vec![s.as_str()],
            ParamValue::List(items) => items.iter().flat_map(|v| v.texts()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// A side-effecting action proposed by an agent, submitted for evaluation.
///
/// The governor and every stage take `&ProposedAction`; once submitted the
/// action is never modified, which keeps its fingerprint stable for the
/// credential scope and the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Unique identifier of this action instance.
    pub action_id: Uuid,
    pub action_type: ActionType,
    /// The tool that will carry out the effect (e.g. "broker", "sandbox").
    pub tool: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// The originating agent session.
    pub session_id: String,
    #[serde(default)]
    pub agent_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl ProposedAction {
    /// Create a new action with a fresh ID. The tool defaults to the
    /// action type's name.
    pub fn new(session_id: impl Into<String>, action_type: impl Into<ActionType>) -> Self {
        let action_type = action_type.into();
        Self {
            action_id: Uuid::new_v4(),
            tool: action_type.as_str().to_string(),
            action_type,
            params: BTreeMap::new(),
            session_id: session_id.into(),
            agent_id: String::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Numeric parameter lookup (see [`ParamValue::as_f64`]).
    pub fn number(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(ParamValue::as_f64)
    }

    /// All text content of the action as `(parameter, text)` pairs.
    pub fn text_fields(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .flat_map(|(key, value)| value.texts().into_iter().map(move |t| (key.as_str(), t)))
            .collect()
    }

    /// SHA-256 of the action's canonical JSON, lowercase hex.
    ///
    /// Two actions with the same ID but different parameters have different
    /// fingerprints, so a credential bound to one cannot authorize the other.
    pub fn fingerprint(&self) -> String {
        let canonical = match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(_) => format!("{:?}", self).into_bytes(),
        };
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&ActionType::PlaceOrder).unwrap();
        assert_eq!(json, "\"place_order\"");

        let custom: ActionType = serde_json::from_str("\"debug_system_check\"").unwrap();
        assert_eq!(custom, ActionType::Other("debug_system_check".to_string()));
        assert_eq!(custom.as_str(), "debug_system_check");
    }

    #[test]
    fn params_deserialize_by_shape() {
        let json = r#"{"amount": 250000, "ticker": "AAPL", "dry_run": false, "tags": ["a", "b"]}"#;
        let params: BTreeMap<String, ParamValue> = serde_json::from_str(json).unwrap();
        assert_eq!(params["amount"], ParamValue::Number(250000.0));
        assert_eq!(params["ticker"].as_str(), Some("AAPL"));
        assert_eq!(params["dry_run"], ParamValue::Bool(false));
        assert_eq!(params["tags"].texts(), vec!["a", "b"]);
    }

    #[test]
    fn numeric_text_is_read_as_number() {
        let action = ProposedAction::new("s1", ActionType::PlaceOrder).with_param("amount", "1500.5");
        assert_eq!(action.number("amount"), Some(1500.5));
        assert_eq!(action.number("missing"), None);
    }

    #[test]
    fn tool_defaults_to_action_type() {
        let action = ProposedAction::new("s1", "network_fetch");
        assert_eq!(action.action_type, ActionType::NetworkFetch);
        assert_eq!(action.tool, "network_fetch");
        assert_eq!(action.with_tool("http").tool, "http");
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = ProposedAction::new("s1", ActionType::PlaceOrder).with_param("amount", 100.0);
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.params.insert("amount".to_string(), ParamValue::Number(101.0));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn text_fields_flatten_lists() {
        let action = ProposedAction::new("s1", ActionType::ExecuteCode)
            .with_param("script", "print(1)")
            .with_param(
                "args",
                ParamValue::List(vec!["--fast".into(), ParamValue::Number(3.0)]),
            );
        let fields = action.text_fields();
        assert!(fields.contains(&("script", "print(1)")));
        assert!(fields.contains(&("args", "--fast")));
        assert_eq!(fields.len(), 2);
    }
}
