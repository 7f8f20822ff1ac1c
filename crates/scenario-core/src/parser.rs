//! Lenient JSON test definition parser
//!
//! The document must be valid JSON whose top level is an object, and the
//! `caller`/`receiver` sections must be objects when present. Everything below
//! that is forgiving: missing or mistyped fields take their defaults and
//! unrecognised actions are dropped with a warning.
//!
//! ```json
//! {
//!   "name": "Beep on answer",
//!   "timeout": 60,
//!   "caller":   { "account": "alice", "uri": "sip:bob@pbx.local", "timeout": 20,
//!                 "actions": [ { "action": "wait", "seconds": 2 },
//!                              { "action": "send_dtmf", "digits": "123" } ] },
//!   "receiver": { "account": "bob", "auto_answer": true,
//!                 "actions": [ { "action": "record_audio", "file": "rx.wav" },
//!                              { "action": "expect_dtmf", "pattern": "123" } ] },
//!   "expect":   { "connected": true, "beep_count": 3, "beep_frequency": 1000 }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{ScenarioError, ScenarioResult};
use crate::model::{
    Action, ActionKind, Expectations, Role, RoleConfig, TestDefinition, DEFAULT_HANGUP_CODE,
    DEFAULT_ROLE_TIMEOUT_SECS, DEFAULT_TEST_TIMEOUT_SECS,
};

/// Largest test file accepted
pub const MAX_TEST_FILE_BYTES: u64 = 1024 * 1024;

/// Default per-role action limit
pub const DEFAULT_MAX_ACTIONS: usize = 32;

type Object = Map<String, Value>;

/// Test definition parser
#[derive(Debug, Clone)]
pub struct TestParser {
    max_actions: usize,
}

impl Default for TestParser {
    fn default() -> Self {
        Self {
            max_actions: DEFAULT_MAX_ACTIONS,
        }
    }
}

impl TestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many actions a single role may declare
    pub fn with_max_actions(mut self, max_actions: usize) -> Self {
        self.max_actions = max_actions;
        self
    }

    /// Read and parse a test file
    pub fn parse_file(&self, path: impl AsRef<Path>) -> ScenarioResult<TestDefinition> {
        let path = path.as_ref();
        info!("Parsing test file: {}", path.display());

        let len = std::fs::metadata(path)
            .map_err(|e| ScenarioError::io(path, e))?
            .len();
        if len == 0 || len > MAX_TEST_FILE_BYTES {
            return Err(ScenarioError::parse(format!(
                "{} is {} bytes; test files must be between 1 byte and {} bytes",
                path.display(),
                len,
                MAX_TEST_FILE_BYTES
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|e| ScenarioError::io(path, e))?;
        self.parse_str(&text)
    }

    /// Parse a test definition from JSON text
    pub fn parse_str(&self, text: &str) -> ScenarioResult<TestDefinition> {
        let root: Value = serde_json::from_str(text).map_err(|e| {
            ScenarioError::parse(format!(
                "invalid JSON at line {} column {}: {}",
                e.line(),
                e.column(),
                e
            ))
        })?;
        self.parse_value(&root)
    }

    /// Parse a test definition from an already decoded JSON value
    pub fn parse_value(&self, root: &Value) -> ScenarioResult<TestDefinition> {
        let root = root
            .as_object()
            .ok_or_else(|| ScenarioError::parse("top-level value must be an object"))?;

        let def = TestDefinition {
            name: get_str(root, "name", "Unnamed Test").to_string(),
            description: get_str(root, "description", "").to_string(),
            timeout_secs: get_u64(root, "timeout", DEFAULT_TEST_TIMEOUT_SECS),
            caller: self.parse_section(root, Role::Caller)?,
            receiver: self.parse_section(root, Role::Receiver)?,
            expect: parse_expectations(root.get("expect")),
        };

        info!("Loaded test: {}", def.name);
        debug!(
            "  Caller: account={}, uri={}, actions={}",
            def.caller.account,
            def.caller.uri,
            def.caller.actions.len()
        );
        debug!(
            "  Receiver: account={}, auto_answer={}, actions={}",
            def.receiver.account,
            def.receiver.auto_answer,
            def.receiver.actions.len()
        );

        Ok(def)
    }

    fn parse_section(&self, root: &Object, role: Role) -> ScenarioResult<RoleConfig> {
        let key = role.to_string();
        match root.get(&key) {
            None => Ok(RoleConfig::default()),
            Some(Value::Object(section)) => self.parse_role(section, role),
            Some(_) => Err(ScenarioError::parse(format!("'{}' must be an object", key))),
        }
    }

    fn parse_role(&self, section: &Object, role: Role) -> ScenarioResult<RoleConfig> {
        let mut actions = Vec::new();

        match section.get("actions") {
            None => {}
            Some(Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    if let Some(action) = parse_action(item, role, index) {
                        actions.push(action);
                    }
                }
            }
            Some(_) => warn!("Ignoring {} 'actions': not an array", role),
        }

        if actions.len() > self.max_actions {
            return Err(ScenarioError::CapacityExceeded {
                role: role.to_string(),
                count: actions.len(),
                limit: self.max_actions,
            });
        }

        Ok(RoleConfig {
            account: get_str(section, "account", "").to_string(),
            uri: get_str(section, "uri", "").to_string(),
            auto_answer: get_bool(section, "auto_answer", false),
            timeout_secs: get_u64(section, "timeout", DEFAULT_ROLE_TIMEOUT_SECS),
            actions,
        })
    }
}

/// Parse a test file with default limits
pub fn parse_test_file(path: impl AsRef<Path>) -> ScenarioResult<TestDefinition> {
    TestParser::new().parse_file(path)
}

/// Parse JSON text with default limits
pub fn parse_test_str(text: &str) -> ScenarioResult<TestDefinition> {
    TestParser::new().parse_str(text)
}

fn parse_action(item: &Value, role: Role, index: usize) -> Option<Action> {
    let Some(obj) = item.as_object() else {
        warn!("Ignoring {} action #{}: not an object", role, index);
        return None;
    };

    let Some(name) = obj.get("action").and_then(Value::as_str) else {
        warn!("Ignoring {} action #{}: missing 'action' field", role, index);
        return None;
    };

    let Some(kind) = ActionKind::from_name(name) else {
        warn!("Unknown action type: {} ({} action #{})", name, role, index);
        return None;
    };

    let action = match kind {
        ActionKind::Wait => Action::Wait {
            seconds: get_f64(obj, "seconds", 1.0),
        },
        ActionKind::SendDtmf => Action::SendDtmf {
            digits: get_str(obj, "digits", "").to_string(),
            timeout_secs: get_u64(obj, "timeout", 5),
        },
        ActionKind::ExpectDtmf => Action::ExpectDtmf {
            pattern: get_str(obj, "pattern", "").to_string(),
            timeout_secs: get_u64(obj, "timeout", 10),
        },
        ActionKind::PlayAudio => Action::PlayAudio {
            file: PathBuf::from(get_str(obj, "file", "")),
            looped: get_bool(obj, "loop", false),
        },
        ActionKind::RecordAudio => Action::RecordAudio {
            file: PathBuf::from(get_str(obj, "file", "")),
        },
        ActionKind::ExpectBeeps => Action::ExpectBeeps {
            count: get_u64(obj, "count", 1).min(u32::MAX as u64) as u32,
            frequency: get_f64(obj, "frequency", 0.0),
        },
        ActionKind::Hangup => {
            let code = get_u64(obj, "code", DEFAULT_HANGUP_CODE as u64);
            Action::Hangup {
                code: match u16::try_from(code) {
                    Ok(0) | Err(_) => DEFAULT_HANGUP_CODE,
                    Ok(code) => code,
                },
            }
        }
    };

    Some(action)
}

fn parse_expectations(value: Option<&Value>) -> Expectations {
    let defaults = Expectations::default();
    match value {
        Some(Value::Object(expect)) => Expectations {
            connected: get_bool(expect, "connected", defaults.connected),
            beep_count: get_u64(expect, "beep_count", 0).min(u32::MAX as u64) as u32,
            beep_frequency: get_f64(expect, "beep_frequency", 0.0),
        },
        Some(_) => {
            warn!("Ignoring 'expect': not an object");
            defaults
        }
        None => defaults,
    }
}

fn get_str<'a>(obj: &'a Object, key: &str, default: &'a str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn get_f64(obj: &Object, key: &str, default: f64) -> f64 {
    obj.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn get_bool(obj: &Object, key: &str, default: bool) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Numbers are truncated toward zero; negatives clamp to 0
fn get_u64(obj: &Object, key: &str, default: u64) -> u64 {
    match obj.get(key).and_then(Value::as_f64) {
        Some(v) if v > 0.0 => v as u64,
        Some(_) => 0,
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "name": "DTMF and beeps",
        "description": "caller sends digits, receiver records",
        "timeout": 45,
        "caller": {
            "account": "alice",
            "uri": "sip:bob@pbx.local",
            "timeout": 20,
            "actions": [
                { "action": "wait", "seconds": 1.5 },
                { "action": "send_dtmf", "digits": "123#" },
                { "action": "play", "file": "prompt.wav", "loop": true },
                { "action": "hangup", "code": 486 }
            ]
        },
        "receiver": {
            "account": "bob",
            "auto_answer": true,
            "actions": [
                { "action": "record", "file": "rx.wav" },
                { "action": "expect_dtmf", "pattern": "123" },
                { "action": "expect_beeps", "count": 2, "frequency": 425 }
            ]
        },
        "expect": { "connected": true, "beep_count": 3, "beep_frequency": 1000 }
    }"#;

    #[test]
    fn test_parse_full_document() {
        let def = parse_test_str(FULL).unwrap();
        assert_eq!(def.name, "DTMF and beeps");
        assert_eq!(def.timeout_secs, 45);
        assert_eq!(def.caller.account, "alice");
        assert_eq!(def.caller.uri, "sip:bob@pbx.local");
        assert_eq!(def.caller.timeout_secs, 20);
        assert_eq!(
            def.caller.actions,
            vec![
                Action::Wait { seconds: 1.5 },
                Action::SendDtmf {
                    digits: "123#".into(),
                    timeout_secs: 5
                },
                Action::PlayAudio {
                    file: PathBuf::from("prompt.wav"),
                    looped: true
                },
                Action::Hangup { code: 486 },
            ]
        );
        assert!(def.receiver.auto_answer);
        assert_eq!(def.receiver.timeout_secs, DEFAULT_ROLE_TIMEOUT_SECS);
        assert_eq!(def.receiver.recording_path(), Some(Path::new("rx.wav")));
        assert_eq!(
            def.receiver.actions[2],
            Action::ExpectBeeps {
                count: 2,
                frequency: 425.0
            }
        );
        assert_eq!(def.expect.beep_count, 3);
        assert_eq!(def.expect.beep_frequency, 1000.0);
    }

    #[test]
    fn test_defaults_for_empty_object() {
        let def = parse_test_str("{}").unwrap();
        assert_eq!(def.name, "Unnamed Test");
        assert_eq!(def.description, "");
        assert_eq!(def.timeout_secs, 60);
        assert!(def.expect.connected);
        assert_eq!(def.expect.beep_count, 0);
        assert!(def.caller.actions.is_empty());
    }

    #[test]
    fn test_action_defaults() {
        let def = parse_test_str(
            r#"{ "caller": { "actions": [
                { "action": "wait" },
                { "action": "send_dtmf" },
                { "action": "expect_dtmf", "pattern": "9" },
                { "action": "expect_beeps" },
                { "action": "hangup" },
                { "action": "hangup", "code": 0 }
            ] } }"#,
        )
        .unwrap();
        assert_eq!(
            def.caller.actions,
            vec![
                Action::Wait { seconds: 1.0 },
                Action::SendDtmf {
                    digits: String::new(),
                    timeout_secs: 5
                },
                Action::ExpectDtmf {
                    pattern: "9".into(),
                    timeout_secs: 10
                },
                Action::ExpectBeeps {
                    count: 1,
                    frequency: 0.0
                },
                Action::Hangup { code: 200 },
                Action::Hangup { code: 200 },
            ]
        );
    }

    #[test]
    fn test_unknown_and_malformed_actions_are_dropped() {
        let def = parse_test_str(
            r#"{ "receiver": { "actions": [
                { "action": "teleport" },
                { "seconds": 3 },
                "wait",
                { "action": 7 },
                { "action": "wait", "seconds": 2 }
            ] } }"#,
        )
        .unwrap();
        assert_eq!(def.receiver.actions, vec![Action::Wait { seconds: 2.0 }]);
    }

    #[test]
    fn test_wrong_field_types_take_defaults() {
        let def = parse_test_str(
            r#"{ "name": 5, "timeout": "soon",
                 "caller": { "account": ["x"], "timeout": -4, "auto_answer": "yes" },
                 "expect": { "connected": "no", "beep_count": 2.9 } }"#,
        )
        .unwrap();
        assert_eq!(def.name, "Unnamed Test");
        assert_eq!(def.timeout_secs, 60);
        assert_eq!(def.caller.account, "");
        assert_eq!(def.caller.timeout_secs, 0);
        assert!(!def.caller.auto_answer);
        assert!(def.expect.connected);
        assert_eq!(def.expect.beep_count, 2);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_test_str("{ \"name\": ").unwrap_err();
        assert!(matches!(err, ScenarioError::Parse { .. }));
    }

    #[test]
    fn test_top_level_must_be_object() {
        assert!(matches!(
            parse_test_str("[1, 2]"),
            Err(ScenarioError::Parse { .. })
        ));
    }

    #[test]
    fn test_role_sections_must_be_objects() {
        let err = parse_test_str(r#"{ "caller": "alice" }"#).unwrap_err();
        assert!(err.to_string().contains("'caller' must be an object"));
        let err = parse_test_str(r#"{ "receiver": [] }"#).unwrap_err();
        assert!(err.to_string().contains("'receiver' must be an object"));
    }

    #[test]
    fn test_action_capacity_is_enforced() {
        let actions: Vec<String> = (0..5)
            .map(|_| r#"{ "action": "wait", "seconds": 0 }"#.to_string())
            .collect();
        let doc = format!(r#"{{ "caller": {{ "actions": [{}] }} }}"#, actions.join(","));

        let parser = TestParser::new().with_max_actions(4);
        let err = parser.parse_str(&doc).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::CapacityExceeded { count: 5, limit: 4, .. }
        ));

        assert_eq!(TestParser::new().parse_str(&doc).unwrap().caller.actions.len(), 5);
    }

    #[test]
    fn test_non_object_expect_uses_defaults() {
        let def = parse_test_str(r#"{ "expect": true }"#).unwrap();
        assert_eq!(def.expect, Expectations::default());
    }

    #[test]
    fn test_parse_file_rejects_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(
            parse_test_file(&empty),
            Err(ScenarioError::Parse { .. })
        ));
        assert!(matches!(
            parse_test_file(dir.path().join("missing.json")),
            Err(ScenarioError::Io { .. })
        ));

        let good = dir.path().join("good.json");
        std::fs::write(&good, FULL).unwrap();
        assert_eq!(parse_test_file(&good).unwrap().name, "DTMF and beeps");
    }
}
