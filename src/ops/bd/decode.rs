//! Canonical decoders for `bd --json` output.
//!
//! Upstream is inconsistent about shapes: lists arrive as bare arrays, as
//! `{"<plural>": [...]}` wrappers, or as `null`; single entities arrive as
//! an object or a one-element array. One decoder per shape absorbs all of
//! them.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Drop any non-JSON preamble (warnings, progress lines) before the
/// payload.
///
/// A line opening with a bracket only starts the payload when the rest of
/// the output parses from there, or when it opens an object, an array of
/// objects or an empty array. Bracketed log tags such as `[WARN]` are
/// skipped.
pub fn json_payload(stdout: &str) -> &str {
    let mut fallback = None;
    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with(['[', '{']) || trimmed.starts_with("null") {
            let rest = stdout[offset..].trim();
            if serde_json::from_str::<Value>(rest).is_ok() {
                return rest;
            }
            if fallback.is_none() && opens_structure(trimmed) {
                fallback = Some(rest);
            }
        }
        offset += line.len();
    }
    fallback.unwrap_or_else(|| stdout.trim())
}

fn opens_structure(line: &str) -> bool {
    match line.strip_prefix('[') {
        Some(rest) => {
            let rest = rest.trim_start();
            rest.is_empty() || rest.starts_with(['{', ']'])
        }
        None => line.starts_with('{') || line.starts_with("null"),
    }
}

fn parse(stdout: &str) -> Result<Option<Value>> {
    let payload = json_payload(stdout);
    if payload.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(payload)?;
    Ok(if value.is_null() { None } else { Some(value) })
}

/// Decode a list, accepting a raw array, a `{plural: [...]}` wrapper, a
/// single object, `null` or nothing.
///
/// # Errors
///
/// Returns a JSON error when the payload does not match `T`.
pub fn decode_list<T: DeserializeOwned>(stdout: &str, plural: &str) -> Result<Vec<T>> {
    let value = match parse(stdout)? {
        None => return Ok(Vec::new()),
        Some(Value::Object(mut map)) if map.contains_key(plural) => {
            match map.remove(plural) {
                Some(Value::Null) | None => return Ok(Vec::new()),
                Some(inner) => inner,
            }
        }
        Some(Value::Object(map)) => Value::Array(vec![Value::Object(map)]),
        Some(other) => other,
    };
    Ok(serde_json::from_value(value)?)
}

/// Decode one entity, accepting an object or the first element of an
/// array. `None` when the payload is empty, `null` or `[]`.
///
/// # Errors
///
/// Returns a JSON error when the payload does not match `T`.
pub fn decode_one<T: DeserializeOwned>(stdout: &str) -> Result<Option<T>> {
    match parse(stdout)? {
        None => Ok(None),
        Some(Value::Array(items)) => match items.into_iter().next() {
            None | Some(Value::Null) => Ok(None),
            Some(first) => Ok(Some(serde_json::from_value(first)?)),
        },
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Like [`decode_one`], also unwrapping `{key: {...}}`.
///
/// # Errors
///
/// Returns a JSON error when the payload does not match `T`.
pub fn decode_keyed<T: DeserializeOwned>(stdout: &str, key: &str) -> Result<Option<T>> {
    match parse(stdout)? {
        Some(Value::Object(mut map)) if map.contains_key(key) => match map.remove(key) {
            Some(Value::Null) | None => Ok(None),
            Some(inner) => Ok(Some(serde_json::from_value(inner)?)),
        },
        _ => decode_one(stdout),
    }
}

/// The value of a config key from `bd config get`.
///
/// Upstream prints `<key> (not set)` for a missing key; with
/// `strip_not_set` that becomes the empty string.
pub fn config_value(stdout: &str, key: &str, strip_not_set: bool) -> String {
    if let Ok(Some(Value::Object(map))) = parse(stdout) {
        return match map.get("value") {
            Some(Value::String(value)) => value.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
    }
    let text = stdout.trim();
    if strip_not_set && text.ends_with("(not set)") {
        return String::new();
    }
    text.strip_prefix(key)
        .and_then(|rest| rest.trim_start().strip_prefix('='))
        .map_or(text, str::trim)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, Swarm};

    const ISSUE: &str = r#"{"id":"gt-abc","title":"T","status":"open","priority":2,
        "issue_type":"task","created_at":"2026-01-01T00:00:00Z",
        "updated_at":"2026-01-01T00:00:00Z"}"#;

    #[test]
    fn list_shapes() {
        let wrapped = r#"{"swarms":[{"id":"gt-s1","epic_id":"gt-e1"}]}"#;
        let raw = r#"[{"id":"gt-s1","epic_id":"gt-e1"}]"#;
        let a: Vec<Swarm> = decode_list(wrapped, "swarms").unwrap();
        let b: Vec<Swarm> = decode_list(raw, "swarms").unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].epic_id, "gt-e1");

        for empty in ["", "null", "  \n", r#"{"swarms":null}"#, "[]"] {
            let decoded: Vec<Swarm> = decode_list(empty, "swarms").unwrap();
            assert!(decoded.is_empty(), "{empty:?}");
        }
    }

    #[test]
    fn single_object_becomes_one_element_list() {
        let issues: Vec<Issue> = decode_list(ISSUE, "issues").unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "gt-abc");
    }

    #[test]
    fn preamble_is_skipped() {
        let stdout = format!("Warning: database is stale\n[{ISSUE}]\n");
        let issue: Issue = decode_one(&stdout).unwrap().unwrap();
        assert_eq!(issue.title, "T");
    }

    #[test]
    fn bracketed_log_lines_are_preamble() {
        let stdout = format!("[WARN] auto-import skipped\n[INFO] 2 issues\n[{ISSUE}]\n");
        assert_eq!(json_payload(&stdout), format!("[{ISSUE}]"));
        let issues: Vec<Issue> = decode_list(&stdout, "issues").unwrap();
        assert_eq!(issues.len(), 1);

        let pretty = "[WARN] stale\n[\n  {\"total\": 2}\n]\n";
        assert_eq!(json_payload(pretty), "[\n  {\"total\": 2}\n]");
        assert!(decode_list::<Issue>("[WARN] only a log line\n", "issues").is_err());
    }

    #[test]
    fn one_from_array_or_object() {
        let from_array: Option<Issue> = decode_one(&format!("[{ISSUE}]")).unwrap();
        let from_object: Option<Issue> = decode_one(ISSUE).unwrap();
        assert_eq!(from_array, from_object);
        assert!(decode_one::<Issue>("[]").unwrap().is_none());
        assert!(decode_one::<Issue>("").unwrap().is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(decode_list::<Issue>("[{\"id\":", "issues").is_err());
    }

    #[test]
    fn keyed_unwrap() {
        let stdout = r#"{"summary":{"total":3,"open":2,"closed":1}}"#;
        let stats: crate::model::Stats = decode_keyed(stdout, "summary").unwrap().unwrap();
        assert_eq!(stats.total, 3);
        let flat: crate::model::Stats = decode_keyed(r#"{"total":1}"#, "summary").unwrap().unwrap();
        assert_eq!(flat.total, 1);
    }

    #[test]
    fn config_values() {
        assert_eq!(config_value("sync.branch (not set)\n", "sync.branch", true), "");
        assert_eq!(
            config_value("sync.branch (not set)\n", "sync.branch", false),
            "sync.branch (not set)"
        );
        assert_eq!(config_value(r#"{"key":"k","value":"v"}"#, "k", true), "v");
        assert_eq!(config_value(r#"{"key":"k","value":null}"#, "k", true), "");
        assert_eq!(config_value("k = beads-sync\n", "k", true), "beads-sync");
        assert_eq!(config_value("plain\n", "k", true), "plain");
    }
}
