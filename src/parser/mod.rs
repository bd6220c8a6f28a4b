//! Parser registry and the meta-parser
//!
//! A parser module is a regex with named capture groups plus a schema that
//! assigns each group a type. The registry is a process-wide, read-mostly
//! table shared by agent and server; custom targets compile their own module
//! at activation and register nothing globally.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Type assigned to a named capture group by a module's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    String,
    Int,
    Float,
    Bool,
    Any,
}

/// A compiled pattern plus its field schema.
///
/// Every named capture group of `regex` should appear as a key in `schema`;
/// groups the schema does not know about fall back to string.
#[derive(Debug, Clone)]
pub struct ParserModule {
    pub regex: Regex,
    pub schema: HashMap<String, TypeTag>,
}

impl ParserModule {
    /// The schema serialized as the JSON text stored in the modules table.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn schema_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.schema)
    }

    /// Names of the regex's named capture groups.
    #[must_use]
    pub fn capture_names(&self) -> Vec<&str> {
        self.regex.capture_names().flatten().collect()
    }
}

/// Failure to apply a module to a line. Never fatal to a tailer; callers
/// annotate the record with the reason and keep going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no match")]
    NoMatch,
}

fn schema_of(pairs: &[(&str, TypeTag)]) -> HashMap<String, TypeTag> {
    pairs
        .iter()
        .map(|(name, tag)| ((*name).to_string(), *tag))
        .collect()
}

/// Built-in parser modules, keyed by module name.
static REGISTRY: LazyLock<HashMap<String, ParserModule>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    map.insert(
        "syslog".to_string(),
        ParserModule {
            regex: Regex::new(
                r"^(?P<timestamp>\w+\s+\d+\s+\d+:\d+:\d+)\s+(?P<host>\S+)\s+(?P<process>\w+)(?:\[(?P<pid>\d+)\])?:\s+(?P<message>.*)$",
            )
            .expect("syslog pattern is valid"),
            schema: schema_of(&[
                ("timestamp", TypeTag::String),
                ("host", TypeTag::String),
                ("process", TypeTag::String),
                ("pid", TypeTag::String),
                ("message", TypeTag::String),
            ]),
        },
    );

    map.insert(
        "apache".to_string(),
        ParserModule {
            regex: Regex::new(
                r#"(?P<remote>\S+) (?P<remote_long>\S+) (?P<remote_user>\S+) \[(?P<timestamp>[^\]]+)\] "(?P<request>[^"]*)" (?P<status_code>\d{3}) (?P<size>\S+)"#,
            )
            .expect("apache pattern is valid"),
            schema: schema_of(&[
                ("remote", TypeTag::String),
                ("remote_long", TypeTag::String),
                ("remote_user", TypeTag::String),
                ("timestamp", TypeTag::String),
                ("request", TypeTag::String),
                ("status_code", TypeTag::String),
                ("size", TypeTag::String),
            ]),
        },
    );

    // Placeholder so heartbeat records have a seedable module row; the
    // pattern is never applied to input.
    map.insert(
        crate::record::HEARTBEAT_MODULE.to_string(),
        ParserModule {
            regex: Regex::new(r"/ \d+ /").expect("heartbeat pattern is valid"),
            schema: HashMap::new(),
        },
    );

    map
});

/// The process-wide registry of built-in parser modules.
#[must_use]
pub fn registry() -> &'static HashMap<String, ParserModule> {
    &REGISTRY
}

/// Look up a built-in module by name.
#[must_use]
pub fn lookup(module: &str) -> Option<&'static ParserModule> {
    REGISTRY.get(module)
}

/// Apply a module to one line, producing the record's field map.
///
/// Named groups are enumerated from the pattern (the full match and unnamed
/// groups are skipped); each is coerced per the schema. A group that did not
/// participate in the match contributes an empty string. Numeric coercion
/// failures keep the raw string rather than erroring.
///
/// # Errors
///
/// Returns [`ParseError::NoMatch`] when the pattern does not match the line.
pub fn meta_parse(line: &str, module: &ParserModule) -> Result<Map<String, Value>, ParseError> {
    let caps = module.regex.captures(line).ok_or(ParseError::NoMatch)?;

    let mut parsed = Map::new();
    for name in module.regex.capture_names().flatten() {
        let text = caps.name(name).map_or("", |m| m.as_str());
        let tag = module.schema.get(name).copied().unwrap_or(TypeTag::String);

        let value = match tag {
            TypeTag::Int => text
                .parse::<i64>()
                .map_or_else(|_| Value::String(text.to_string()), Value::from),
            TypeTag::Float => text
                .parse::<f64>()
                .map_or_else(|_| Value::String(text.to_string()), Value::from),
            TypeTag::Bool => text
                .parse::<bool>()
                .map_or_else(|_| Value::String(text.to_string()), Value::from),
            TypeTag::String | TypeTag::Any => Value::String(text.to_string()),
        };
        parsed.insert(name.to_string(), value);
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_should_parse_syslog_line_with_pid() {
        let line = "Jul 30 14:17:01 blackwall CRON[620010]: pam_unix(cron:session): session opened for user root(uid=0) by (uid=0)";
        let module = lookup("syslog").unwrap();
        let parsed = meta_parse(line, module).unwrap();

        assert_eq!(parsed["timestamp"], json!("Jul 30 14:17:01"));
        assert_eq!(parsed["host"], json!("blackwall"));
        assert_eq!(parsed["process"], json!("CRON"));
        assert_eq!(parsed["pid"], json!("620010"));
        assert_eq!(
            parsed["message"],
            json!("pam_unix(cron:session): session opened for user root(uid=0) by (uid=0)")
        );
    }

    #[test]
    fn test_should_parse_syslog_line_without_pid_as_empty_string() {
        let line = "Jul 29 12:34:56 myhost cron: Job started.";
        let module = lookup("syslog").unwrap();
        let parsed = meta_parse(line, module).unwrap();

        assert_eq!(parsed["pid"], json!(""));
        assert_eq!(parsed["host"], json!("myhost"));
        assert_eq!(parsed["process"], json!("cron"));
        assert_eq!(parsed["message"], json!("Job started."));
    }

    #[test]
    fn test_should_parse_apache_combined_line() {
        let line = r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326"#;
        let module = lookup("apache").unwrap();
        let parsed = meta_parse(line, module).unwrap();

        assert_eq!(parsed["remote"], json!("127.0.0.1"));
        assert_eq!(parsed["remote_long"], json!("-"));
        assert_eq!(parsed["remote_user"], json!("frank"));
        assert_eq!(parsed["timestamp"], json!("10/Oct/2000:13:55:36 -0700"));
        assert_eq!(parsed["request"], json!("GET /apache_pb.gif HTTP/1.0"));
        assert_eq!(parsed["status_code"], json!("200"));
        assert_eq!(parsed["size"], json!("2326"));
    }

    #[test]
    fn test_should_return_no_match_for_malformed_apache_line() {
        let module = lookup("apache").unwrap();
        let err = meta_parse("this is not a valid apache log line", module).unwrap_err();
        assert_eq!(err, ParseError::NoMatch);
        assert_eq!(err.to_string(), "no match");
    }

    #[test]
    fn test_should_coerce_int_and_float_fields_when_they_parse() {
        let module = ParserModule {
            regex: Regex::new(r"^(?P<count>\S+) (?P<ratio>\S+)$").unwrap(),
            schema: schema_of(&[("count", TypeTag::Int), ("ratio", TypeTag::Float)]),
        };

        let parsed = meta_parse("42 0.5", &module).unwrap();
        assert_eq!(parsed["count"], json!(42));
        assert_eq!(parsed["ratio"], json!(0.5));

        // Coercion failures keep the raw text.
        let parsed = meta_parse("many 0.x", &module).unwrap();
        assert_eq!(parsed["count"], json!("many"));
        assert_eq!(parsed["ratio"], json!("0.x"));
    }

    #[test]
    fn test_should_fall_back_to_string_for_fields_missing_from_schema() {
        let module = ParserModule {
            regex: Regex::new(r"^(?P<known>\S+) (?P<unknown>\S+)$").unwrap(),
            schema: schema_of(&[("known", TypeTag::Int)]),
        };
        let parsed = meta_parse("7 mystery", &module).unwrap();
        assert_eq!(parsed["known"], json!(7));
        assert_eq!(parsed["unknown"], json!("mystery"));
    }

    #[test]
    fn test_should_keep_builtin_schemas_in_sync_with_named_groups() {
        for (name, module) in registry() {
            if name.as_str() == crate::record::HEARTBEAT_MODULE {
                continue;
            }
            let mut groups: Vec<&str> = module.capture_names();
            groups.sort_unstable();
            let mut schema_keys: Vec<&str> = module.schema.keys().map(String::as_str).collect();
            schema_keys.sort_unstable();
            assert_eq!(groups, schema_keys, "schema drift in module {name}");
        }
    }
}
