//! Agent configuration: YAML targets and journal service subscriptions.

use crate::error::AgentError;
use crate::parser::{self, ParserModule, TypeTag};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One file source with its parser assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub path: String,
    pub severity: String,
    #[serde(default)]
    pub custom: bool,
    /// Registry module name; required when `custom` is false.
    #[serde(default)]
    pub module: Option<String>,
    /// Inline pattern; required when `custom` is true.
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub schema: Option<HashMap<String, TypeTag>>,
}

impl Target {
    /// The module name this target stamps onto its records. Custom targets
    /// are registered under their own name.
    #[must_use]
    pub fn module_name(&self) -> String {
        if self.custom {
            self.name.clone()
        } else {
            self.module.clone().unwrap_or_default()
        }
    }

    /// Resolve the target to a compiled parser module.
    ///
    /// Custom targets compile their inline regex here, at activation; a bad
    /// pattern rejects only this target. A plain target that names no module
    /// resolves to `None`: its records go out with an empty module string
    /// and nothing parsed.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] for a missing/invalid regex or an
    /// unknown registry module.
    pub fn resolve_module(&self) -> Result<Option<ParserModule>, AgentError> {
        if self.custom {
            let pattern = self.regex.as_deref().ok_or_else(|| AgentError::Config {
                target: self.name.clone(),
                reason: "custom target without a regex".to_string(),
            })?;
            let regex = regex::Regex::new(pattern).map_err(|e| AgentError::Config {
                target: self.name.clone(),
                reason: format!("invalid regex: {e}"),
            })?;
            Ok(Some(ParserModule {
                regex,
                schema: self.schema.clone().unwrap_or_default(),
            }))
        } else {
            let Some(module) = self.module.as_deref() else {
                return Ok(None);
            };
            parser::lookup(module)
                .cloned()
                .map(Some)
                .ok_or_else(|| AgentError::Config {
                    target: self.name.clone(),
                    reason: format!("no registry entry for module {module}"),
                })
        }
    }
}

/// One systemd unit the journal reader subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    /// Unit identifier, without the `.service` suffix.
    pub key: String,
    pub severity: String,
}

/// The whole agent config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(rename = "Targets", default)]
    pub targets: Vec<Target>,
    #[serde(rename = "Services", default)]
    pub services: Vec<Service>,
}

impl AgentConfig {
    /// Load and parse the YAML config file.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConfigFile`] when the file cannot be read and
    /// [`AgentError::ConfigParse`] when the YAML is invalid.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| AgentError::ConfigParse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
Targets:
  - name: AuthLog
    path: /var/log/auth.log
    severity: info
    custom: false
    module: syslog
  - name: MyApp
    path: /var/log/myapp.log
    severity: warn
    custom: true
    regex: '^(?P<ts>\S+) (?P<msg>.*)$'
    schema: {ts: string, msg: string}
Services:
  - name: sshd
    key: ssh
    severity: info
";

    #[test]
    fn test_should_parse_sample_config() {
        let config: AgentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.targets[0].module.as_deref(), Some("syslog"));
        assert!(config.targets[1].custom);
        assert_eq!(config.services[0].key, "ssh");
    }

    #[test]
    fn test_should_resolve_registry_module_for_plain_target() {
        let config: AgentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let module = config.targets[0].resolve_module().unwrap().unwrap();
        assert!(module.schema.contains_key("message"));
        assert_eq!(config.targets[0].module_name(), "syslog");
    }

    #[test]
    fn test_should_resolve_no_parser_for_plain_target_without_module() {
        let target = Target {
            name: "Bare".to_string(),
            path: "/tmp/bare.log".to_string(),
            severity: "info".to_string(),
            custom: false,
            module: None,
            regex: None,
            schema: None,
        };
        assert!(target.resolve_module().unwrap().is_none());
        assert_eq!(target.module_name(), "");
    }

    #[test]
    fn test_should_compile_custom_module_under_target_name() {
        let config: AgentConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let module = config.targets[1].resolve_module().unwrap().unwrap();
        assert_eq!(module.schema.len(), 2);
        assert_eq!(config.targets[1].module_name(), "MyApp");

        let parsed = crate::parser::meta_parse("12:00 hello world", &module).unwrap();
        assert_eq!(parsed["ts"], serde_json::json!("12:00"));
        assert_eq!(parsed["msg"], serde_json::json!("hello world"));
    }

    #[test]
    fn test_should_reject_custom_target_with_bad_regex() {
        let target = Target {
            name: "Broken".to_string(),
            path: "/tmp/x.log".to_string(),
            severity: "info".to_string(),
            custom: true,
            module: None,
            regex: Some("(unclosed".to_string()),
            schema: None,
        };
        let err = target.resolve_module().unwrap_err();
        assert!(matches!(err, AgentError::Config { .. }));
    }

    #[test]
    fn test_should_reject_unknown_registry_module() {
        let target = Target {
            name: "Mystery".to_string(),
            path: "/tmp/x.log".to_string(),
            severity: "info".to_string(),
            custom: false,
            module: Some("nope".to_string()),
            regex: None,
            schema: None,
        };
        assert!(target.resolve_module().is_err());
    }
}
