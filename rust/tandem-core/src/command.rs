//! Command model with closed parameter schemas
//!
//! The platform routes textual commands from two ecosystems: `pm:` project
//! management scripts and `/sc:` agent-framework commands. Free-form flag
//! maps are not allowed past the boundary; every command declares its
//! parameters as a typed schema and validation happens before routing.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parsed command invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Original input line
    pub raw: String,
    /// Command name, e.g. `pm:issue-start` or `sc:analyze`
    pub name: String,
    /// Positional arguments in order
    pub args: Vec<String>,
    /// Flag parameters (`--key value` or bare `--key`)
    pub params: BTreeMap<String, String>,
}

impl Command {
    /// Parse a raw command line into name, positionals, and flags
    ///
    /// Leading `/` is stripped so `/sc:analyze` and `sc:analyze` are the same
    /// command. A `--key` without a value becomes `"true"`.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation {
                field: "command".to_string(),
                message: "empty command".to_string(),
            });
        }

        let mut tokens = trimmed.split_whitespace();
        let name = tokens
            .next()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();

        let mut args = Vec::new();
        let mut params = BTreeMap::new();
        let rest: Vec<&str> = tokens.collect();
        let mut i = 0;
        while i < rest.len() {
            let token = rest[i];
            if let Some(key) = token.strip_prefix("--") {
                let value = match rest.get(i + 1) {
                    Some(next) if !next.starts_with("--") => {
                        i += 1;
                        (*next).to_string()
                    }
                    _ => "true".to_string(),
                };
                params.insert(key.to_string(), value);
            } else {
                args.push(token.to_string());
            }
            i += 1;
        }

        Ok(Self {
            raw: trimmed.to_string(),
            name,
            args,
            params,
        })
    }

    /// Ecosystem prefix of the command name, if any (`pm`, `sc`, ...)
    pub fn prefix(&self) -> Option<&str> {
        self.name.split(':').next().filter(|p| *p != self.name)
    }
}

/// Kind of a declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Boolean flag, present or absent
    Flag,
    /// Free text
    Text,
    /// Signed integer
    Integer,
    /// Floating point number
    Float,
    /// Filesystem path
    Path,
    /// One of an enumerated set of values
    Choice,
}

/// Declared parameter of a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    /// Default applied when the parameter is absent
    pub default: Option<String>,
    /// Allowed values for `Choice` parameters
    pub allowed: Vec<String>,
}

impl ParamSpec {
    pub fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
            allowed: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn with_allowed(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| (*v).to_string()).collect();
        self
    }

    fn check(&self, value: &str) -> CoreResult<()> {
        let fail = |message: String| {
            Err(CoreError::Validation {
                field: self.name.clone(),
                message,
            })
        };
        match self.kind {
            ParamKind::Flag => {
                if value != "true" && value != "false" {
                    return fail(format!("expected flag, got '{value}'"));
                }
            }
            ParamKind::Integer => {
                if value.parse::<i64>().is_err() {
                    return fail(format!("expected integer, got '{value}'"));
                }
            }
            ParamKind::Float => {
                if value.parse::<f64>().is_err() {
                    return fail(format!("expected number, got '{value}'"));
                }
            }
            ParamKind::Choice => {
                if !self.allowed.iter().any(|a| a == value) {
                    return fail(format!(
                        "expected one of [{}], got '{value}'",
                        self.allowed.join(", ")
                    ));
                }
            }
            ParamKind::Text | ParamKind::Path => {}
        }
        Ok(())
    }
}

/// Schema for one command: name, positional arity, declared flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    /// Minimum number of positional arguments
    pub min_args: usize,
    /// Maximum number of positional arguments
    pub max_args: usize,
    pub params: Vec<ParamSpec>,
}

impl CommandSpec {
    pub fn new(name: &str, min_args: usize, max_args: usize) -> Self {
        Self {
            name: name.to_string(),
            min_args,
            max_args,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Validate a parsed command against this schema, applying defaults
    ///
    /// Returns the command with defaults filled in; unknown flags and arity
    /// violations are validation errors.
    pub fn validate(&self, command: &Command) -> CoreResult<Command> {
        if command.name != self.name {
            return Err(CoreError::UnknownCommand(command.name.clone()));
        }
        if command.args.len() < self.min_args || command.args.len() > self.max_args {
            return Err(CoreError::Validation {
                field: "args".to_string(),
                message: format!(
                    "expected {}..={} positional arguments, got {}",
                    self.min_args,
                    self.max_args,
                    command.args.len()
                ),
            });
        }

        for key in command.params.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(CoreError::Validation {
                    field: key.clone(),
                    message: "unknown parameter".to_string(),
                });
            }
        }

        let mut validated = command.clone();
        for spec in &self.params {
            match validated.params.get(&spec.name) {
                Some(value) => spec.check(value)?,
                None if spec.required => {
                    return Err(CoreError::Validation {
                        field: spec.name.clone(),
                        message: "required parameter missing".to_string(),
                    });
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.params.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(validated)
    }
}

/// Schemas for the built-in `sync` command family
pub fn builtin_specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("sync:status", 0, 0),
        CommandSpec::new("sync:force", 0, 2),
        CommandSpec::new("sync:watch", 1, 1)
            .with_param(
                ParamSpec::new("mode", ParamKind::Choice)
                    .with_default("immediate")
                    .with_allowed(&["immediate", "batch", "scheduled"]),
            )
            .with_param(ParamSpec::new("recursive", ParamKind::Flag))
            .with_param(ParamSpec::new("target", ParamKind::Text)),
        CommandSpec::new("sync:unwatch", 1, 1),
        CommandSpec::new("sync:conflicts", 0, 2),
        CommandSpec::new("sync:resolve", 1, 3),
        CommandSpec::new("sync:history", 0, 1)
            .with_param(ParamSpec::new("limit", ParamKind::Integer).with_default("10")),
        CommandSpec::new("sync:cleanup", 0, 0)
            .with_param(ParamSpec::new("max-age", ParamKind::Integer))
            .with_param(ParamSpec::new("max-versions", ParamKind::Integer)),
        CommandSpec::new("sync:config", 0, 2),
    ]
}

/// Schema for a built-in command name, if one is declared
pub fn spec_for(name: &str) -> Option<CommandSpec> {
    builtin_specs().into_iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positionals_and_flags() {
        let cmd = Command::parse("pm:issue-start 123 --verbose --mode fast").unwrap();
        assert_eq!(cmd.name, "pm:issue-start");
        assert_eq!(cmd.args, vec!["123"]);
        assert_eq!(cmd.params.get("verbose").map(String::as_str), Some("true"));
        assert_eq!(cmd.params.get("mode").map(String::as_str), Some("fast"));
        assert_eq!(cmd.prefix(), Some("pm"));
    }

    #[test]
    fn test_parse_strips_leading_slash() {
        let cmd = Command::parse("/sc:analyze main.ts").unwrap();
        assert_eq!(cmd.name, "sc:analyze");
        assert_eq!(cmd.args, vec!["main.ts"]);
        assert_eq!(cmd.prefix(), Some("sc"));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(Command::parse("   ").is_err());
    }

    #[test]
    fn test_validate_applies_defaults_and_checks_kinds() {
        let spec = CommandSpec::new("sync:history", 0, 1)
            .with_param(ParamSpec::new("limit", ParamKind::Integer).with_default("10"));

        let cmd = Command::parse("sync:history").unwrap();
        let validated = spec.validate(&cmd).unwrap();
        assert_eq!(validated.params.get("limit").map(String::as_str), Some("10"));

        let cmd = Command::parse("sync:history --limit abc").unwrap();
        assert!(spec.validate(&cmd).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_flags() {
        let spec = CommandSpec::new("sync:status", 0, 0);
        let cmd = Command::parse("sync:status --bogus").unwrap();
        assert!(spec.validate(&cmd).is_err());
    }

    #[test]
    fn test_builtin_specs_cover_the_sync_family() {
        let specs = builtin_specs();
        for name in [
            "sync:status",
            "sync:force",
            "sync:watch",
            "sync:unwatch",
            "sync:conflicts",
            "sync:resolve",
            "sync:history",
            "sync:cleanup",
            "sync:config",
        ] {
            assert!(specs.iter().any(|s| s.name == name), "{name}");
        }
        assert!(spec_for("sync:status").is_some());
        assert!(spec_for("nope").is_none());
    }

    #[test]
    fn test_builtin_watch_spec_validates_mode() {
        let spec = spec_for("sync:watch").unwrap();
        let ok = Command::parse("sync:watch config/app.json --mode batch").unwrap();
        assert!(spec.validate(&ok).is_ok());
        let bad = Command::parse("sync:watch config/app.json --mode warp").unwrap();
        assert!(spec.validate(&bad).is_err());
    }

    #[test]
    fn test_validate_choice_kind() {
        let spec = CommandSpec::new("sync:resolve", 1, 3).with_param(
            ParamSpec::new("severity", ParamKind::Choice).with_allowed(&["low", "high"]),
        );
        let ok = Command::parse("sync:resolve newest-wins --severity high").unwrap();
        assert!(spec.validate(&ok).is_ok());
        let bad = Command::parse("sync:resolve newest-wins --severity extreme").unwrap();
        assert!(spec.validate(&bad).is_err());
    }
}
