//! Command analysis and feature extraction
//!
//! Turns a parsed command into the features the decision engine scores on:
//! ecosystem classification, intent, a complexity estimate in [0, 1], and
//! the files/technologies/actions the command references.

use serde::{Deserialize, Serialize};
use tandem_core::Command;

/// Ecosystem a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    /// Script-based project management commands (`pm:*`)
    Pm,
    /// Agent-framework commands (`/sc:*`)
    SuperClaude,
    /// Commands touching both ecosystems
    Hybrid,
    Unknown,
}

/// Coarse intent of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Analyze,
    Build,
    Test,
    Deploy,
    Manage,
    Query,
    Unknown,
}

/// Extracted requirement references
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    pub files: Vec<String>,
    pub technologies: Vec<String>,
    pub actions: Vec<String>,
}

/// Full analysis of one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAnalysis {
    pub command: String,
    pub command_type: CommandType,
    pub intent: Intent,
    /// Complexity estimate in [0, 1]
    pub complexity: f64,
    pub tokens: Vec<String>,
    pub requirements: Requirements,
    /// Salient non-structural words
    pub keywords: Vec<String>,
}

const FILE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "json", "yaml", "yml", "toml", "md",
    "sql", "sh", "css", "html",
];

const TECHNOLOGIES: &[(&str, &str)] = &[
    ("rust", "rust"),
    ("rs", "rust"),
    ("typescript", "typescript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("javascript", "javascript"),
    ("js", "javascript"),
    ("python", "python"),
    ("py", "python"),
    ("docker", "docker"),
    ("kubernetes", "kubernetes"),
    ("k8s", "kubernetes"),
    ("react", "react"),
    ("postgres", "postgres"),
    ("sql", "sql"),
    ("redis", "redis"),
    ("graphql", "graphql"),
];

const ACTIONS: &[&str] = &[
    "analyze", "build", "create", "implement", "test", "validate", "deploy", "release", "start",
    "stop", "sync", "merge", "review", "refactor", "scan", "fix", "migrate", "estimate",
];

/// Extracts routing features from commands
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAnalyzer;

impl ContextAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze a parsed command
    pub fn analyze(&self, command: &Command) -> CommandAnalysis {
        let tokens = self.tokenize(command);
        let command_type = self.classify(command, &tokens);
        let requirements = self.extract_requirements(&tokens);
        let intent = self.detect_intent(command, &requirements);
        let complexity = self.estimate_complexity(&tokens, &requirements);
        let keywords = tokens
            .iter()
            .filter(|t| t.len() > 2 && !t.starts_with("--"))
            .cloned()
            .collect();

        CommandAnalysis {
            command: command.raw.clone(),
            command_type,
            intent,
            complexity,
            tokens,
            requirements,
            keywords,
        }
    }

    fn tokenize(&self, command: &Command) -> Vec<String> {
        let mut tokens = Vec::new();
        for part in command.name.split(':') {
            for piece in part.split('-') {
                if !piece.is_empty() {
                    tokens.push(piece.to_lowercase());
                }
            }
        }
        for arg in &command.args {
            tokens.push(arg.to_lowercase());
        }
        for (key, value) in &command.params {
            tokens.push(key.to_lowercase());
            if value != "true" {
                tokens.push(value.to_lowercase());
            }
        }
        tokens
    }

    fn classify(&self, command: &Command, tokens: &[String]) -> CommandType {
        let prefix = command.prefix();
        let mentions_pm = tokens.iter().any(|t| t == "pm" || t == "epic" || t == "issue");
        let mentions_agent = tokens.iter().any(|t| t == "sc" || t == "agent");
        match prefix {
            Some("sc") if mentions_pm => CommandType::Hybrid,
            Some("sc") => CommandType::SuperClaude,
            Some("pm") if mentions_agent => CommandType::Hybrid,
            Some("pm") => CommandType::Pm,
            _ if mentions_pm && mentions_agent => CommandType::Hybrid,
            _ if mentions_pm => CommandType::Pm,
            _ if mentions_agent => CommandType::SuperClaude,
            _ => CommandType::Unknown,
        }
    }

    fn detect_intent(&self, command: &Command, requirements: &Requirements) -> Intent {
        // The verb segment of the name dominates; extracted actions break ties
        let verb = command
            .name
            .split(':')
            .nth(1)
            .unwrap_or(&command.name)
            .to_lowercase();
        let probe = |word: &str| verb.contains(word) || requirements.actions.iter().any(|a| a == word);

        if probe("analyze") || probe("scan") || probe("review") {
            Intent::Analyze
        } else if probe("build") || probe("create") || probe("implement") || probe("refactor") {
            Intent::Build
        } else if probe("test") || probe("validate") {
            Intent::Test
        } else if probe("deploy") || probe("release") || probe("migrate") {
            Intent::Deploy
        } else if probe("start") || probe("stop") || probe("sync") || probe("merge") {
            Intent::Manage
        } else if verb.contains("status") || verb.contains("show") || verb.contains("list") {
            Intent::Query
        } else {
            Intent::Unknown
        }
    }

    fn extract_requirements(&self, tokens: &[String]) -> Requirements {
        let mut requirements = Requirements::default();
        for token in tokens {
            if let Some((_, ext)) = token.rsplit_once('.') {
                if FILE_EXTENSIONS.contains(&ext) && !requirements.files.contains(token) {
                    requirements.files.push(token.clone());
                }
            }
            for (marker, tech) in TECHNOLOGIES {
                let matches = token == marker
                    || token
                        .rsplit_once('.')
                        .is_some_and(|(_, ext)| ext == *marker);
                if matches && !requirements.technologies.iter().any(|t| t == tech) {
                    requirements.technologies.push((*tech).to_string());
                }
            }
            if ACTIONS.contains(&token.as_str()) && !requirements.actions.contains(token) {
                requirements.actions.push(token.clone());
            }
        }
        requirements
    }

    fn estimate_complexity(&self, tokens: &[String], requirements: &Requirements) -> f64 {
        let score = 0.1
            + 0.05 * tokens.len() as f64
            + 0.15 * requirements.files.len() as f64
            + 0.10 * requirements.technologies.len() as f64
            + 0.10 * requirements.actions.len() as f64;
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(raw: &str) -> CommandAnalysis {
        let command = Command::parse(raw).unwrap();
        ContextAnalyzer::new().analyze(&command)
    }

    #[test]
    fn test_superclaude_analyze_classification() {
        let analysis = analyze("/sc:analyze main.ts");
        assert_eq!(analysis.command_type, CommandType::SuperClaude);
        assert_eq!(analysis.intent, Intent::Analyze);
        assert_eq!(analysis.requirements.files, vec!["main.ts"]);
        assert!(analysis
            .requirements
            .technologies
            .contains(&"typescript".to_string()));
        assert!(analysis.complexity > 0.0 && analysis.complexity <= 1.0);
    }

    #[test]
    fn test_pm_classification_and_manage_intent() {
        let analysis = analyze("pm:issue-start 123");
        assert_eq!(analysis.command_type, CommandType::Pm);
        assert_eq!(analysis.intent, Intent::Manage);
    }

    #[test]
    fn test_hybrid_when_both_ecosystems_appear() {
        let analysis = analyze("/sc:implement epic-123 tasks");
        assert_eq!(analysis.command_type, CommandType::Hybrid);
        assert_eq!(analysis.intent, Intent::Build);
    }

    #[test]
    fn test_unknown_prefix() {
        let analysis = analyze("frobnicate the widget");
        assert_eq!(analysis.command_type, CommandType::Unknown);
    }

    #[test]
    fn test_complexity_grows_with_references() {
        let simple = analyze("pm:status");
        let complex = analyze("/sc:analyze main.ts util.py --deep --focus security");
        assert!(complex.complexity > simple.complexity);
    }

    #[test]
    fn test_complexity_is_clamped() {
        let analysis = analyze(
            "/sc:analyze a.ts b.ts c.ts d.ts e.py f.py g.rs h.rs i.go j.go build test deploy migrate",
        );
        assert!(analysis.complexity <= 1.0);
    }
}
