//! Configuration loading, defaults, and validation.
//!
//! A [`BroodConfig`] is loaded from JSON, TOML, or YAML — format is chosen by
//! the file extension, exactly as `brood`'s Python ancestor dispatched on
//! `identify.tags_from_path`. There is no environment-variable override
//! layer here: a supervisor's command set is declarative and has no safe
//! partial-override story.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::BroodError;

/// `command` (and `shutdown`) accept either a single shell string or an
/// argv-style list of words, normalized to a single string at load time.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CommandLine {
    Single(String),
    Argv(Vec<String>),
}

/// Per-command starter policy: when and how a command gets (re)started.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StarterConfig {
    Once,
    Restart {
        #[serde(default)]
        delay: f64,
    },
    Watch {
        paths: Vec<PathBuf>,
        #[serde(default)]
        poll: bool,
        #[serde(default)]
        allow_multiple: bool,
    },
    After {
        after: Vec<String>,
    },
}

/// One user-declared shell command and the policy governing its lifecycle.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    #[serde(rename = "command")]
    command_line: CommandLine,
    #[serde(rename = "shutdown", default)]
    shutdown_line: Option<CommandLine>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub prefix_style: Option<String>,
    pub starter: StarterConfig,
}

impl CommandConfig {
    /// The shell command to run, normalized to a single string.
    pub fn command_string(&self) -> String {
        match &self.command_line {
            CommandLine::Single(s) => s.clone(),
            CommandLine::Argv(words) => words.join(" "),
        }
    }

    /// Build the synthetic *Once* command run after this command's parent
    /// process exits during shutdown, or `None` if no `shutdown` was
    /// declared.
    pub fn shutdown_config(&self) -> Option<CommandConfig> {
        let shutdown_line = self.shutdown_line.clone()?;
        Some(CommandConfig {
            name: format!("{}-shutdown", self.name),
            command_line: shutdown_line,
            shutdown_line: None,
            prefix: self.prefix.clone(),
            prefix_style: self.prefix_style.clone(),
            starter: StarterConfig::Once,
        })
    }
}

// Identity is by `name`: names are declared unique (validated at load time)
// and configs are shared by value across Command/Starter/widths maps.
impl PartialEq for CommandConfig {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for CommandConfig {}
impl Hash for CommandConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    Continue,
    KillOthers,
}

impl Default for FailureMode {
    fn default() -> Self {
        // Matches upstream `brood`'s `Config.failure_mode` default.
        Self::KillOthers
    }
}

/// Rendering defaults shared by all commands unless a command overrides them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub prefix: String,
    pub prefix_style: String,
    pub message_style: String,
    pub internal_prefix: String,
    pub internal_prefix_style: String,
    pub internal_message_style: String,
    pub verbose: bool,
    pub default_width: u16,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            prefix: "{timestamp} {name} ".to_string(),
            prefix_style: String::new(),
            message_style: String::new(),
            internal_prefix: "{timestamp} ".to_string(),
            internal_prefix_style: "dim".to_string(),
            internal_message_style: "dim".to_string(),
            verbose: false,
            default_width: 80,
        }
    }
}

/// Top-level configuration: the full set of commands to supervise.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroodConfig {
    pub failure_mode: FailureMode,
    pub commands: Vec<CommandConfig>,
    pub renderer: RendererConfig,
}

impl Default for BroodConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::default(),
            commands: Vec::new(),
            renderer: RendererConfig::default(),
        }
    }
}

impl BroodConfig {
    /// Load and validate a config file, dispatching format by extension.
    pub fn load(path: &Path) -> Result<Self, BroodError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BroodError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_str_with_extension(&text, path)?;
        config.validate()?;
        Ok(config)
    }

    fn from_str_with_extension(text: &str, path: &Path) -> Result<Self, BroodError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(text)
                .map_err(|e| BroodError::Config(format!("invalid JSON: {e}"))),
            Some("toml") => {
                toml::from_str(text).map_err(|e| BroodError::Config(format!("invalid TOML: {e}")))
            }
            Some("yaml" | "yml") => serde_yaml::from_str(text)
                .map_err(|e| BroodError::Config(format!("invalid YAML: {e}"))),
            _ => Err(BroodError::UnknownFormat(path.display().to_string())),
        }
    }

    /// Reject duplicate names and `After` prerequisites naming an unknown
    /// command.
    pub fn validate(&self) -> Result<(), BroodError> {
        let mut seen = HashSet::new();
        for command in &self.commands {
            if !seen.insert(command.name.as_str()) {
                return Err(BroodError::Config(format!(
                    "duplicate command name: {:?}",
                    command.name
                )));
            }
        }

        for command in &self.commands {
            if let StarterConfig::After { after } = &command.starter {
                for dep in after {
                    if !seen.contains(dep.as_str()) {
                        return Err(BroodError::Config(format!(
                            "command {:?} depends on unknown command {:?}",
                            command.name, dep
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml() {
        let toml = r#"
            failure_mode = "kill_others"

            [[commands]]
            name = "a"
            command = "echo hi"
            starter = { type = "once" }
        "#;
        let config: BroodConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.commands.len(), 1);
        assert_eq!(config.commands[0].command_string(), "echo hi");
        assert_eq!(config.failure_mode, FailureMode::KillOthers);
    }

    #[test]
    fn loads_argv_command() {
        let json =
            r#"{"commands": [{"name": "a", "command": ["echo", "hi"], "starter": {"type": "once"}}]}"#;
        let config: BroodConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.commands[0].command_string(), "echo hi");
    }

    #[test]
    fn rejects_duplicate_names() {
        let json = r#"{"commands": [
            {"name": "a", "command": "x", "starter": {"type": "once"}},
            {"name": "a", "command": "y", "starter": {"type": "once"}}
        ]}"#;
        let config: BroodConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_after_unknown_dependency() {
        let json = r#"{"commands": [
            {"name": "a", "command": "x", "starter": {"type": "after", "after": ["missing"]}}
        ]}"#;
        let config: BroodConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn shutdown_config_is_synthesized_once_command() {
        let json = r#"{"commands": [
            {"name": "a", "command": "x", "shutdown": "bye", "starter": {"type": "once"}}
        ]}"#;
        let config: BroodConfig = serde_json::from_str(json).unwrap();
        let shutdown = config.commands[0].shutdown_config().unwrap();
        assert_eq!(shutdown.name, "a-shutdown");
        assert_eq!(shutdown.command_string(), "bye");
        assert!(matches!(shutdown.starter, StarterConfig::Once));
    }

    #[test]
    fn no_shutdown_declared_means_no_shutdown_config() {
        let json = r#"{"commands": [
            {"name": "a", "command": "x", "starter": {"type": "once"}}
        ]}"#;
        let config: BroodConfig = serde_json::from_str(json).unwrap();
        assert!(config.commands[0].shutdown_config().is_none());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = BroodConfig::from_str_with_extension("{}", Path::new("config.ini")).unwrap_err();
        assert!(matches!(err, BroodError::UnknownFormat(_)));
    }
}
