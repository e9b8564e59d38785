//! Error taxonomy for the supervisor.
//!
//! Hand-rolled enum + `Display`, no `thiserror`/`anyhow`.

use std::fmt;

/// Errors the supervisor surfaces. Only [`BroodError::UnknownFormat`] and
/// [`BroodError::Config`] ever reach the process exit code; everything else
/// is routed into the shutdown protocol and reported as a message.
#[derive(Debug)]
pub enum BroodError {
    /// Configuration path has no recognized extension (`.json`/`.toml`/`.yaml`/`.yml`).
    UnknownFormat(String),
    /// Configuration failed to parse or failed validation.
    Config(String),
    /// A child process could not be spawned.
    SpawnFailure(String),
    /// A file watcher backend failed to start or crashed.
    Watcher(String),
}

impl fmt::Display for BroodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFormat(path) => {
                write!(f, "could not load config from {path}: unknown format")
            }
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::SpawnFailure(msg) => write!(f, "failed to spawn process: {msg}"),
            Self::Watcher(msg) => write!(f, "file watcher error: {msg}"),
        }
    }
}

impl std::error::Error for BroodError {}

/// Internal control signal: one command failed with `KillOthers` mode
/// active. Not a `BroodError` variant — it never escapes to the exit code,
/// it only routes `run()` into the shutdown protocol.
#[derive(Debug, Clone)]
pub struct KillOthers {
    pub command_name: String,
    pub command_string: String,
    pub exit_code: Option<i32>,
}

impl fmt::Display for KillOthers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Killing other processes due to command failing with code {}: '{}'",
            self.exit_code
                .map_or_else(|| "?".to_string(), |c| c.to_string()),
            self.command_string
        )
    }
}

/// What stopped `Supervisor::run`.
#[derive(Debug)]
pub enum RunOutcome {
    /// External interrupt (Ctrl-C / SIGTERM) arrived.
    Interrupted,
    /// A `KillOthers`-mode command failed.
    KillOthers(KillOthers),
    /// An unrecoverable internal error.
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_others_message_matches_required_wording() {
        let k = KillOthers {
            command_name: "a".to_string(),
            command_string: "exit 7".to_string(),
            exit_code: Some(7),
        };
        assert_eq!(
            k.to_string(),
            "Killing other processes due to command failing with code 7: 'exit 7'"
        );
    }
}
