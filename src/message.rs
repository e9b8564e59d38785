//! Lifecycle events and log messages fanned out to the renderer.
//!
//! [`Event`] tracks a [`Command`](crate::command::Command)'s Started/Stopped
//! transitions. [`Message`] carries everything a renderer prints: either an
//! internal supervisor notice or a line of a child's captured output.

use std::cmp::Ordering;
use std::time::SystemTime;

use crate::command::Command;
use crate::config::CommandConfig;

/// Log severity, ordered `Debug < Info < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verbosity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Verbosity {
    fn rank(self) -> u8 {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warning => 2,
            Self::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl PartialOrd for Verbosity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Verbosity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// A lifecycle notice for a [`Command`](crate::command::Command).
///
/// Invariant (enforced by `Command::start`/the waiter task, not this type):
/// for each command exactly one `Started` precedes exactly one `Stopped`.
#[derive(Clone)]
pub struct Event {
    pub command: Command,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Stopped,
}

/// A renderable line: either supervisor-generated or from a child's output.
#[derive(Clone)]
pub enum Message {
    Internal {
        text: String,
        verbosity: Verbosity,
        timestamp: SystemTime,
    },
    Command {
        text: String,
        command_config: CommandConfig,
        timestamp: SystemTime,
    },
}

impl Message {
    pub fn internal(text: impl Into<String>, verbosity: Verbosity) -> Self {
        Self::Internal {
            text: text.into(),
            verbosity,
            timestamp: SystemTime::now(),
        }
    }

    pub fn command(text: impl Into<String>, command_config: CommandConfig) -> Self {
        Self::Command {
            text: text.into(),
            command_config,
            timestamp: SystemTime::now(),
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        match self {
            Self::Internal { verbosity, .. } => *verbosity,
            Self::Command { .. } => Verbosity::Info,
        }
    }
}
