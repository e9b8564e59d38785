//! Per-command starter policies deciding when a command may (re)launch.
//!
//! A [`Starter`] is a tagged enum rather than a trait object: the variant set
//! is small, closed, and rarely extended.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::{CommandConfig, StarterConfig};
use crate::message::{Event, EventKind};

/// Runtime state for one command's starter policy.
#[derive(Debug, Clone)]
pub enum Starter {
    Once {
        started: bool,
    },
    Restart {
        delay: Duration,
        started: bool,
        /// Set by `handle_event` when the most recent stop of this command
        /// was a kill (e.g. part of `KillOthers` shutdown), suppressing the
        /// next restart.
        suppressed: bool,
    },
    /// Transitions for `Watch` commands are owned by the file-watcher path;
    /// `can_start` is always false here.
    Watch,
    After {
        waiting_for: HashSet<String>,
        done: HashSet<String>,
    },
}

impl Starter {
    pub fn new(config: &StarterConfig) -> Self {
        match config {
            StarterConfig::Once => Self::Once { started: false },
            StarterConfig::Restart { delay } => Self::Restart {
                delay: Duration::from_secs_f64(delay.max(0.0)),
                started: false,
                suppressed: false,
            },
            StarterConfig::Watch { .. } => Self::Watch,
            StarterConfig::After { after } => Self::After {
                waiting_for: after.iter().cloned().collect(),
                done: HashSet::new(),
            },
        }
    }

    /// Delay to apply before the next scheduled start, or zero.
    pub fn start_delay(&self) -> Duration {
        match self {
            Self::Restart { delay, .. } => *delay,
            _ => Duration::ZERO,
        }
    }

    /// Whether this command is currently eligible to be launched.
    pub fn can_start(&self) -> bool {
        match self {
            Self::Once { started } => !started,
            Self::Restart {
                started,
                suppressed,
                ..
            } => !started && !suppressed,
            Self::Watch => false,
            Self::After {
                waiting_for, done, ..
            } => waiting_for.is_subset(done),
        }
    }

    /// Called immediately before the Supervisor schedules a start, so the
    /// starter doesn't re-fire until its next eligibility window.
    pub fn was_started(&mut self) {
        match self {
            Self::Once { started } => *started = true,
            Self::Restart { started, .. } => *started = true,
            Self::Watch => {}
            Self::After { done, .. } => done.clear(),
        }
    }

    /// Feed a peer (or own) lifecycle event to this starter. Every starter
    /// sees every event — `After` needs peer Stopped events to track its
    /// prerequisite set, filtered by comparing the event's command name
    /// against its own `waiting_for` set. `own_config` is this starter's
    /// owning command, so `Restart` can apply the same self-filtering: a
    /// peer's Stopped event must never reset this starter's own delay/kill
    /// state.
    pub fn handle_event(&mut self, event: &Event, own_config: &CommandConfig) {
        match self {
            Self::Once { .. } | Self::Watch => {}
            Self::Restart {
                started,
                suppressed,
                ..
            } => {
                if event.kind == EventKind::Stopped && event.command.config() == own_config {
                    *started = false;
                    *suppressed = event.command.was_killed();
                }
            }
            Self::After { done, .. } => {
                if event.kind == EventKind::Stopped && event.command.exit_code() == Some(0) {
                    done.insert(event.command.config().name.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::config::CommandConfig;
    use crate::message::EventKind;

    fn config(name: &str) -> CommandConfig {
        let json =
            format!(r#"{{"name": "{name}", "command": "x", "starter": {{"type": "once"}}}}"#);
        serde_json::from_str(&json).unwrap()
    }

    fn stopped_event(name: &str, exit_code: i32, was_killed: bool) -> Event {
        Event {
            command: Command::test_exited(config(name), exit_code, was_killed),
            kind: EventKind::Stopped,
        }
    }

    #[test]
    fn once_starts_exactly_once() {
        let mut starter = Starter::new(&StarterConfig::Once);
        assert!(starter.can_start());
        starter.was_started();
        assert!(!starter.can_start());
    }

    #[test]
    fn restart_becomes_eligible_again_after_stop() {
        let mut starter = Starter::new(&StarterConfig::Restart { delay: 1.0 });
        assert!(starter.can_start());
        starter.was_started();
        assert!(!starter.can_start());

        let event = stopped_event("svc", 1, false);
        starter.handle_event(&event, &config("svc"));
        assert!(starter.can_start());
    }

    #[test]
    fn restart_is_suppressed_after_kill() {
        let mut starter = Starter::new(&StarterConfig::Restart { delay: 0.0 });
        starter.was_started();

        let event = stopped_event("svc", -1, true);
        starter.handle_event(&event, &config("svc"));

        assert!(!starter.can_start());
    }

    #[test]
    fn restart_ignores_a_peer_commands_stopped_event() {
        let mut starter = Starter::new(&StarterConfig::Restart { delay: 1.0 });
        starter.was_started();
        assert!(!starter.can_start());

        // A different command stopping must not reset this starter's
        // started/suppressed state or cause a duplicate start.
        let peer_stopped = stopped_event("other", 1, true);
        starter.handle_event(&peer_stopped, &config("svc"));

        assert!(!starter.can_start());
    }

    #[test]
    fn watch_never_starts_itself() {
        let starter = Starter::Watch;
        assert!(!starter.can_start());
    }

    #[test]
    fn after_with_empty_prerequisites_starts_immediately() {
        let starter = Starter::new(&StarterConfig::After { after: vec![] });
        assert!(starter.can_start());
    }

    #[test]
    fn after_waits_for_all_prerequisites() {
        let mut starter = Starter::new(&StarterConfig::After {
            after: vec!["a".to_string(), "b".to_string()],
        });
        assert!(!starter.can_start());

        let a_done = stopped_event("a", 0, false);
        starter.handle_event(&a_done, &config("downstream"));
        assert!(!starter.can_start()); // "b" still missing

        let b_done = stopped_event("b", 0, false);
        starter.handle_event(&b_done, &config("downstream"));
        assert!(starter.can_start());
    }

    #[test]
    fn after_ignores_nonzero_exit_prerequisites() {
        let mut starter = Starter::new(&StarterConfig::After {
            after: vec!["a".to_string()],
        });
        let event = stopped_event("a", 1, false);
        starter.handle_event(&event, &config("downstream"));
        assert!(!starter.can_start());
    }

    #[test]
    fn was_started_clears_after_done_set() {
        let mut starter = Starter::new(&StarterConfig::After { after: vec![] });
        assert!(starter.can_start());
        starter.was_started();
        if let Starter::After { done, .. } = &starter {
            assert!(done.is_empty());
        } else {
            panic!("expected After variant");
        }
    }
}
