//! Top-level orchestration: wires the event/message fanouts between a
//! [`Supervisor`] and a [`LineRenderer`], and runs the shutdown race between
//! them. Grounded on `examples/original_source/brood/executor.py`'s
//! `Executor`, which plays the same role for the Python ancestor's monitor +
//! renderer pair.

use std::collections::HashMap;

use tracing::info;

use crate::config::{BroodConfig, CommandConfig};
use crate::error::RunOutcome;
use crate::fanout::Fanout;
use crate::message::{Event, Message, Verbosity};
use crate::renderer::LineRenderer;
use crate::supervisor::Supervisor;

/// Owns the wiring between the command supervisor and the line renderer, and
/// drives both to completion.
pub struct Executor {
    renderer: LineRenderer,
    supervisor: Supervisor,
    messages: Fanout<Message>,
}

impl Executor {
    /// Build the renderer and supervisor from `config`, snapshotting each
    /// command's output width from the renderer before anything starts —
    /// widths are fixed for a command's whole lifetime, not recomputed per
    /// line.
    pub fn new(config: BroodConfig) -> Self {
        let events: Fanout<Event> = Fanout::new();
        let messages: Fanout<Message> = Fanout::new();

        let renderer = LineRenderer::new(config.renderer.clone(), messages.consumer());

        let mut widths: HashMap<CommandConfig, u16> = HashMap::new();
        for command in &config.commands {
            widths.insert(command.clone(), renderer.available_process_width(command));
            if let Some(shutdown) = command.shutdown_config() {
                let width = renderer.available_process_width(&shutdown);
                widths.insert(shutdown, width);
            }
        }

        let supervisor = Supervisor::new(config, events, messages.clone(), widths);

        Self {
            renderer,
            supervisor,
            messages,
        }
    }

    /// Run until an external signal arrives or the supervisor itself decides
    /// to stop (`KillOthers`/internal error), then run the shutdown
    /// protocol. Returns the reason the run ended.
    pub async fn run(&mut self) -> RunOutcome {
        let outcome = tokio::select! {
            outcome = self.supervisor.run() => outcome,
            () = self.renderer.run(false) => {
                RunOutcome::Internal("message fanout closed unexpectedly".to_string())
            }
            () = wait_for_interrupt() => RunOutcome::Interrupted,
        };

        self.log_shutdown_reason(&outcome);
        self.shutdown().await;
        outcome
    }

    fn log_shutdown_reason(&self, outcome: &RunOutcome) {
        // `KillOthers` carries its own complete, capitalized sentence and is
        // published as-is rather than nested under a "Shutting down due to:"
        // wrapper.
        let (text, verbosity) = match outcome {
            RunOutcome::Interrupted => {
                ("Shutting down due to: keyboard interrupt".to_string(), Verbosity::Info)
            }
            RunOutcome::KillOthers(k) => (k.to_string(), Verbosity::Info),
            RunOutcome::Internal(msg) => {
                (format!("Shutting down due to internal error: {msg}"), Verbosity::Error)
            }
        };
        self.messages.put(Message::internal(text, verbosity));
    }

    /// Stop the supervisor while repeatedly draining the renderer so output
    /// produced during shutdown (including synthesized `shutdown` commands)
    /// still reaches stdout. Grounded on `Executor.__aexit__`'s
    /// `stop_monitor`/`drain_renderer` `FIRST_COMPLETED` race.
    async fn shutdown(&mut self) {
        let mut stop = Box::pin(self.supervisor.stop());
        loop {
            tokio::select! {
                () = &mut stop => break,
                () = self.renderer.run(true) => {}
            }
        }
        // Final drain: anything published by `stop()` right before it
        // resolved but after the last drain tick started.
        self.renderer.run(true).await;
        info!("brood shutdown complete");
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(commands_json: &str) -> BroodConfig {
        let json = format!(r#"{{"commands": [{commands_json}]}}"#);
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn shutdown_completes_immediately_when_nothing_was_started() {
        // `run()` itself is awkward to unit-test: it only returns on a real
        // OS signal or a supervisor-detected failure. `shutdown()` is
        // exercised directly here, on an executor that never called `run`,
        // to check it doesn't hang waiting on commands that never started.
        let config = config_with(
            r#"{"name": "a", "command": "sleep 30", "starter": {"type": "once"}}"#,
        );
        let mut executor = Executor::new(config);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn kill_others_shutdown_reason_is_published_standalone() {
        let config = config_with(
            r#"{"name": "a", "command": "sleep 30", "starter": {"type": "once"}}"#,
        );
        let executor = Executor::new(config);
        let mut observer = executor.messages.consumer();

        let outcome = RunOutcome::KillOthers(crate::error::KillOthers {
            command_name: "a".to_string(),
            command_string: "exit 7".to_string(),
            exit_code: Some(7),
        });
        executor.log_shutdown_reason(&outcome);

        let message = observer.recv().await.unwrap();
        match message {
            Message::Internal { text, .. } => assert_eq!(
                text,
                "Killing other processes due to command failing with code 7: 'exit 7'"
            ),
            Message::Command { .. } => panic!("expected an internal message"),
        }
    }
}
