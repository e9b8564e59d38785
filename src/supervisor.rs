//! The `Supervisor`: owns the live command set, the per-command starter
//! policies, the file watchers, and the multi-phase shutdown protocol.
//!
//! Mutable state (`commands`, `starters`, `watchers`) is confined to whatever
//! task is currently calling into `Supervisor` — there is never more than one
//! such task at a time, so the discipline is "only `run`/`stop` touch `self`
//! directly" rather than a lock.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::{BroodConfig, CommandConfig, FailureMode, StarterConfig};
use crate::error::{KillOthers, RunOutcome};
use crate::fanout::{Consumer, Fanout};
use crate::message::{Event, EventKind, Message, Verbosity};
use crate::starter::Starter;
use crate::watch::{FileWatcher, WatchEvent};

/// How long to coalesce a burst of filesystem events for one `Watch`
/// command before acting on them.
const WATCH_DEBOUNCE: Duration = Duration::from_secs(1);

/// How long to wait for a SIGTERM'd command to exit on its own before
/// escalating to SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// How long to wait for a SIGKILL'd command to actually exit before giving
/// up on the drain and proceeding anyway.
const KILL_GRACE: Duration = Duration::from_secs(2);

pub struct Supervisor {
    config: BroodConfig,
    events: Fanout<Event>,
    messages: Fanout<Message>,
    events_consumer: Consumer<Event>,
    /// Column width available to each command's output, snapshotted from the
    /// renderer before any command starts. Falls back to the renderer's
    /// configured default for configs missing an entry (notably synthesized
    /// shutdown/failed configs).
    widths: HashMap<CommandConfig, u16>,
    default_width: u16,

    commands: HashSet<Command>,
    watchers: Vec<FileWatcher>,
    starters: HashMap<CommandConfig, Starter>,
}

impl Supervisor {
    pub fn new(
        config: BroodConfig,
        events: Fanout<Event>,
        messages: Fanout<Message>,
        widths: HashMap<CommandConfig, u16>,
    ) -> Self {
        let starters = config
            .commands
            .iter()
            .map(|c| (c.clone(), Starter::new(&c.starter)))
            .collect();
        let events_consumer = events.consumer();
        let default_width = config.renderer.default_width;

        Self {
            config,
            events,
            messages,
            events_consumer,
            widths,
            default_width,
            commands: HashSet::new(),
            watchers: Vec::new(),
            starters,
        }
    }

    fn width_for(&self, config: &CommandConfig) -> u16 {
        *self.widths.get(config).unwrap_or(&self.default_width)
    }

    /// Drive the supervisor until a `KillOthers`-mode failure or an internal
    /// error occurs. Does not return on its own otherwise — the caller races
    /// this against an interrupt signal and calls [`Supervisor::stop`].
    pub async fn run(&mut self) -> RunOutcome {
        self.start_initial_commands().await;
        let mut watch_rx = self.start_watchers();

        loop {
            if self.watchers.is_empty() {
                match self.events_consumer.recv().await {
                    Some(event) => {
                        if let Err(outcome) = self.handle_event(event).await {
                            return outcome;
                        }
                    }
                    None => return RunOutcome::Internal("event fanout closed".to_string()),
                }
                continue;
            }

            tokio::select! {
                event = self.events_consumer.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(outcome) = self.handle_event(event).await {
                                return outcome;
                            }
                        }
                        None => return RunOutcome::Internal("event fanout closed".to_string()),
                    }
                }
                batch = drain_watch_events(&mut watch_rx) => {
                    match batch {
                        Some(events) => self.handle_watch_batch(events).await,
                        None => continue,
                    }
                }
            }
        }
    }

    /// Terminate → drain → run shutdown commands → drain again: a two-phase
    /// SIGTERM-then-wait escalation per command, run twice.
    pub async fn stop(&mut self) {
        self.terminate();
        self.wait_for_drain().await;
        self.shutdown().await;
        self.wait_for_drain().await;
    }

    fn terminate(&mut self) {
        for command in &self.commands {
            command.terminate(&self.messages);
        }
        self.watchers.clear();
    }

    /// Wait for every live command to exit, escalating to SIGKILL on any
    /// still-live command once `TERMINATE_GRACE` elapses — the same
    /// SIGTERM-then-poll-then-SIGKILL escalation the session manager this
    /// crate grew out of applies across all its live sessions at once.
    async fn wait_for_drain(&mut self) {
        let deadline = Instant::now() + TERMINATE_GRACE;
        loop {
            if self.commands.is_empty() && self.events_consumer.is_empty() {
                return;
            }
            tokio::select! {
                event = self.events_consumer.recv() => {
                    let Some(event) = event else { return };
                    // A KillOthers result can surface here if an unrelated
                    // live command exits nonzero mid-shutdown without having
                    // been terminated by us; shutdown proceeds regardless.
                    let _ = self.handle_event(event).await;
                }
                () = tokio::time::sleep_until(deadline) => {
                    if self.commands.is_empty() {
                        return;
                    }
                    warn!(
                        "{} command(s) still alive {TERMINATE_GRACE:?} after SIGTERM, escalating to SIGKILL",
                        self.commands.len()
                    );
                    for command in &self.commands {
                        command.kill(&self.messages);
                    }
                    self.drain_after_kill().await;
                    return;
                }
            }
        }
    }

    /// Bounded final drain after a SIGKILL escalation: SIGKILL cannot be
    /// caught, so commands should exit almost immediately, but this still
    /// gives up after `KILL_GRACE` rather than hang forever on a process
    /// stuck in an unkillable state (e.g. uninterruptible I/O).
    async fn drain_after_kill(&mut self) {
        let deadline = Instant::now() + KILL_GRACE;
        loop {
            if self.commands.is_empty() {
                return;
            }
            tokio::select! {
                event = self.events_consumer.recv() => {
                    let Some(event) = event else { return };
                    let _ = self.handle_event(event).await;
                }
                () = tokio::time::sleep_until(deadline) => {
                    warn!(
                        "{} command(s) still alive {KILL_GRACE:?} after SIGKILL, giving up on drain",
                        self.commands.len()
                    );
                    return;
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        let shutdown_configs: Vec<CommandConfig> = self
            .config
            .commands
            .iter()
            .filter_map(CommandConfig::shutdown_config)
            .collect();

        for config in shutdown_configs {
            self.start_command(config).await;
        }
    }

    async fn start_initial_commands(&mut self) {
        let mut pending = Vec::new();
        for config in self.config.commands.clone() {
            let starter = self
                .starters
                .get_mut(&config)
                .expect("every configured command has a starter");
            if starter.can_start() {
                starter.was_started();
                pending.push(config);
            }
        }
        for config in pending {
            self.start_command(config).await;
        }
    }

    async fn start_command(&mut self, config: CommandConfig) {
        let width = self.width_for(&config);
        match Command::start(config.clone(), self.events.clone(), self.messages.clone(), width).await {
            Ok(_) => {}
            Err(e) => {
                self.messages.put(Message::internal(e.to_string(), Verbosity::Error));
                // Synthesize Started-then-Stopped so Starters and the
                // failure-mode check still observe a normal lifecycle.
                let failed = Command::failed(config);
                self.events.put(Event {
                    command: failed.clone(),
                    kind: EventKind::Started,
                });
                self.events.put(Event {
                    command: failed,
                    kind: EventKind::Stopped,
                });
            }
        }
    }

    fn start_watchers(&mut self) -> UnboundedReceiver<WatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for config in self.config.commands.clone() {
            if let StarterConfig::Watch { paths, poll, .. } = &config.starter {
                match FileWatcher::start(config.clone(), paths, *poll, tx.clone()) {
                    Ok(watcher) => self.watchers.push(watcher),
                    Err(e) => self
                        .messages
                        .put(Message::internal(e.to_string(), Verbosity::Error)),
                }
            }
        }
        rx
    }

    async fn handle_event(&mut self, event: Event) -> Result<(), RunOutcome> {
        self.messages.put(Message::internal(
            format!(
                "Got event for command '{}' of type {:?}",
                event.command.config().name,
                event.kind
            ),
            Verbosity::Debug,
        ));

        match event.kind {
            EventKind::Started => {
                self.commands.insert(event.command.clone());
            }
            EventKind::Stopped => {
                if !self.commands.remove(&event.command) {
                    // Repeated Stopped for the same command is tolerated as a
                    // no-op — it happens during shutdown.
                    return Ok(());
                }

                self.messages.put(Message::internal(
                    format!(
                        "Command exited with code {:?}: {:?}",
                        event.command.exit_code(),
                        event.command.config().command_string()
                    ),
                    Verbosity::Info,
                ));

                if self.config.failure_mode == FailureMode::KillOthers
                    && event.command.exit_code() != Some(0)
                    && !event.command.was_killed()
                {
                    return Err(RunOutcome::KillOthers(KillOthers {
                        command_name: event.command.config().name.clone(),
                        command_string: event.command.config().command_string(),
                        exit_code: event.command.exit_code(),
                    }));
                }
            }
        }

        self.dispatch_eligible_starts(&event).await;

        Ok(())
    }

    async fn dispatch_eligible_starts(&mut self, event: &Event) {
        let mut to_start = Vec::new();

        for (config, starter) in self.starters.iter_mut() {
            starter.handle_event(event, config);

            let can_start = starter.can_start();
            let already_running = self.commands.iter().any(|c| c.config() == config);

            if can_start && !already_running {
                debug!("Command {:?} is ready to start", config.name);
                starter.was_started();
                to_start.push((config.clone(), starter.start_delay()));
            }
        }

        for (config, delay) in to_start {
            let events = self.events.clone();
            let messages = self.messages.clone();
            let width = self.width_for(&config);
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if let Err(e) =
                    Command::start(config.clone(), events.clone(), messages.clone(), width).await
                {
                    messages.put(Message::internal(e.to_string(), Verbosity::Error));
                    let failed = Command::failed(config);
                    events.put(Event {
                        command: failed.clone(),
                        kind: EventKind::Started,
                    });
                    events.put(Event {
                        command: failed,
                        kind: EventKind::Stopped,
                    });
                }
            });
        }
    }

    async fn handle_watch_batch(&mut self, batch: Vec<WatchEvent>) {
        let mut latest: HashMap<CommandConfig, WatchEvent> = HashMap::new();
        for event in batch {
            latest.insert(event.command_config.clone(), event);
        }

        for config in latest.keys() {
            let allow_multiple = matches!(
                &config.starter,
                StarterConfig::Watch { allow_multiple: true, .. }
            );
            if allow_multiple {
                continue;
            }
            let live: Vec<Command> = self
                .commands
                .iter()
                .filter(|c| c.config() == config)
                .cloned()
                .collect();
            for command in live {
                command.terminate(&self.messages);
            }
        }

        for (config, event) in &latest {
            self.messages.put(Message::internal(
                format!(
                    "Path {} was {:?}, starting command: {:?}",
                    event.path.display(),
                    event.kind,
                    config.command_string()
                ),
                Verbosity::Info,
            ));
        }

        for config in latest.into_keys() {
            self.start_command(config).await;
        }
    }
}

/// Collect a burst of watch events, resetting a 1-second window every time a
/// new one arrives, so rapid successive edits coalesce into one restart.
async fn drain_watch_events(rx: &mut UnboundedReceiver<WatchEvent>) -> Option<Vec<WatchEvent>> {
    let first = rx.recv().await?;
    let mut events = vec![first];
    loop {
        tokio::select! {
            _ = tokio::time::sleep(WATCH_DEBOUNCE) => break,
            next = rx.recv() => match next {
                Some(event) => events.push(event),
                None => break,
            },
        }
    }
    Some(events)
}
