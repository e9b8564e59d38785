//! A single supervised child process: spawn, output capture, stats, and
//! termination.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::CommandConfig;
use crate::error::BroodError;
use crate::fanout::Fanout;
use crate::message::{Event, EventKind, Message, Verbosity};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Point-in-time resource usage of a command's primary child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandStats {
    pub cpu_percent: Option<f32>,
    pub memory_bytes: Option<u64>,
}

struct Inner {
    id: u64,
    config: CommandConfig,
    pid: u32,
    pgid: u32,
    start_time: Instant,
    stop_time: Mutex<Option<Instant>>,
    was_killed: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    stats: Mutex<CommandStats>,
    stats_task: Mutex<Option<JoinHandle<()>>>,
}

/// A running (or finished) supervised command.
///
/// Cheap to clone — every clone is a handle onto the same underlying
/// process, the same pattern `ManagedSession` uses via its own internal
/// `Arc`s, just hoisted one level so the whole `Command` is one handle.
#[derive(Clone)]
pub struct Command {
    inner: Arc<Inner>,
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}
impl Eq for Command {}
impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Command {
    /// Spawn `config.command_string()` in its own process group with
    /// combined stdout+stderr, publish a `Started` event, and schedule the
    /// output reader, stats collector, and waiter tasks.
    pub async fn start(
        config: CommandConfig,
        events: Fanout<Event>,
        messages: Fanout<Message>,
        width: u16,
    ) -> Result<Command, BroodError> {
        messages.put(Message::internal(
            format!("Starting command: {:?}", config.command_string()),
            Verbosity::Info,
        ));

        // Merge stderr into stdout the way `asyncio.subprocess.STDOUT` does,
        // by doing the redirection inside the subshell itself.
        let shell_line = format!("{} 2>&1", config.command_string());

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&shell_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env("FORCE_COLOR", "true")
            .env("COLUMNS", width.to_string())
            .kill_on_drop(true);

        // SAFETY: setpgid(0, 0) is async-signal-safe per POSIX.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child: Child = cmd
            .spawn()
            .map_err(|e| BroodError::SpawnFailure(format!("{:?}: {e}", config.command_string())))?;

        let pid = child.id().ok_or_else(|| {
            BroodError::SpawnFailure(format!(
                "{:?}: process had no pid immediately after spawn",
                config.command_string()
            ))
        })?;
        // The child calls setpgid(0, 0) before exec, so it is its own group leader.
        let pgid = pid;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BroodError::SpawnFailure("failed to take stdout pipe".to_string()))?;

        let command = Command {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                config: config.clone(),
                pid,
                pgid,
                start_time: Instant::now(),
                stop_time: Mutex::new(None),
                was_killed: AtomicBool::new(false),
                exit_code: Mutex::new(None),
                stats: Mutex::new(CommandStats::default()),
                stats_task: Mutex::new(None),
            }),
        };

        events.put(Event {
            command: command.clone(),
            kind: EventKind::Started,
        });

        let reader_task = tokio::spawn(Self::read_output(
            stdout,
            messages.clone(),
            config.clone(),
        ));
        let stats_task = tokio::spawn(command.clone().collect_stats());
        *command.inner.stats_task.lock().unwrap() = Some(stats_task);

        tokio::spawn(command.clone().wait_for_exit(child, reader_task, events));

        Ok(command)
    }

    /// Build a synthetic already-exited command representing a spawn
    /// failure, so the supervisor can still publish the usual
    /// Started-then-Stopped pair for it.
    pub fn failed(config: CommandConfig) -> Command {
        let now = Instant::now();
        Command {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                config,
                pid: 0,
                pgid: 0,
                start_time: now,
                stop_time: Mutex::new(Some(now)),
                was_killed: AtomicBool::new(false),
                exit_code: Mutex::new(Some(-1)),
                stats: Mutex::new(CommandStats::default()),
                stats_task: Mutex::new(None),
            }),
        }
    }

    /// Build a synthetic already-exited command with an arbitrary exit code
    /// and kill flag, for exercising `Starter`/`Supervisor` event handling
    /// without spawning a real process.
    #[cfg(test)]
    pub fn test_exited(config: CommandConfig, exit_code: i32, was_killed: bool) -> Command {
        let now = Instant::now();
        Command {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                config,
                pid: 0,
                pgid: 0,
                start_time: now,
                stop_time: Mutex::new(Some(now)),
                was_killed: AtomicBool::new(was_killed),
                exit_code: Mutex::new(Some(exit_code)),
                stats: Mutex::new(CommandStats::default()),
                stats_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.inner.config
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.inner.exit_code.lock().unwrap()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    pub fn was_killed(&self) -> bool {
        self.inner.was_killed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CommandStats {
        *self.inner.stats.lock().unwrap()
    }

    pub fn elapsed_time(&self) -> Duration {
        match *self.inner.stop_time.lock().unwrap() {
            Some(stop) => stop.saturating_duration_since(self.inner.start_time),
            None => self.inner.start_time.elapsed(),
        }
    }

    fn send_signal(&self, signal: libc::c_int) {
        if self.inner.pgid == 0 {
            return; // synthetic / already-exited command, nothing to signal
        }
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.inner.pgid as libc::pid_t;
        unsafe {
            libc::kill(-pgid, signal);
        }
    }

    /// Send SIGTERM to the process group. No-op if already exited.
    pub fn terminate(&self, messages: &Fanout<Message>) {
        if self.has_exited() {
            return;
        }
        self.inner.was_killed.store(true, Ordering::SeqCst);
        messages.put(Message::internal(
            format!(
                "Terminating command: {:?} (pid {})",
                self.inner.config.command_string(),
                self.inner.pid
            ),
            Verbosity::Info,
        ));
        self.send_signal(libc::SIGTERM);
    }

    /// Send SIGKILL to the process group. No-op if already exited.
    pub fn kill(&self, messages: &Fanout<Message>) {
        if self.has_exited() {
            return;
        }
        self.inner.was_killed.store(true, Ordering::SeqCst);
        messages.put(Message::internal(
            format!(
                "Killing command: {:?} (pid {})",
                self.inner.config.command_string(),
                self.inner.pid
            ),
            Verbosity::Info,
        ));
        self.send_signal(libc::SIGKILL);
    }

    async fn read_output(
        stdout: tokio::process::ChildStdout,
        messages: Fanout<Message>,
        config: CommandConfig,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !line.is_empty() {
                        messages.put(Message::command(line, config.clone()));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        "Output reader for {:?} stopped on I/O error: {e}",
                        config.command_string()
                    );
                    break;
                }
            }
        }
    }

    /// Find the shell's primary child — the actual workload process, since
    /// `self.inner.pid` is only `sh -c "... 2>&1"`. Resolved once, like the
    /// Python ancestor's `ps` cached property: if the shell has no child yet
    /// (or none anymore), sampling gives up rather than polling forever.
    fn find_primary_child(system: &mut System, shell_pid: Pid) -> Option<Pid> {
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        system
            .processes()
            .values()
            .find(|process| process.parent() == Some(shell_pid))
            .map(sysinfo::Process::pid)
    }

    async fn collect_stats(self) {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        let shell_pid = Pid::from_u32(self.inner.pid);
        let Some(pid) = Self::find_primary_child(&mut system, shell_pid) else {
            return; // no workload child observed yet — stats are best-effort
        };
        loop {
            if self.has_exited() {
                return;
            }
            let refreshed = system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_cpu().with_memory(),
            );
            if refreshed == 0 {
                return; // gone, access denied, or zombie — stats are best-effort
            }
            if let Some(process) = system.process(pid) {
                *self.inner.stats.lock().unwrap() = CommandStats {
                    cpu_percent: Some(process.cpu_usage()),
                    memory_bytes: Some(process.memory()),
                };
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn wait_for_exit(
        self,
        mut child: Child,
        reader_task: JoinHandle<()>,
        events: Fanout<Event>,
    ) {
        let status = child.wait().await;
        *self.inner.stop_time.lock().unwrap() = Some(Instant::now());

        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("wait() failed for {:?}: {e}", self.inner.config.command_string());
                None
            }
        };
        *self.inner.exit_code.lock().unwrap() = code.or(Some(-1));

        // Drain the reader before publishing Stopped (invariant: every
        // CommandMessage for this command precedes its Stopped event).
        let _ = reader_task.await;

        // Stats collector is best-effort and can simply be aborted now.
        if let Some(handle) = self.inner.stats_task.lock().unwrap().take() {
            handle.abort();
        }

        info!(
            "Command {:?} exited with code {:?}",
            self.inner.config.command_string(),
            self.exit_code()
        );

        events.put(Event {
            command: self.clone(),
            kind: EventKind::Stopped,
        });
    }
}

/// Live set of supervised commands, keyed by identity.
pub type CommandSet = HashSet<Command>;

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, command: &str) -> CommandConfig {
        let json = format!(
            r#"{{"name": "{name}", "command": "{command}", "starter": {{"type": "once"}}}}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn start_publishes_started_then_stopped() {
        let events: Fanout<Event> = Fanout::new();
        let messages: Fanout<Message> = Fanout::new();
        let mut event_consumer = events.consumer();

        let command = Command::start(config("echo", "echo hi"), events, messages, 80)
            .await
            .unwrap();

        let started = event_consumer.recv().await.unwrap();
        assert_eq!(started.kind, EventKind::Started);
        assert_eq!(started.command, command);

        let stopped = event_consumer.recv().await.unwrap();
        assert_eq!(stopped.kind, EventKind::Stopped);
        assert_eq!(command.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn command_output_is_published_as_messages() {
        let events: Fanout<Event> = Fanout::new();
        let messages: Fanout<Message> = Fanout::new();
        let mut message_consumer = messages.consumer();

        let _command = Command::start(config("echo", "echo hello-world"), events, messages, 80)
            .await
            .unwrap();

        loop {
            match message_consumer.recv().await.unwrap() {
                Message::Command { text, .. } => {
                    assert_eq!(text, "hello-world");
                    break;
                }
                Message::Internal { .. } => continue,
            }
        }
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_recorded() {
        let events: Fanout<Event> = Fanout::new();
        let messages: Fanout<Message> = Fanout::new();
        let mut event_consumer = events.consumer();

        let command = Command::start(config("fail", "sh -c 'exit 7'"), events, messages, 80)
            .await
            .unwrap();

        while event_consumer.recv().await.unwrap().kind != EventKind::Stopped {}
        assert_eq!(command.exit_code(), Some(7));
        assert!(!command.was_killed());
    }

    #[tokio::test]
    async fn terminate_sets_was_killed_and_stops_the_process() {
        let events: Fanout<Event> = Fanout::new();
        let messages: Fanout<Message> = Fanout::new();
        let mut event_consumer = events.consumer();

        let command = Command::start(config("sleeper", "sleep 30"), events, messages, 80)
            .await
            .unwrap();
        assert_eq!(event_consumer.recv().await.unwrap().kind, EventKind::Started);

        command.terminate(&Fanout::new());
        while event_consumer.recv().await.unwrap().kind != EventKind::Stopped {}

        assert!(command.was_killed());
        assert!(command.has_exited());
    }

    #[test]
    fn failed_constructor_produces_a_terminal_command() {
        let command = Command::failed(config("boom", "does-not-exist"));
        assert_eq!(command.exit_code(), Some(-1));
        assert!(command.has_exited());
        assert!(!command.was_killed());
    }

    #[test]
    fn identity_is_by_id_not_by_config() {
        let a = Command::failed(config("same", "x"));
        let b = Command::failed(config("same", "x"));
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn find_primary_child_resolves_the_workload_pid_not_the_shell() {
        let mut shell = std::process::Command::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .spawn()
            .unwrap();
        let shell_pid = Pid::from_u32(shell.id());

        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        let mut found = None;
        for _ in 0..50 {
            found = Command::find_primary_child(&mut system, shell_pid);
            if found.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let child_pid = found.expect("shell should have forked `sleep` by now");
        assert_ne!(child_pid, shell_pid);

        shell.kill().ok();
        shell.wait().ok();
    }

    #[test]
    fn find_primary_child_returns_none_when_shell_has_no_children() {
        let mut shell = std::process::Command::new("sh")
            .arg("-c")
            .arg("sleep 5")
            .spawn()
            .unwrap();
        let bogus_pid = Pid::from_u32(shell.id() + 1_000_000);

        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
        );
        assert_eq!(Command::find_primary_child(&mut system, bogus_pid), None);

        shell.kill().ok();
        shell.wait().ok();
    }
}
