//! Command-line surface: a `clap` derive `Cli`/`Commands` enum.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config::BroodConfig;
use crate::error::RunOutcome;
use crate::executor::Executor;
use crate::util::expand_tilde;

/// brood: a multi-process supervisor for declared shell commands.
#[derive(Parser)]
#[command(name = "brood", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a configuration file.
    Run {
        /// Path to the configuration file (JSON/TOML/YAML). Falls back to
        /// `BROOD_CONFIG` if omitted.
        #[arg(env = "BROOD_CONFIG")]
        config_path: PathBuf,
        /// Print the loaded configuration and exit without running anything.
        #[arg(long)]
        dry: bool,
        /// Print extra (debug-level) internal messages as brood runs.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the JSON schema of the configuration format.
    Schema {
        /// Suppress colored output.
        #[arg(long)]
        plain: bool,
    },
    /// Print package name and version.
    Version,
    /// Run `brood run` under a crash-restart supervisor with exponential
    /// backoff, forwarding SIGINT/SIGTERM to the child. This wraps the whole
    /// `brood` process, not an individual supervised command.
    Supervise {
        #[arg(env = "BROOD_CONFIG")]
        config_path: PathBuf,
    },
}

/// Run the `run` subcommand to completion and return the process exit code.
pub async fn run(config_path: PathBuf, dry: bool, verbose: bool) -> i32 {
    let resolved = expand_tilde(&config_path.to_string_lossy()).into_owned();
    let mut config = match BroodConfig::load(&PathBuf::from(&resolved)) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };

    if verbose {
        config.renderer.verbose = true;
    }

    if dry {
        info!("dry run: loaded {} command(s), not starting anything", config.commands.len());
        return 0;
    }

    let mut executor = Executor::new(config);
    match executor.run().await {
        RunOutcome::Interrupted | RunOutcome::KillOthers(_) => 0,
        RunOutcome::Internal(msg) => {
            error!("internal error: {msg}");
            1
        }
    }
}

/// Hand-emitted schema of `BroodConfig`'s shape — the crate carries no
/// `schemars` dependency, so this is a literal document rather than derived.
pub fn schema(plain: bool) {
    let schema = serde_json::json!({
        "title": "BroodConfig",
        "type": "object",
        "properties": {
            "failure_mode": { "type": "string", "enum": ["continue", "kill_others"], "default": "kill_others" },
            "commands": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "command", "starter"],
                    "properties": {
                        "name": { "type": "string" },
                        "command": { "oneOf": [{ "type": "string" }, { "type": "array", "items": { "type": "string" } }] },
                        "shutdown": { "oneOf": [{ "type": "string" }, { "type": "array", "items": { "type": "string" } }] },
                        "prefix": { "type": "string" },
                        "prefix_style": { "type": "string" },
                        "starter": {
                            "oneOf": [
                                { "properties": { "type": { "const": "once" } } },
                                { "properties": { "type": { "const": "restart" }, "delay": { "type": "number", "default": 0 } } },
                                { "properties": { "type": { "const": "watch" }, "paths": { "type": "array", "items": { "type": "string" } }, "poll": { "type": "boolean", "default": false }, "allow_multiple": { "type": "boolean", "default": false } } },
                                { "properties": { "type": { "const": "after" }, "after": { "type": "array", "items": { "type": "string" } } } }
                            ]
                        }
                    }
                }
            },
            "renderer": {
                "type": "object",
                "properties": {
                    "prefix": { "type": "string", "default": "{timestamp} {name} " },
                    "prefix_style": { "type": "string" },
                    "message_style": { "type": "string" },
                    "internal_prefix": { "type": "string", "default": "{timestamp} " },
                    "internal_prefix_style": { "type": "string", "default": "dim" },
                    "internal_message_style": { "type": "string", "default": "dim" },
                    "verbose": { "type": "boolean", "default": false },
                    "default_width": { "type": "integer", "default": 80 }
                }
            }
        }
    });

    let text = serde_json::to_string_pretty(&schema).expect("schema is always serializable");
    if plain {
        println!("{text}");
    } else {
        use colored::Colorize as _;
        println!("{}", text.cyan());
    }
}

pub fn version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}

/// Crash-restart wrapper: re-exec `brood run <config-path>` and restart it
/// with exponential backoff on nonzero/abnormal exit.
pub async fn supervise(config_path: PathBuf) -> ! {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(30);
    let stable_threshold = Duration::from_secs(10);

    let exe = std::env::current_exe().expect("resolve own executable path");

    loop {
        let started = Instant::now();

        let mut cmd = tokio::process::Command::new(&exe);
        cmd.arg("run").arg(&config_path);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("supervise: failed to spawn child: {e}, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                continue;
            }
        };
        let child_pid = child.id();
        info!("supervise: started brood run (pid {child_pid:?})");

        let forward_pid = child_pid;
        let _signal_forwarder = tokio::spawn(async move {
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                    .expect("register SIGINT");
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("register SIGTERM");
            tokio::select! {
                _ = sigint.recv() => forward_signal(forward_pid, libc::SIGINT),
                _ = sigterm.recv() => forward_signal(forward_pid, libc::SIGTERM),
            }
        });

        let status = child.wait().await;
        let uptime = started.elapsed();

        match status {
            Ok(s) if s.success() => {
                info!("supervise: brood run exited cleanly, stopping");
                std::process::exit(0);
            }
            Ok(s) => {
                warn!("supervise: brood run exited: {s} (uptime {:.1}s), restarting in {backoff:?}", uptime.as_secs_f64());
            }
            Err(e) => {
                error!("supervise: wait() failed: {e} (uptime {:.1}s), restarting in {backoff:?}", uptime.as_secs_f64());
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = if uptime >= stable_threshold {
            Duration::from_secs(1)
        } else {
            (backoff * 2).min(max_backoff)
        };
    }
}

fn forward_signal(pid: Option<u32>, signal: libc::c_int) {
    if let Some(pid) = pid {
        #[allow(clippy::cast_possible_wrap)]
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}
