#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! brood library — a multi-process supervisor for declared shell commands.
//!
//! This library re-exports the key building blocks:
//! - `config` — configuration loading (JSON/TOML/YAML) and validation
//! - `command` — a single supervised child process and its lifecycle tasks
//! - `starter` — per-command policy deciding when a command may (re)launch
//! - `watch` — filesystem watching for `Watch`-starter commands
//! - `supervisor` — owns the live command set and the shutdown protocol
//! - `renderer` — prints captured output and internal notices to stdout
//! - `executor` — composition root joining supervisor and renderer
//! - `fanout` — in-process pub/sub used to wire the above together
//! - `error` — the crate's error and outcome types
//! - `util` — small shared helpers

pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod message;
pub mod renderer;
pub mod starter;
pub mod supervisor;
pub mod util;
pub mod watch;

pub use config::BroodConfig;
pub use error::{BroodError, RunOutcome};
pub use executor::Executor;
