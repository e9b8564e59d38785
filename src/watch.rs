//! Filesystem watching for `Watch`-starter commands.
//!
//! Wraps the `notify` crate (native backend, or `PollWatcher` when a command
//! asks for `poll = true`) and filters events through the nearest
//! `.gitignore` using the `ignore` crate's gitignore matcher — the same
//! matcher cargo/ripgrep use, not a hand-rolled glob matcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Config as NotifyConfig, Event as NotifyEvent, EventKind as NotifyEventKind};
use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::CommandConfig;
use crate::error::BroodError;

/// A single filtered filesystem change, tagged with the command it should
/// (re)start.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub command_config: CommandConfig,
    pub path: PathBuf,
    pub kind: NotifyEventKind,
}

/// One running watcher for one `Watch` command. Dropping it stops watching —
/// `notify`'s backends tear down their OS resources in their own `Drop`.
pub struct FileWatcher {
    _inner: Box<dyn NotifyWatcherTrait + Send>,
}

impl FileWatcher {
    /// Start watching `paths` for `command_config`, forwarding accepted
    /// events to `sender`. Uses native OS events unless `poll` is set.
    pub fn start(
        command_config: CommandConfig,
        paths: &[PathBuf],
        poll: bool,
        sender: UnboundedSender<WatchEvent>,
    ) -> Result<FileWatcher, BroodError> {
        let gitignore = nearest_gitignore(paths);

        let handler = move |result: notify::Result<NotifyEvent>| {
            let event = match result {
                Ok(event) => event,
                Err(_) => return,
            };
            if !is_relevant(&event.kind) {
                return;
            }
            for path in &event.paths {
                if path.is_dir() || is_ignored(&gitignore, path) {
                    continue;
                }
                let _ = sender.send(WatchEvent {
                    command_config: command_config.clone(),
                    path: path.clone(),
                    kind: event.kind.clone(),
                });
            }
        };

        let mut inner: Box<dyn NotifyWatcherTrait + Send> = if poll {
            let config = NotifyConfig::default().with_poll_interval(Duration::from_millis(100));
            Box::new(
                PollWatcher::new(handler, config)
                    .map_err(|e| BroodError::Watcher(format!("poll watcher: {e}")))?,
            )
        } else {
            Box::new(
                RecommendedWatcher::new(handler, NotifyConfig::default())
                    .map_err(|e| BroodError::Watcher(format!("native watcher: {e}")))?,
            )
        };

        for path in paths {
            inner
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| BroodError::Watcher(format!("watching {}: {e}", path.display())))?;
        }

        Ok(FileWatcher { _inner: inner })
    }
}

fn is_relevant(kind: &NotifyEventKind) -> bool {
    matches!(
        kind,
        NotifyEventKind::Modify(_) | NotifyEventKind::Create(_) | NotifyEventKind::Remove(_)
    )
}

/// Fold the nearest `.gitignore` (walking up from each watched path's parent)
/// into one matcher. Read once at watcher start, not re-read per event —
/// edits to `.gitignore` itself take effect on the next `Watch` restart.
fn nearest_gitignore(paths: &[PathBuf]) -> Gitignore {
    let root = paths
        .first()
        .and_then(|p| p.parent())
        .unwrap_or_else(|| Path::new("."));

    let mut builder = GitignoreBuilder::new(root);
    let mut dir = Some(root);
    while let Some(d) = dir {
        let candidate = d.join(".gitignore");
        if candidate.is_file() {
            let _ = builder.add(candidate);
        }
        dir = d.parent();
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

fn is_ignored(gitignore: &Gitignore, path: &Path) -> bool {
    gitignore.matched(path, false).is_ignore()
}
