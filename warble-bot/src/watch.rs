//! Filesystem watcher feeding the plugin registry.
//!
//! notify's callback delivers into a std channel; a blocking task drains it
//! with a short debounce window, dedupes the touched manifest names, and
//! applies them through [`PluginRegistry::reload_one`]. Everything funnels
//! through that single task, so reloads for the same file never race.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

use crate::plugins::{self, PluginRegistry};

/// Editors fire several events per save; anything within this window is
/// coalesced into one reload.
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Handle keeping the watcher alive. Dropping it stops the watch and lets
/// the drain task run out.
pub struct PluginWatcher {
    _watcher: RecommendedWatcher,
    _task: JoinHandle<()>,
}

impl PluginWatcher {
    /// Watch the registry's directory for manifest changes.
    pub fn start(registry: Arc<PluginRegistry>) -> Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                let _ = tx.send(result);
            },
        )
        .context("creating plugin watcher")?;
        watcher
            .watch(registry.dir(), RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", registry.dir().display()))?;
        tracing::info!(dir = %registry.dir().display(), "watching plugin directory");

        let task = tokio::task::spawn_blocking(move || drain(rx, registry));
        Ok(Self { _watcher: watcher, _task: task })
    }
}

fn drain(rx: Receiver<Result<notify::Event, notify::Error>>, registry: Arc<PluginRegistry>) {
    let mut pending: Vec<String> = Vec::new();
    loop {
        match rx.recv_timeout(DEBOUNCE) {
            Ok(Ok(event)) => {
                for path in &event.paths {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if plugins::is_plugin_file(name) && !pending.iter().any(|p| p == name) {
                        pending.push(name.to_string());
                    }
                }
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "plugin watch error"),
            Err(RecvTimeoutError::Timeout) => {
                for name in pending.drain(..) {
                    registry.reload_one(&name);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                for name in pending.drain(..) {
                    registry.reload_one(&name);
                }
                break;
            }
        }
    }
}
