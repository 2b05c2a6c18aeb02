//! Hot reload support for plugin bundles

use crate::config::HostConfig;
use crate::error::{Result, UnetError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Decides which file events trigger a module reload
///
/// Reloads fire on the trailing edge: a bundle is due once no event has
/// touched it for the debounce window, so a file written in several chunks
/// reloads once, from its final contents.
#[derive(Debug)]
pub struct ChangeFilter {
    config: HostConfig,
    debounce: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl ChangeFilter {
    /// Create a filter for the bundles described by `config`
    pub fn new(config: HostConfig) -> Self {
        let debounce = config.hot_reload.debounce;
        Self {
            config,
            debounce,
            pending: HashMap::new(),
        }
    }

    /// Whether the event kind can mean new bundle contents
    pub fn should_process_event(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event.paths.iter().any(|path| self.config.is_bundle(path))
    }

    /// Record the bundle paths in `event` as changed at `now`
    ///
    /// A later event for a pending path pushes its deadline back.
    pub fn record(&mut self, event: &Event, now: Instant) {
        if !self.should_process_event(event) {
            return;
        }
        for path in event.paths.iter().filter(|path| self.config.is_bundle(path)) {
            self.pending.insert(path.clone(), now);
        }
    }

    /// Take the pending paths that have been quiet for the debounce window
    pub fn due(&mut self, now: Instant) -> Vec<PathBuf> {
        let debounce = self.debounce;
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();
        due.sort();
        for path in &due {
            self.pending.remove(path);
        }
        due
    }

    /// How long until the next pending path becomes due, if any is pending
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .map(|last| (*last + self.debounce).saturating_duration_since(now))
            .min()
    }

    /// Whether any path is waiting out its debounce window
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Watches the plugins directory and reports changed bundle files
///
/// Events are handled on a dedicated thread. Dropping or stopping the
/// watcher closes the event channel, which ends that thread.
pub struct BundleWatcher {
    plugins_path: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl fmt::Debug for BundleWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleWatcher")
            .field("plugins_path", &self.plugins_path)
            .field("running", &self.is_running())
            .finish()
    }
}

impl BundleWatcher {
    /// Start watching `plugins_path`, calling `on_change` for each changed bundle
    pub fn start(
        plugins_path: impl Into<PathBuf>,
        config: HostConfig,
        on_change: impl Fn(&Path) + Send + 'static,
    ) -> Result<Self> {
        let plugins_path = plugins_path.into();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| UnetError::watch(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(&plugins_path, RecursiveMode::Recursive)
            .map_err(|e| UnetError::watch(format!("Failed to watch directory: {e}")))?;

        let mut filter = ChangeFilter::new(config);
        thread::Builder::new()
            .name("unet-hot-reload".to_string())
            .spawn(move || {
                loop {
                    let received = match filter.next_deadline(Instant::now()) {
                        Some(wait) => rx.recv_timeout(wait),
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };
                    match received {
                        Ok(Ok(event)) => filter.record(&event, Instant::now()),
                        Ok(Err(e)) => warn!(error = %e, "File watcher error"),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    for path in filter.due(Instant::now()) {
                        debug!(path = %path.display(), "Plugin bundle changed");
                        on_change(&path);
                    }
                }
                debug!("Hot reload event loop finished");
            })?;

        info!(plugins_path = %plugins_path.display(), "Hot reload watcher started");

        Ok(Self {
            plugins_path,
            watcher: Some(watcher),
        })
    }

    /// Whether the watcher is still active
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stop watching
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!(plugins_path = %self.plugins_path.display(), "Hot reload watcher stopped");
        }
    }
}

impl Drop for BundleWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
