use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::builder::{BuildPipeline, BuildSummary};
use crate::config::SiteConfig;

/// Message published on the reload channel after each completed cycle.
pub const RELOAD_SIGNAL: &str = "reload";

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum WatchError {
    Subscribe(notify::Error),
    ChannelClosed,
}

impl From<notify::Error> for WatchError {
    fn from(err: notify::Error) -> Self {
        WatchError::Subscribe(err)
    }
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Subscribe(e) => write!(f, "Watch subscription error: {}", e),
            WatchError::ChannelClosed => write!(f, "Watch event channel closed"),
        }
    }
}

impl std::error::Error for WatchError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Created,
    Modified,
    Removed,
}

/// One filesystem change, classified against the current build state.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchKind,
}

/// Which configured tree a changed path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Content,
    Template,
    Static,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Idle,
    Debouncing,
    Rebuilding,
}

/// Watches the content, template, and static trees and drives the build
/// pipeline's incremental path.
///
/// All events funnel through one channel into this single worker, so only
/// one rebuild is ever in flight; bursts landing mid-rebuild queue up and
/// merge into the next cycle's affected set.
pub struct Watcher {
    config: Arc<SiteConfig>,
    pipeline: Arc<Mutex<BuildPipeline>>,
    reload_tx: broadcast::Sender<String>,
    debounce: Duration,
}

impl Watcher {
    pub fn new(
        config: Arc<SiteConfig>,
        pipeline: Arc<Mutex<BuildPipeline>>,
        reload_tx: broadcast::Sender<String>,
    ) -> Self {
        Self {
            config,
            pipeline,
            reload_tx,
            debounce: DEBOUNCE_WINDOW,
        }
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Subscribe to the watched trees and loop until the event channel
    /// closes. Per-cycle failures are logged; only a failed subscription is
    /// fatal.
    pub async fn run(self) -> Result<(), WatchError> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<PathBuf>>(100);

        let mut debouncer = new_debouncer(self.debounce, move |res: DebounceEventResult| {
            match res {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    if !paths.is_empty() {
                        let _ = tx.blocking_send(paths);
                    }
                }
                Err(e) => error!(%e, "watch backend error"),
            }
        })?;

        let roots = self.watch_roots();
        for root in &roots {
            debouncer
                .watcher()
                .watch(root, notify::RecursiveMode::Recursive)?;
            info!(root = %root.display(), "watching");
        }

        let mut state = WatchState::Idle;
        debug!(?state, "watch loop started");
        while let Some(mut paths) = rx.recv().await {
            state = WatchState::Debouncing;
            debug!(?state, count = paths.len(), "events received");

            // Merge anything queued while we were idle or rebuilding into
            // this cycle instead of spawning another one.
            while let Ok(more) = rx.try_recv() {
                paths.extend(more);
            }

            state = WatchState::Rebuilding;
            debug!(?state, "rebuilding");
            let events = coalesce(paths);
            if let Some(summary) = self.run_cycle(&events).await {
                info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed.len(),
                    ?summary.duration,
                    "rebuild cycle finished"
                );
                let _ = self.reload_tx.send(RELOAD_SIGNAL.to_string());
            }
            state = WatchState::Idle;
            debug!(?state, "cycle complete");
        }

        Err(WatchError::ChannelClosed)
    }

    fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.config.content_root.clone()];
        roots.extend(self.config.template_folders.iter().cloned());
        roots.extend(self.config.static_mappings.iter().map(|m| m.folder.clone()));
        roots
            .into_iter()
            .filter(|r| r.is_dir())
            .map(|r| r.canonicalize().unwrap_or(r))
            .collect()
    }

    /// One rebuild cycle over a coalesced event batch. Returns None when the
    /// batch touched nothing we build from.
    pub(crate) async fn run_cycle(&self, events: &[WatchEvent]) -> Option<BuildSummary> {
        let mut pipeline = self.pipeline.lock().await;

        let mut content_paths = Vec::new();
        let mut template_events = Vec::new();
        let mut static_touched = false;
        let mut full_rebuild = false;

        for event in events {
            match self.source_kind(&event.path) {
                SourceKind::Content => {
                    // A directory appearing or vanishing can carry any number
                    // of units; rescan instead of guessing.
                    if event.path.is_dir() {
                        full_rebuild = true;
                    } else {
                        content_paths.push(event.path.clone());
                    }
                }
                SourceKind::Template => template_events.push(event),
                SourceKind::Static => static_touched = true,
                SourceKind::Other => {}
            }
        }

        if full_rebuild {
            return match pipeline.build_all() {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(%e, "full rebuild failed");
                    None
                }
            };
        }

        let mut summary = BuildSummary::default();
        let mut dirty: BTreeSet<PathBuf> = content_paths.into_iter().collect();
        let mut rebuild_everything = false;

        if !template_events.is_empty() {
            // Capture names before the reload drops them from the snapshot
            let mut names = BTreeSet::new();
            for event in &template_events {
                match pipeline.template_owner(&event.path) {
                    Some(name) => {
                        names.insert(name);
                    }
                    // A removed file we never indexed; attribution is lost,
                    // so rebuild every tracked unit.
                    None if event.kind == WatchKind::Removed => rebuild_everything = true,
                    None => {}
                }
            }

            if let Err(e) = pipeline.reload_templates() {
                // Keep the previous template set renderable; the offending
                // file is retried on its next event.
                warn!(%e, "template reload failed, keeping previous templates");
            } else {
                // A new or renamed file may now shadow a different name
                for event in &template_events {
                    if let Some(name) = pipeline.template_owner(&event.path) {
                        names.insert(name);
                    }
                }

                let sources = if rebuild_everything {
                    pipeline.all_sources()
                } else {
                    pipeline.dependents_of(&names)
                };
                dirty.extend(sources);
            }
        }

        let had_work = !dirty.is_empty() || static_touched;
        if !dirty.is_empty() {
            let dirty: Vec<PathBuf> = dirty.into_iter().collect();
            summary.merge(pipeline.build_paths(&dirty));
        }

        if static_touched {
            summary.merge(pipeline.sync_static());
        }

        if !had_work {
            return None;
        }
        Some(summary)
    }

    fn source_kind(&self, path: &Path) -> SourceKind {
        let under = |root: &Path| {
            let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            path.starts_with(root)
        };

        if under(&self.config.content_root) {
            SourceKind::Content
        } else if self.config.template_folders.iter().any(|f| under(f)) {
            SourceKind::Template
        } else if self.config.static_mappings.iter().any(|m| under(&m.folder)) {
            SourceKind::Static
        } else {
            SourceKind::Other
        }
    }
}

/// Collapse a burst of raw paths into one ordered, deduplicated event set,
/// classifying each against the filesystem (a path that no longer exists
/// was removed).
pub(crate) fn coalesce(paths: Vec<PathBuf>) -> Vec<WatchEvent> {
    let mut seen = BTreeSet::new();
    let mut events = Vec::new();

    for path in paths {
        if !seen.insert(path.clone()) {
            continue;
        }
        let kind = if path.exists() {
            WatchKind::Modified
        } else {
            WatchKind::Removed
        };
        events.push(WatchEvent { path, kind });
    }

    events
}
