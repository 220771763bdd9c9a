use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::info;

use crate::builder::{BuildError, BuildPipeline, BuildSummary};
use crate::config::SiteConfig;
use crate::watcher::{WatchError, Watcher};

/// The engine's entry surface: one site, three operations.
///
/// `rebuild` runs a full pipeline pass, `watch` spawns the incremental
/// rebuild loop, and the dev server plugs into `subscribe_reload` to learn
/// when a cycle finished. The pipeline (and with it the dependency map) sits
/// behind one mutex, so rebuilds never overlap; the server never touches it
/// and only reads the output tree on disk.
pub struct Site {
    config: Arc<SiteConfig>,
    pipeline: Arc<Mutex<BuildPipeline>>,
    reload_tx: broadcast::Sender<String>,
}

impl Site {
    pub fn new(config: SiteConfig) -> Result<Self, BuildError> {
        let config = Arc::new(config);
        let pipeline = BuildPipeline::new(config.clone())?;
        let (reload_tx, _) = broadcast::channel(100);

        Ok(Self {
            config,
            pipeline: Arc::new(Mutex::new(pipeline)),
            reload_tx,
        })
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Full rebuild of every content unit and static mapping.
    pub async fn rebuild(&self) -> Result<BuildSummary, BuildError> {
        let summary = self.pipeline.lock().await.build_all()?;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            ?summary.duration,
            "site rebuilt"
        );
        Ok(summary)
    }

    /// Spawn the watch loop. Await the handle to block on it, or drop it to
    /// keep watching in the background.
    pub fn watch(&self) -> JoinHandle<Result<(), WatchError>> {
        let watcher = Watcher::new(
            self.config.clone(),
            self.pipeline.clone(),
            self.reload_tx.clone(),
        );
        tokio::spawn(watcher.run())
    }

    /// Sender half of the rebuild-complete channel, for wiring into a server.
    pub fn reload_channel(&self) -> broadcast::Sender<String> {
        self.reload_tx.clone()
    }

    pub fn subscribe_reload(&self) -> broadcast::Receiver<String> {
        self.reload_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseTemplate;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn rebuild_builds_the_configured_tree() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "content/index.md", "# Hi\n");
        write(
            dir.path(),
            "templates/BasePage.html",
            "<body>{{ content | safe }}</body>",
        );

        let site = Site::new(SiteConfig {
            output_dir: dir.path().join("out"),
            content_root: dir.path().join("content"),
            path_prefix: "/docs".to_string(),
            template_folders: vec![dir.path().join("templates")],
            static_mappings: Vec::new(),
            default_base_template: BaseTemplate::new("BasePage.html"),
        })
        .unwrap();

        let summary = site.rebuild().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(dir.path().join("out/docs/index.html").exists());
    }

    #[tokio::test]
    async fn missing_content_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let site = Site::new(SiteConfig {
            output_dir: dir.path().join("out"),
            content_root: dir.path().join("does-not-exist"),
            ..SiteConfig::default()
        })
        .unwrap();

        assert!(site.rebuild().await.is_err());
    }
}
