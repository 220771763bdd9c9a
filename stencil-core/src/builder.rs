use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tera::Context;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::content::{ContentError, ContentStore, ContentUnit, UnitKind};
use crate::template::{TemplateError, TemplateResolver};

#[derive(Debug)]
pub enum BuildError {
    Content(ContentError),
    Template(TemplateError),
    Io(std::io::Error),
}

impl From<ContentError> for BuildError {
    fn from(err: ContentError) -> Self {
        BuildError::Content(err)
    }
}

impl From<TemplateError> for BuildError {
    fn from(err: TemplateError) -> Self {
        BuildError::Template(err)
    }
}

impl From<std::io::Error> for BuildError {
    fn from(err: std::io::Error) -> Self {
        BuildError::Io(err)
    }
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Content(e) => write!(f, "Content error: {}", e),
            BuildError::Template(e) => write!(f, "Template error: {}", e),
            BuildError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Debug)]
pub struct BuildFailure {
    pub source: PathBuf,
    pub error: BuildError,
}

/// Outcome of one batch build. Per-unit failures are collected here, never
/// propagated; a failed unit's previous output stays on disk.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub succeeded: usize,
    pub failed: Vec<BuildFailure>,
    pub duration: Duration,
}

impl BuildSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn merge(&mut self, other: BuildSummary) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
        self.duration += other.duration;
    }
}

/// Rendered bytes for one content unit, plus where they go.
#[derive(Debug)]
pub struct RenderedOutput {
    pub dest: PathBuf,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Per-unit template dependencies and written outputs, keyed by the unit's
/// root-relative source path. Recomputed after every successful unit build;
/// this is what makes incremental rebuilds correct.
#[derive(Default)]
struct BuildState {
    deps: HashMap<PathBuf, BTreeSet<String>>,
    outputs: HashMap<PathBuf, PathBuf>,
    static_outputs: HashMap<PathBuf, PathBuf>,
}

/// Serialized into every template context as `page`.
#[derive(Debug, Serialize)]
struct PageContext {
    title: String,
    url: String,
    source: String,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// Transforms content units into files beneath the output directory.
///
/// The pipeline is the single writer of both the output tree and the
/// dependency map; callers serialize access to it (the site facade keeps it
/// behind a mutex).
pub struct BuildPipeline {
    config: Arc<SiteConfig>,
    store: ContentStore,
    resolver: TemplateResolver,
    state: BuildState,
}

impl BuildPipeline {
    pub fn new(config: Arc<SiteConfig>) -> Result<Self, BuildError> {
        let store = ContentStore::new(&config.content_root);
        let resolver = TemplateResolver::new(&config.template_folders)?;

        Ok(Self {
            config,
            store,
            resolver,
            state: BuildState::default(),
        })
    }

    /// Full pass: every unit in scan order, then the static mappings, then
    /// removal of outputs whose sources disappeared since the last build.
    /// Only an unreadable content root is fatal.
    pub fn build_all(&mut self) -> Result<BuildSummary, BuildError> {
        let started = Instant::now();
        let units = self.store.scan()?;

        let mut summary = BuildSummary::default();
        let mut seen = BTreeSet::new();

        for unit in &units {
            seen.insert(unit.rel_path.clone());
            match self.build_one(unit) {
                Ok(_) => summary.succeeded += 1,
                Err(error) => {
                    warn!(source = %unit.source_path.display(), %error, "unit build failed");
                    summary.failed.push(BuildFailure {
                        source: unit.source_path.clone(),
                        error,
                    });
                }
            }
        }

        let stale: Vec<PathBuf> = self
            .state
            .outputs
            .keys()
            .filter(|rel| !seen.contains(*rel))
            .cloned()
            .collect();
        for rel in stale {
            self.remove_output(&rel);
        }

        summary.merge(self.sync_static());
        summary.duration = started.elapsed();
        Ok(summary)
    }

    /// Render one unit and write it atomically. Records the unit's template
    /// dependencies and output path on success.
    pub fn build_one(&mut self, unit: &ContentUnit) -> Result<RenderedOutput, BuildError> {
        let (output, deps) = self.render_unit(unit)?;
        write_atomic(&output.dest, &output.bytes)?;

        debug!(
            source = %unit.rel_path.display(),
            dest = %output.dest.display(),
            "built unit"
        );
        self.state.deps.insert(unit.rel_path.clone(), deps);
        self.state
            .outputs
            .insert(unit.rel_path.clone(), output.dest.clone());
        Ok(output)
    }

    /// Incremental path for changed source files. Sources that no longer
    /// exist have their outputs removed instead of rebuilt, and ignored
    /// paths are never built, matching what a full scan would produce.
    pub fn build_paths(&mut self, changed: &[PathBuf]) -> BuildSummary {
        let started = Instant::now();
        let mut summary = BuildSummary::default();

        for path in changed {
            if self.store.is_ignored(path) {
                // A unit that became ignored may have left an output behind
                if let Ok(rel) = path.strip_prefix(self.store.content_root()) {
                    let rel = rel.to_path_buf();
                    self.remove_output(&rel);
                }
                continue;
            }
            if path.is_file() {
                match self.store.load(path) {
                    Ok(unit) => match self.build_one(&unit) {
                        Ok(_) => summary.succeeded += 1,
                        Err(error) => {
                            warn!(source = %path.display(), %error, "unit build failed");
                            summary.failed.push(BuildFailure {
                                source: path.clone(),
                                error,
                            });
                        }
                    },
                    Err(error) => {
                        warn!(source = %path.display(), %error, "unit load failed");
                        summary.failed.push(BuildFailure {
                            source: path.clone(),
                            error: error.into(),
                        });
                    }
                }
            } else if let Ok(rel) = path.strip_prefix(self.store.content_root()) {
                // A removed directory takes every tracked unit beneath it;
                // for a removed file this matches exactly one entry.
                let rel = rel.to_path_buf();
                let gone: Vec<PathBuf> = self
                    .state
                    .outputs
                    .keys()
                    .filter(|tracked| *tracked == &rel || tracked.starts_with(&rel))
                    .cloned()
                    .collect();
                for tracked in gone {
                    self.remove_output(&tracked);
                }
            }
        }

        summary.duration = started.elapsed();
        summary
    }

    /// Source paths of every unit whose last successful build resolved any
    /// of `names`, directly or through the template closure.
    pub fn dependents_of(&self, names: &BTreeSet<String>) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = self
            .state
            .deps
            .iter()
            .filter(|(_, deps)| !deps.is_disjoint(names))
            .map(|(rel, _)| self.store.content_root().join(rel))
            .collect();
        sources.sort();
        sources
    }

    /// Every tracked unit's source path. Used when a template change can't
    /// be attributed to a name (removed or renamed template files).
    pub fn all_sources(&self) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = self
            .state
            .deps
            .keys()
            .map(|rel| self.store.content_root().join(rel))
            .collect();
        sources.sort();
        sources
    }

    /// The template name a file resolves to, if it belongs to a template
    /// folder snapshot.
    pub fn template_owner(&self, path: &Path) -> Option<String> {
        self.resolver.owner_of(path).map(str::to_string)
    }

    pub fn reload_templates(&mut self) -> Result<(), TemplateError> {
        self.resolver.reload()
    }

    /// Copy every static mapping into the output directory, skipping files
    /// whose size and mtime are unchanged, and dropping outputs whose
    /// sources are gone.
    pub fn sync_static(&mut self) -> BuildSummary {
        let started = Instant::now();
        let mut summary = BuildSummary::default();
        let mut seen = BTreeSet::new();

        for mapping in &self.config.static_mappings {
            if !mapping.folder.is_dir() {
                continue;
            }
            let dest_root = self.config.output_dir.join(mapping.dest_rel());

            for entry in walkdir::WalkDir::new(&mapping.folder)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
            {
                let src = entry.path();
                let Ok(rel) = src.strip_prefix(&mapping.folder) else {
                    continue;
                };
                let dest = dest_root.join(rel);
                seen.insert(src.to_path_buf());

                match copy_if_changed(src, &dest) {
                    Ok(copied) => {
                        if copied {
                            summary.succeeded += 1;
                        }
                        self.state
                            .static_outputs
                            .insert(src.to_path_buf(), dest.clone());
                    }
                    Err(error) => {
                        warn!(source = %src.display(), %error, "static copy failed");
                        summary.failed.push(BuildFailure {
                            source: src.to_path_buf(),
                            error: error.into(),
                        });
                    }
                }
            }
        }

        let gone: Vec<PathBuf> = self
            .state
            .static_outputs
            .keys()
            .filter(|src| !seen.contains(*src) && !src.is_file())
            .cloned()
            .collect();
        for src in gone {
            if let Some(dest) = self.state.static_outputs.remove(&src) {
                let _ = std::fs::remove_file(dest);
            }
        }

        summary.duration = started.elapsed();
        summary
    }

    /// Delete the output written for a removed source file.
    pub fn remove_output(&mut self, rel: &Path) {
        self.state.deps.remove(rel);
        if let Some(dest) = self.state.outputs.remove(rel) {
            debug!(dest = %dest.display(), "removing output for deleted source");
            if let Err(error) = std::fs::remove_file(&dest) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(dest = %dest.display(), %error, "failed to remove output");
                }
            }
        }
    }

    fn render_unit(
        &self,
        unit: &ContentUnit,
    ) -> Result<(RenderedOutput, BTreeSet<String>), BuildError> {
        let dest = self
            .config
            .output_dir
            .join(unit.out_rel_path(&self.config.prefix_rel()));

        if unit.kind == UnitKind::Asset {
            let bytes = std::fs::read(&unit.source_path)?;
            return Ok((
                RenderedOutput {
                    dest,
                    content_type: unit.content_type(),
                    bytes,
                },
                BTreeSet::new(),
            ));
        }

        let base = &self.config.default_base_template;
        let base_name = unit.front_matter.template.as_deref().unwrap_or(&base.name);
        self.resolver.resolve(base_name)?;

        let body_html = match unit.kind {
            UnitKind::Markdown => crate::markdown::render_markdown(&unit.body),
            _ => unit.body.clone(),
        };

        let mut context = Context::new();
        context.insert("site", self.config.as_ref());
        context.insert("page", &self.page_context(unit));
        context.insert("params", &self.merged_params(unit));
        context.insert("content", &body_html);

        // The body-template indirection: render the named template first,
        // then hand its output to the base template as `content`.
        let mut deps = self.resolver.closure(base_name);
        if let Some(body_name) = &base.body_template {
            self.resolver.resolve(body_name)?;
            let body = self.resolver.render(body_name, &context)?;
            context.insert("content", &body);
            deps.extend(self.resolver.closure(body_name));
        }

        let html = self.resolver.render(base_name, &context)?;

        Ok((
            RenderedOutput {
                dest,
                content_type: unit.content_type(),
                bytes: html.into_bytes(),
            },
            deps,
        ))
    }

    fn page_context(&self, unit: &ContentUnit) -> PageContext {
        let title = unit
            .front_matter
            .title
            .clone()
            .or_else(|| crate::markdown::first_heading(&unit.body))
            .unwrap_or_else(|| {
                unit.rel_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default()
            });

        let url = format!(
            "/{}",
            unit.out_rel_path(&self.config.prefix_rel())
                .to_string_lossy()
                .replace('\\', "/")
        );

        PageContext {
            title,
            url,
            source: unit.rel_path.to_string_lossy().to_string(),
            extra: unit.front_matter.extra.clone(),
        }
    }

    fn merged_params(&self, unit: &ContentUnit) -> HashMap<String, serde_json::Value> {
        let mut params = self.config.default_base_template.params.clone();
        for (key, value) in &unit.front_matter.params {
            params.insert(key.clone(), value.clone());
        }
        params
    }
}

/// Write bytes to a temp file in the destination directory, fsync, then
/// rename over the destination. A concurrent reader sees either the old
/// complete file or the new one, never a partial write. Unchanged
/// destinations are left alone so their mtimes survive repeat builds.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    if let Ok(existing) = std::fs::read(dest) {
        if existing == bytes {
            return Ok(());
        }
    }

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

/// Copy `src` over `dest` unless size and mtime say it is already current.
/// Returns whether a copy happened.
fn copy_if_changed(src: &Path, dest: &Path) -> std::io::Result<bool> {
    let src_meta = std::fs::metadata(src)?;
    if let Ok(dest_meta) = std::fs::metadata(dest) {
        let unchanged = src_meta.len() == dest_meta.len()
            && match (src_meta.modified(), dest_meta.modified()) {
                (Ok(s), Ok(d)) => s <= d,
                _ => false,
            };
        if unchanged {
            return Ok(false);
        }
    }

    let bytes = std::fs::read(src)?;
    write_atomic(dest, &bytes)?;
    Ok(true)
}
