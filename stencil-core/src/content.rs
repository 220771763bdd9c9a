use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

const FRONT_MATTER_DELIM: &str = "+++";

#[derive(Debug)]
pub enum ContentError {
    NotFound(PathBuf),
    Parse(PathBuf, toml::de::Error),
    InvalidPath(PathBuf),
    Io(std::io::Error),
}

impl From<std::io::Error> for ContentError {
    fn from(err: std::io::Error) -> Self {
        ContentError::Io(err)
    }
}

impl std::fmt::Display for ContentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentError::NotFound(p) => write!(f, "Content not found: {}", p.display()),
            ContentError::Parse(p, e) => {
                write!(f, "Front matter error in {}: {}", p.display(), e)
            }
            ContentError::InvalidPath(p) => write!(f, "Invalid path: {}", p.display()),
            ContentError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ContentError {}

/// Page metadata parsed from a `+++` TOML block at the top of the file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct FrontMatter {
    pub title: Option<String>,
    /// Base template override for this page.
    pub template: Option<String>,
    /// Per-page template parameters, merged over the base template's.
    pub params: HashMap<String, serde_json::Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Markdown page, rendered to HTML through the template stack.
    Markdown,
    /// HTML fragment page, passed to the template stack as-is.
    Html,
    /// Anything else, copied verbatim beneath the path prefix.
    Asset,
}

/// One source file destined to become one output file.
#[derive(Debug, Clone)]
pub struct ContentUnit {
    pub source_path: PathBuf,
    /// Path relative to the content root. Stable across scans; this is the
    /// key the build pipeline tracks dependencies and outputs under.
    pub rel_path: PathBuf,
    pub kind: UnitKind,
    pub front_matter: FrontMatter,
    /// Raw body with front matter stripped. Empty for assets, which are
    /// copied straight from `source_path`.
    pub body: String,
}

impl ContentUnit {
    /// Output path relative to the output directory: the root-relative
    /// source path beneath the URL prefix, with `.md` becoming `.html`.
    pub fn out_rel_path(&self, prefix_rel: &Path) -> PathBuf {
        let rel = match self.kind {
            UnitKind::Markdown => self.rel_path.with_extension("html"),
            _ => self.rel_path.clone(),
        };
        prefix_rel.join(rel)
    }

    pub fn content_type(&self) -> &'static str {
        match self.kind {
            UnitKind::Markdown | UnitKind::Html => "text/html",
            UnitKind::Asset => match self.rel_path.extension().and_then(|e| e.to_str()) {
                Some("css") => "text/css",
                Some("js") => "text/javascript",
                Some("json") => "application/json",
                Some("png") => "image/png",
                Some("svg") => "image/svg+xml",
                Some("jpg") | Some("jpeg") => "image/jpeg",
                Some("txt") => "text/plain",
                _ => "application/octet-stream",
            },
        }
    }
}

type IgnorePredicate = Box<dyn Fn(&Path) -> bool + Send + Sync>;

/// Reads the source content tree into `ContentUnit`s.
pub struct ContentStore {
    content_root: PathBuf,
    ignore: IgnorePredicate,
}

impl ContentStore {
    pub fn new<P: AsRef<Path>>(content_root: P) -> Self {
        let content_root = content_root.as_ref();
        Self {
            // Watch events arrive canonicalized; keep the root in the same
            // form so relative paths strip cleanly.
            content_root: content_root
                .canonicalize()
                .unwrap_or_else(|_| content_root.to_path_buf()),
            ignore: Box::new(is_hidden),
        }
    }

    /// Replace the default hidden-entry predicate. Paths for which the
    /// predicate returns true are skipped during scans.
    pub fn with_ignore<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.ignore = Box::new(predicate);
        self
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// True when `path`, or any of its ancestors beneath the content root,
    /// matches the ignore predicate. Scans and incremental builds agree on
    /// this: an ignored path is never a unit.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.content_root) else {
            return false;
        };
        let mut current = self.content_root.clone();
        for component in rel.components() {
            current.push(component);
            if (self.ignore)(&current) {
                return true;
            }
        }
        false
    }

    /// Discover every content unit, ordered lexicographically by relative
    /// path so repeated builds visit units in the same order.
    pub fn scan(&self) -> Result<Vec<ContentUnit>, ContentError> {
        if !self.content_root.is_dir() {
            return Err(ContentError::NotFound(self.content_root.clone()));
        }

        let mut units = Vec::new();
        for entry in WalkDir::new(&self.content_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !(self.ignore)(e.path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
        {
            units.push(self.load(entry.path())?);
        }

        units.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(units)
    }

    /// Load a single unit by source path.
    pub fn load(&self, path: &Path) -> Result<ContentUnit, ContentError> {
        if !path.is_file() {
            return Err(ContentError::NotFound(path.to_path_buf()));
        }

        let rel_path = path
            .strip_prefix(&self.content_root)
            .map_err(|_| ContentError::InvalidPath(path.to_path_buf()))?
            .to_path_buf();

        let kind = match path.extension().and_then(|e| e.to_str()) {
            Some("md") => UnitKind::Markdown,
            Some("html") | Some("htm") => UnitKind::Html,
            _ => UnitKind::Asset,
        };

        let (front_matter, body) = match kind {
            UnitKind::Asset => (FrontMatter::default(), String::new()),
            _ => {
                let raw = std::fs::read_to_string(path)?;
                split_front_matter(path, &raw)?
            }
        };

        Ok(ContentUnit {
            source_path: path.to_path_buf(),
            rel_path,
            kind,
            front_matter,
            body,
        })
    }
}

/// Split an optional leading `+++` TOML block from the body.
fn split_front_matter(path: &Path, raw: &str) -> Result<(FrontMatter, String), ContentError> {
    let Some(rest) = raw.strip_prefix(FRONT_MATTER_DELIM) else {
        return Ok((FrontMatter::default(), raw.to_string()));
    };

    let Some(end) = rest.find(&format!("\n{}", FRONT_MATTER_DELIM)) else {
        return Ok((FrontMatter::default(), raw.to_string()));
    };

    let matter = toml::from_str(&rest[..end])
        .map_err(|e| ContentError::Parse(path.to_path_buf(), e))?;
    let body = rest[end + FRONT_MATTER_DELIM.len() + 1..]
        .trim_start_matches('\n')
        .to_string();

    Ok((matter, body))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn scan_is_lexicographic_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.md", "# B");
        write(dir.path(), "a.md", "# A");
        write(dir.path(), "guide/setup.md", "# Setup");
        write(dir.path(), ".drafts/wip.md", "# WIP");

        let store = ContentStore::new(dir.path());
        let units = store.scan().unwrap();
        let rels: Vec<_> = units.iter().map(|u| u.rel_path.clone()).collect();

        assert_eq!(
            rels,
            vec![
                PathBuf::from("a.md"),
                PathBuf::from("b.md"),
                PathBuf::from("guide/setup.md"),
            ]
        );
    }

    #[test]
    fn is_ignored_covers_hidden_files_and_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.md", "# A");

        let store = ContentStore::new(dir.path());
        let root = store.content_root();
        assert!(store.is_ignored(&root.join(".index.md.swp")));
        assert!(store.is_ignored(&root.join(".drafts/wip.md")));
        assert!(!store.is_ignored(&root.join("a.md")));
        // Paths outside the root are never ours to ignore
        assert!(!store.is_ignored(Path::new("/elsewhere/.hidden")));
    }

    #[test]
    fn load_parses_front_matter() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "index.md",
            "+++\ntitle = \"Home\"\ntemplate = \"Landing.html\"\n+++\n# Hello\n",
        );

        let store = ContentStore::new(dir.path());
        let unit = store.load(&store.content_root().join("index.md")).unwrap();
        assert_eq!(unit.front_matter.title.as_deref(), Some("Home"));
        assert_eq!(unit.front_matter.template.as_deref(), Some("Landing.html"));
        assert_eq!(unit.body, "# Hello\n");
    }

    #[test]
    fn malformed_front_matter_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.md", "+++\ntitle = !!!\n+++\nbody\n");

        let store = ContentStore::new(dir.path());
        let err = store.load(&store.content_root().join("bad.md")).unwrap_err();
        assert!(matches!(err, ContentError::Parse(_, _)));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let err = store.load(&dir.path().join("nope.md")).unwrap_err();
        assert!(matches!(err, ContentError::NotFound(_)));
    }

    #[test]
    fn out_rel_path_applies_prefix_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "guide/setup.md", "# Setup");
        write(dir.path(), "logo.png", "");

        let store = ContentStore::new(dir.path());
        let page = store.load(&store.content_root().join("guide/setup.md")).unwrap();
        let asset = store.load(&store.content_root().join("logo.png")).unwrap();

        let prefix = PathBuf::from("galore");
        assert_eq!(
            page.out_rel_path(&prefix),
            PathBuf::from("galore/guide/setup.html")
        );
        assert_eq!(asset.out_rel_path(&prefix), PathBuf::from("galore/logo.png"));
    }
}
