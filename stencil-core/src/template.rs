use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use tera::{Context, Tera};
use walkdir::WalkDir;

#[derive(Debug)]
pub enum TemplateError {
    NotFound(String),
    Render(tera::Error),
    Io(std::io::Error),
}

impl From<tera::Error> for TemplateError {
    fn from(err: tera::Error) -> Self {
        TemplateError::Render(err)
    }
}

impl From<std::io::Error> for TemplateError {
    fn from(err: std::io::Error) -> Self {
        TemplateError::Io(err)
    }
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::NotFound(name) => write!(f, "Template not found: {}", name),
            TemplateError::Render(e) => write!(f, "Template error: {}", e),
            TemplateError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Resolves template names against an ordered list of template folders and
/// renders through tera.
///
/// A template's name is its path relative to the folder that owns it, with
/// `/` separators. When two folders carry the same name, the folder listed
/// first wins. The loaded name -> file mapping doubles as the resolution
/// cache; `reload` rebuilds it when template files change.
pub struct TemplateResolver {
    folders: Vec<PathBuf>,
    tera: Tera,
    by_name: HashMap<String, PathBuf>,
    refs: HashMap<String, BTreeSet<String>>,
}

impl TemplateResolver {
    pub fn new(folders: &[PathBuf]) -> Result<Self, TemplateError> {
        let folders = folders.to_vec();
        let (tera, by_name, refs) = Self::load(&folders)?;

        Ok(Self {
            folders,
            tera,
            by_name,
            refs,
        })
    }

    /// Re-read every template folder. On failure the previous state is kept
    /// so already-resolvable templates stay renderable.
    pub fn reload(&mut self) -> Result<(), TemplateError> {
        let (tera, by_name, refs) = Self::load(&self.folders)?;
        self.tera = tera;
        self.by_name = by_name;
        self.refs = refs;
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn load(
        folders: &[PathBuf],
    ) -> Result<(Tera, HashMap<String, PathBuf>, HashMap<String, BTreeSet<String>>), TemplateError>
    {
        let mut by_name = HashMap::new();
        let mut refs = HashMap::new();
        let mut sources = Vec::new();

        for folder in folders {
            if !folder.is_dir() {
                continue;
            }
            let folder = folder.canonicalize().unwrap_or_else(|_| folder.clone());

            for entry in WalkDir::new(&folder)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
            {
                let Some(name) = template_name(&folder, entry.path()) else {
                    continue;
                };
                // Earlier folders shadow later ones
                if by_name.contains_key(&name) {
                    continue;
                }

                let source = std::fs::read_to_string(entry.path())?;
                refs.insert(name.clone(), scan_refs(&source));
                by_name.insert(name.clone(), entry.path().to_path_buf());
                sources.push((name, source));
            }
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(sources)?;

        Ok((tera, by_name, refs))
    }

    /// Resolve a template name to the file that owns it.
    pub fn resolve(&self, name: &str) -> Result<&Path, TemplateError> {
        self.by_name
            .get(name)
            .map(|p| p.as_path())
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    /// The template name owned by `path`, if any.
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, p)| p.as_path() == path)
            .map(|(name, _)| name.as_str())
    }

    /// Transitive set of templates `name` relies on, `name` included.
    /// Follows `{% extends %}` and `{% include %}` references.
    pub fn closure(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(direct) = self.refs.get(&current) {
                queue.extend(direct.iter().cloned());
            }
        }

        seen
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        if !self.by_name.contains_key(name) {
            return Err(TemplateError::NotFound(name.to_string()));
        }
        Ok(self.tera.render(name, context)?)
    }
}

fn template_name(folder: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(folder).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str()?;
        // Hidden files and editor droppings are not templates
        if part.starts_with('.') {
            return None;
        }
        parts.push(part);
    }
    Some(parts.join("/"))
}

/// Names referenced by `{% extends "..." %}` and `{% include "..." %}` tags.
fn scan_refs(source: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let mut rest = source;

    while let Some(start) = rest.find("{%") {
        let tag = &rest[start + 2..];
        let Some(end) = tag.find("%}") else { break };
        let inner = tag[..end].trim_start_matches(['-', ' ', '\t']);

        if inner.starts_with("extends") || inner.starts_with("include") {
            if let Some(name) = quoted_value(inner) {
                found.insert(name);
            }
        }

        rest = &tag[end + 2..];
    }

    found
}

fn quoted_value(tag: &str) -> Option<String> {
    let open = tag.find(['"', '\''])?;
    let quote = tag.as_bytes()[open] as char;
    let rest = &tag[open + 1..];
    let close = rest.find(quote)?;
    Some(rest[..close].to_string())
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
    fn first_folder_wins() {
        let primary = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        write(primary.path(), "Page.html", "primary {{ content | safe }}");
        write(fallback.path(), "Page.html", "fallback {{ content | safe }}");
        write(fallback.path(), "Extra.html", "extra");

        let resolver = TemplateResolver::new(&[
            primary.path().to_path_buf(),
            fallback.path().to_path_buf(),
        ])
        .unwrap();

        let owner = resolver.resolve("Page.html").unwrap();
        assert!(owner.starts_with(primary.path().canonicalize().unwrap()));
        // Names only present in the fallback folder still resolve
        resolver.resolve("Extra.html").unwrap();
    }

    #[test]
    fn missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = TemplateResolver::new(&[dir.path().to_path_buf()]).unwrap();
        assert!(matches!(
            resolver.resolve("Nope.html"),
            Err(TemplateError::NotFound(_))
        ));
        assert!(matches!(
            resolver.render("Nope.html", &Context::new()),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn closure_follows_extends_and_includes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Base.html",
            "<html>{% block body %}{% endblock %}</html>",
        );
        write(
            dir.path(),
            "Page.html",
            "{% extends \"Base.html\" %}{% block body %}{% include \"partials/Nav.html\" %}{% endblock %}",
        );
        write(dir.path(), "partials/Nav.html", "<nav></nav>");

        let resolver = TemplateResolver::new(&[dir.path().to_path_buf()]).unwrap();
        let closure = resolver.closure("Page.html");
        assert!(closure.contains("Page.html"));
        assert!(closure.contains("Base.html"));
        assert!(closure.contains("partials/Nav.html"));

        let base_only = resolver.closure("Base.html");
        assert!(!base_only.contains("Page.html"));
    }

    #[test]
    fn renders_inherited_templates() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Base.html",
            "<main>{% block body %}{% endblock %}</main>",
        );
        write(
            dir.path(),
            "Page.html",
            "{% extends \"Base.html\" %}{% block body %}{{ content | safe }}{% endblock %}",
        );

        let resolver = TemplateResolver::new(&[dir.path().to_path_buf()]).unwrap();
        let mut context = Context::new();
        context.insert("content", "<p>hi</p>");
        let html = resolver.render("Page.html", &context).unwrap();
        assert_eq!(html, "<main><p>hi</p></main>");
    }

    #[test]
    fn scan_refs_reads_both_quote_styles() {
        let refs = scan_refs("{% extends \"A.html\" %} {%- include 'B.html' -%}");
        assert!(refs.contains("A.html"));
        assert!(refs.contains("B.html"));
    }
}
