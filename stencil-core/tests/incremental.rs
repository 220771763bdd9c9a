use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stencil_core::config::{BaseTemplate, SiteConfig, StaticMapping};
use stencil_core::{BuildPipeline, Site};

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A site shaped like the docs deployments this engine targets: pages under
/// a URL prefix, a base template with a body-template indirection, a shared
/// partial, and a static folder.
fn docs_site(root: &Path) -> SiteConfig {
    write(root, "content/index.md", "# Galore\n\nParser toolkit docs.\n");
    write(root, "content/guide/start.md", "# Getting started\n");
    write(root, "content/plain.txt", "not a page\n");
    write(
        root,
        "templates/BasePage.html",
        "<html><head><title>{{ page.title }}</title></head>\
         <body>{% include \"partials/Header.html\" %}{{ content | safe }}</body></html>",
    );
    write(
        root,
        "templates/Content",
        "<article>{{ content | safe }}</article>",
    );
    write(root, "templates/partials/Header.html", "<header>v1</header>");
    write(root, "static/logo.png", "png-ish bytes");

    SiteConfig {
        output_dir: root.join("dist/docs"),
        content_root: root.join("content"),
        path_prefix: "/galore".to_string(),
        template_folders: vec![root.join("templates")],
        static_mappings: vec![StaticMapping::new("/static/", root.join("static"))],
        default_base_template: BaseTemplate::new("BasePage.html").with_body_template("Content"),
    }
}

fn tree_snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files: Vec<(PathBuf, Vec<u8>)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn rebuild_produces_prefixed_pages_and_verbatim_static_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = docs_site(dir.path());
    let out = config.output_dir.clone();

    let site = Site::new(config).unwrap();
    let summary = site.rebuild().await.unwrap();
    assert!(summary.is_success(), "failures: {:?}", summary.failed);

    // index.md rendered through Content into BasePage, beneath the prefix
    let index = fs::read_to_string(out.join("galore/index.html")).unwrap();
    assert!(index.contains("<title>Galore</title>"));
    assert!(index.contains("<article>"));
    assert!(index.contains("<h1>Galore</h1>"));

    // nested page keeps its relative location
    assert!(out.join("galore/guide/start.html").exists());

    // non-page content copied beneath the prefix
    assert_eq!(
        fs::read_to_string(out.join("galore/plain.txt")).unwrap(),
        "not a page\n"
    );

    // static mapping copied byte-identical outside the prefix
    assert_eq!(
        fs::read(out.join("static/logo.png")).unwrap(),
        fs::read(dir.path().join("static/logo.png")).unwrap()
    );
}

#[tokio::test]
async fn rebuild_twice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = docs_site(dir.path());
    let out = config.output_dir.clone();

    let site = Site::new(config).unwrap();
    site.rebuild().await.unwrap();
    let first = tree_snapshot(&out);

    site.rebuild().await.unwrap();
    let second = tree_snapshot(&out);

    assert_eq!(first, second);
}

#[test]
fn editing_a_transitive_partial_rebuilds_its_dependents_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(docs_site(dir.path()));
    let out = config.output_dir.clone();

    let mut pipeline = BuildPipeline::new(config.clone()).unwrap();
    pipeline.build_all().unwrap();

    let plain_out = out.join("galore/plain.txt");
    let plain_mtime = fs::metadata(&plain_out).unwrap().modified().unwrap();

    // The pages never name the partial; they reach it through BasePage.html
    write(dir.path(), "templates/partials/Header.html", "<header>v2</header>");
    pipeline.reload_templates().unwrap();

    let names = BTreeSet::from(["partials/Header.html".to_string()]);
    let dependents = pipeline.dependents_of(&names);
    assert_eq!(dependents.len(), 2, "both pages depend on the partial");

    let summary = pipeline.build_paths(&dependents);
    assert!(summary.is_success());

    let index = fs::read_to_string(out.join("galore/index.html")).unwrap();
    let start = fs::read_to_string(out.join("galore/guide/start.html")).unwrap();
    assert!(index.contains("<header>v2</header>"));
    assert!(start.contains("<header>v2</header>"));

    // The asset has no template dependency and was untouched
    assert_eq!(
        fs::metadata(&plain_out).unwrap().modified().unwrap(),
        plain_mtime
    );
}

#[test]
fn deleting_a_source_deletes_its_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(docs_site(dir.path()));
    let out = config.output_dir.clone();

    let mut pipeline = BuildPipeline::new(config.clone()).unwrap();
    pipeline.build_all().unwrap();
    assert!(out.join("galore/guide/start.html").exists());

    let source = config.content_root.canonicalize().unwrap().join("guide/start.md");
    fs::remove_file(&source).unwrap();
    pipeline.build_paths(&[source]);

    assert!(!out.join("galore/guide/start.html").exists());
    assert!(out.join("galore/index.html").exists());
}

#[test]
fn outputs_never_appear_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(docs_site(dir.path()));
    let out = config.output_dir.clone();

    let mut pipeline = BuildPipeline::new(config.clone()).unwrap();
    pipeline.build_all().unwrap();

    // Rebuild repeatedly while checking that every observable file is a
    // complete rendering (atomic rename means no empty or partial files).
    for round in 0..5 {
        write(
            dir.path(),
            "content/index.md",
            &format!("# Galore round {}\n", round),
        );
        let source = config.content_root.canonicalize().unwrap().join("index.md");
        pipeline.build_paths(&[source]);

        let index = fs::read_to_string(out.join("galore/index.html")).unwrap();
        assert!(!index.is_empty());
        assert!(index.starts_with("<html>"));
        assert!(index.ends_with("</html>"));
    }
}
