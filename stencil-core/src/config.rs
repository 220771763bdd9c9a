use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{fmt, fs};

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parsing(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parsing(e) => write!(f, "TOML parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Parsing(value)
    }
}

/// The root layout template a page is rendered into.
///
/// `body_template` is the recognized indirection: when set, the named
/// template renders the page body and its output becomes `content` in the
/// base template's context. Anything site-specific goes in `params`, which
/// is passed to templates verbatim.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct BaseTemplate {
    pub name: String,
    pub body_template: Option<String>,
    pub params: HashMap<String, serde_json::Value>,
}

impl BaseTemplate {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            body_template: None,
            params: HashMap::new(),
        }
    }

    pub fn with_body_template<S: Into<String>>(mut self, name: S) -> Self {
        self.body_template = Some(name.into());
        self
    }
}

/// Verbatim URL-to-folder passthrough, no templating.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StaticMapping {
    pub url_path: String,
    pub folder: PathBuf,
}

impl StaticMapping {
    pub fn new<S: Into<String>, P: AsRef<Path>>(url_path: S, folder: P) -> Self {
        Self {
            url_path: url_path.into(),
            folder: folder.as_ref().to_path_buf(),
        }
    }

    /// The mapping's location inside the output directory, e.g. `/static/`
    /// becomes `static`.
    pub fn dest_rel(&self) -> PathBuf {
        PathBuf::from(self.url_path.trim_matches('/'))
    }
}

/// Immutable site configuration. Built once by the caller and passed by
/// reference into every component; there is no process-wide singleton.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub output_dir: PathBuf,
    pub content_root: PathBuf,
    /// URL path prefix the whole site lives under, e.g. `/docs`. May be empty.
    pub path_prefix: String,
    /// Template directories, searched in listed order. First match wins.
    pub template_folders: Vec<PathBuf>,
    /// Static asset mappings, copied verbatim into the output directory.
    pub static_mappings: Vec<StaticMapping>,
    pub default_base_template: BaseTemplate,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./out"),
            content_root: PathBuf::from("./content"),
            path_prefix: String::new(),
            template_folders: vec![PathBuf::from("./templates")],
            static_mappings: Vec::new(),
            default_base_template: BaseTemplate::new("BasePage.html"),
        }
    }
}

impl SiteConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: SiteConfig = toml::from_str(&data)?;

        Ok(config)
    }

    /// The path prefix as a relative path under the output directory.
    pub fn prefix_rel(&self) -> PathBuf {
        PathBuf::from(self.path_prefix.trim_matches('/'))
    }
}
