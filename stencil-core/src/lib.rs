pub mod builder;
pub mod config;
pub mod content;
pub mod markdown;
pub mod site;
pub mod template;
pub mod watcher;

// Re-export main types
pub use builder::{BuildError, BuildPipeline, BuildSummary, RenderedOutput};
pub use config::{BaseTemplate, SiteConfig, StaticMapping};
pub use content::{ContentStore, ContentUnit};
pub use site::Site;
pub use template::{TemplateError, TemplateResolver};
pub use watcher::{WatchError, WatchEvent, WatchKind, Watcher};
