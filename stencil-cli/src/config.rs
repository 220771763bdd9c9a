use anyhow::Result;
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration merging CLI args, env vars, config file, and
/// defaults
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StencilConfig {
    /// Invocation settings
    pub build: BuildConfig,
    /// Site configuration handed to stencil-core
    pub site: stencil_core::SiteConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Configuration file path
    pub config: String,
    /// Address the dev server binds to
    pub addr: String,
    /// Open browser automatically
    pub open: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            config: "./stencil.toml".to_string(),
            addr: "127.0.0.1:8085".to_string(),
            open: false,
        }
    }
}

impl StencilConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (STENCIL_*)
    /// 3. Configuration file
    /// 4. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let config_file = args
            .get_one::<String>("config")
            .cloned()
            .unwrap_or_else(|| "./stencil.toml".to_string());

        let mut builder = ConfigBuilder::builder();

        // 1. Start with defaults
        let defaults = Self::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. Add configuration file if it exists
        if Path::new(&config_file).exists() {
            builder = builder.add_source(File::with_name(&config_file.replace(".toml", "")));
        }

        // 3. Add environment variables with STENCIL_ prefix
        builder = builder.add_source(
            Environment::with_prefix("STENCIL")
                .prefix_separator("_")
                .separator("__"), // Double underscore for nested keys
        );

        // 4. Override with CLI arguments (highest priority)
        let mut cli_overrides = std::collections::HashMap::new();

        if let Some(content) = args.get_one::<String>("content") {
            cli_overrides.insert("site.content_root".to_string(), content.clone());
        }
        if let Some(output) = args.get_one::<String>("output") {
            cli_overrides.insert("site.output_dir".to_string(), output.clone());
        }
        if let Some(prefix) = args.get_one::<String>("prefix") {
            cli_overrides.insert("site.path_prefix".to_string(), prefix.clone());
        }
        // Only override with CLI args defined for this subcommand
        if let Some(addr) = args.try_get_one::<String>("addr").unwrap_or(None) {
            cli_overrides.insert("build.addr".to_string(), addr.clone());
        }
        if args
            .try_get_one::<bool>("open")
            .unwrap_or(None)
            .copied()
            .unwrap_or(false)
        {
            cli_overrides.insert("build.open".to_string(), "true".to_string());
        }

        if !cli_overrides.is_empty() {
            builder = builder.add_source(config::Config::try_from(&cli_overrides)?);
        }

        let config = builder.build()?;
        let stencil_config: StencilConfig = config.try_deserialize()?;

        Ok(stencil_config)
    }
}
