use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use stencil_core::Site;

use crate::config::StencilConfig;

pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("content")
                .short('s')
                .long("content")
                .value_name("DIR")
                .help("Content root directory"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for the generated site"),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .value_name("PATH")
                .help("URL path prefix the site is hosted under"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .default_value("./stencil.toml"),
        )
}

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("build")).about("Build the site into the output directory")
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let config = StencilConfig::load(args)?;

    let site = Site::new(config.site)?;
    let summary = site.rebuild().await?;

    for failure in &summary.failed {
        eprintln!("error: {}: {}", failure.source.display(), failure.error);
    }
    println!(
        "Built {} files ({} failed) in {:.1?}",
        summary.succeeded,
        summary.failed.len(),
        summary.duration
    );

    if !summary.is_success() {
        anyhow::bail!("{} units failed to build", summary.failed.len());
    }

    Ok(())
}
