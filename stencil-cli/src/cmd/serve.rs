use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use stencil_core::Site;
use stencil_dev_server::{DevServer, DevServerConfig};
use tracing::{error, warn};

use crate::config::StencilConfig;

pub fn make_subcommand() -> Command {
    crate::cmd::build::add_build_args(Command::new("serve"))
        .about("Build the site, watch for changes, and serve it with live reload")
        .arg(
            Arg::new("addr")
                .short('a')
                .long("addr")
                .value_name("ADDR")
                .help("Address to bind the dev server to"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("build-only")
                .long("build-only")
                .help("Build and watch without serving")
                .action(clap::ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let config = StencilConfig::load(args)?;
    let addr = config.build.addr.clone();
    let open = config.build.open;
    let build_only = args.get_flag("build-only");

    let site = Site::new(config.site)?;

    let summary = site.rebuild().await?;
    for failure in &summary.failed {
        warn!(source = %failure.source.display(), error = %failure.error, "unit failed");
    }

    // Incremental rebuilds run in the background; its termination is an
    // error to report, not a reason to stop serving the last good build.
    let watch_handle = site.watch();
    tokio::spawn(async move {
        match watch_handle.await {
            Ok(Err(e)) => error!(%e, "watch loop terminated"),
            Err(e) => error!(%e, "watch task panicked"),
            Ok(Ok(())) => {}
        }
    });

    if build_only {
        // No server, but still report each completed cycle; ctrl-c ends
        // the process.
        let mut reload_rx = site.subscribe_reload();
        tokio::spawn(async move {
            while reload_rx.recv().await.is_ok() {
                println!("Rebuilt; output is current");
            }
        });
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let site_config = site.config();
    let server = DevServer::new(
        DevServerConfig {
            addr: addr.clone(),
            output_dir: site_config.output_dir.clone(),
            path_prefix: site_config.path_prefix.clone(),
            static_routes: site_config
                .static_mappings
                .iter()
                .map(|m| (m.url_path.clone(), m.dest_rel()))
                .collect(),
        },
        site.reload_channel(),
    );

    if open {
        let url = format!("http://{}{}", addr, site_config.path_prefix);
        if let Err(e) = open::that(&url) {
            warn!(%e, "failed to open browser");
        }
    }

    server.run().await
}
