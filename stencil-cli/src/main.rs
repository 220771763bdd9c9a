use anyhow::Result;
use clap::Command;
use tracing_subscriber::EnvFilter;

mod cmd;
mod config;

fn make_app() -> Command {
    Command::new("stencil")
        .about("Static site engine with incremental rebuilds and live reload")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(cmd::build::make_subcommand())
        .subcommand(cmd::serve::make_subcommand())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let matches = make_app().get_matches();
    match matches.subcommand() {
        Some(("build", args)) => cmd::build::execute(args).await,
        Some(("serve", args)) => cmd::serve::execute(args).await,
        _ => unreachable!("subcommand required"),
    }
}
