use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod cli;
mod config;
mod enrich;
mod frequency;
mod indexer;
mod search;
mod semantic;
mod store;
#[cfg(test)]
mod tests;
mod web;

use cli::{Args, Command};

fn setup_logger() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Base directory for the store, cache and config files.
fn base_path() -> PathBuf {
    std::env::var_os("MEMTAB_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    setup_logger();

    let args = Args::parse();
    let base = base_path();
    std::fs::create_dir_all(&base)?;

    let config = config::Config::load_with(&base)?;
    let app = Arc::new(app::App::build(config, &base)?);

    match args.command {
        Command::Daemon { host, port } => cli::handle_daemon(app, host, port),
        Command::Index { url, title, content } => cli::handle_index(&app, url, title, content),
        Command::Search { query } => cli::handle_search(&app, query),
        Command::Probe { url } => cli::handle_probe(&app, url),
        Command::Visit { url } => cli::handle_visit(&app, url),
        Command::Stats => cli::handle_stats(&app),
        Command::Evict { dry_run } => cli::handle_evict(&app, dry_run),
    }
}
