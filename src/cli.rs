use std::fs;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::app::App;
use crate::indexer::IndexRequest;

#[derive(Parser, Debug)]
#[command(version, about = "Local personal web-memory search engine")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP daemon
    Daemon {
        /// Bind host; overrides the config value
        #[clap(long)]
        host: Option<String>,

        /// Bind port; overrides the config value
        #[clap(long)]
        port: Option<u16>,
    },

    /// Index a page from the command line
    Index {
        /// Full page URL, query string included
        url: String,

        /// Page title
        #[clap(short, long, default_value = "")]
        title: String,

        /// Read page content from this file ("-" for stdin)
        #[clap(short, long)]
        content: String,
    },

    /// Search indexed pages
    Search {
        /// The query
        query: String,
    },

    /// Check whether a URL is indexed and fresh
    Probe { url: String },

    /// Record a visit to a URL
    Visit { url: String },

    /// Print service statistics
    Stats,

    /// Run an eviction pass
    Evict {
        /// Preview candidates instead of evicting
        #[clap(long, default_value = "false")]
        dry_run: bool,
    },
}

pub fn handle_index(app: &App, url: String, title: String, content: String) -> anyhow::Result<()> {
    let content = if content == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        fs::read_to_string(&content).with_context(|| format!("failed to read {content}"))?
    };

    let outcome = app.ingest(IndexRequest {
        url,
        title,
        content,
        favicon_url: None,
    })?;
    println!("{} (id {})", serde_json::to_string(&outcome.status)?, outcome.id);
    Ok(())
}

pub fn handle_search(app: &App, query: String) -> anyhow::Result<()> {
    let hits = app.search(&query);
    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{:2}. [{:.3}] {} — {} (semantic {:.3}, keyword {:.3}, visits {})",
            i + 1,
            hit.final_score,
            hit.page.title,
            hit.page.url,
            hit.semantic_score,
            hit.keyword_score,
            hit.page.visit_count,
        );
    }
    Ok(())
}

pub fn handle_probe(app: &App, url: String) -> anyhow::Result<()> {
    let outcome = app.probe(&url)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

pub fn handle_visit(app: &App, url: String) -> anyhow::Result<()> {
    let outcome = app.track_visit(&url)?;
    println!(
        "page {} visited {} times (arc score {:.3})",
        outcome.page_id, outcome.visit_count, outcome.arc_score
    );
    Ok(())
}

pub fn handle_stats(app: &App) -> anyhow::Result<()> {
    let stats = app.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn handle_evict(app: &App, dry_run: bool) -> anyhow::Result<()> {
    if dry_run {
        let candidates = app.eviction_preview(10)?;
        println!("{}", serde_json::to_string_pretty(&candidates)?);
    } else {
        let outcome = app.eviction_run()?;
        println!(
            "evicted {} pages, {} remain",
            outcome.evicted_count, outcome.total_pages
        );
    }
    Ok(())
}

pub fn handle_daemon(app: Arc<App>, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| app.config.server.host.clone());
    let port = port.unwrap_or(app.config.server.port);
    let addr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;
    crate::web::start_daemon(app, addr)
}
