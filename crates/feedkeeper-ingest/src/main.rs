//! Feedkeeper CLI - Main entry point

use anyhow::Result;
use clap::Parser;
use feedkeeper_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use feedkeeper_ingest::cli::PostWindowArgs;
use feedkeeper_ingest::commands::{self, fetch::FetchKind, reset, status};
use feedkeeper_ingest::config::Config;
use feedkeeper_ingest::{Cli, Commands};
use std::process;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("feedkeeper")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let guard = init_logging(&log_config).ok();

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            commands::error_exit_code(&e)
        },
    };

    drop(guard);
    process::exit(code);
}

async fn execute(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.database_url)?;
    let cancel = shutdown_token();

    let (kind, fetch, window) = match cli.command {
        Commands::Posts { fetch } => (FetchKind::Posts, fetch, PostWindowArgs::default()),
        Commands::Profiles {
            fetch,
            fetch_feed_posts,
            fetch_community_posts,
            posts,
        } => (
            FetchKind::Profiles {
                feed_posts: fetch_feed_posts,
                community_posts: fetch_community_posts,
            },
            fetch,
            posts,
        ),
        Commands::SearchPosts {
            fetch,
            search_type,
            posts,
        } => (FetchKind::SearchPosts(search_type), fetch, posts),
        Commands::Status { json } => {
            status::run(&config, json).await?;
            return Ok(commands::EXIT_OK);
        },
        Commands::Reset {
            all,
            collection,
            parent,
        } => {
            reset::run(&config, reset::scope(all, collection, parent)).await?;
            return Ok(commands::EXIT_OK);
        },
    };

    let report = commands::fetch::run(&config, kind, &fetch, &window, cancel).await?;
    Ok(commands::exit_code(&report))
}

/// Token cancelled on Ctrl-C. Runs stop at the next page boundary.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after the current page");
                token.cancel();
            },
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });
    cancel
}
