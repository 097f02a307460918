//! `feedkeeper posts|profiles|search-posts` command implementation

use crate::api::ApiClient;
use crate::cli::{FetchArgs, PostWindowArgs};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::framework::orchestrator::{Orchestrator, RunOptions};
use crate::framework::stats::{RunReport, TargetStatus};
use crate::framework::types::SearchType;
use crate::input::{self, InputKind};
use crate::storage;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Which kind of target the input lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Posts,
    Profiles { feed_posts: bool, community_posts: bool },
    SearchPosts(SearchType),
}

/// Fetch every target of the input and print a summary
pub async fn run(
    config: &Config,
    kind: FetchKind,
    args: &FetchArgs,
    window: &PostWindowArgs,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let options = run_options(config, kind, args, window)?;
    let token = config.require_access_token()?;

    let text = input::read_source(&args.input).await?;
    let lines = input::parse_lines(&text);
    let targets = match kind {
        FetchKind::Posts => input::identifier_targets(&lines, InputKind::Post)?,
        FetchKind::Profiles { .. } => input::identifier_targets(&lines, InputKind::Profile)?,
        FetchKind::SearchPosts(search_type) => {
            input::search_targets(&lines, search_type, window.from_date, window.to_date)?
        },
    };
    info!(input = %args.input, targets = targets.len(), "Loaded targets");

    let source = Arc::new(ApiClient::new(&config.api.base_url, token, config.request_timeout())?);
    let store = storage::connect(&config.database.url, config.database.max_connections).await?;

    let orchestrator = Orchestrator::new(source, store, options)
        .with_retry(config.retry_policy())
        .with_store_timeout(config.store_timeout())
        .with_cancellation(cancel);
    let report = orchestrator.run(targets).await;

    print_summary(&report);
    Ok(report)
}

/// Combine configuration and flags into the options of one run
pub fn run_options(
    config: &Config,
    kind: FetchKind,
    args: &FetchArgs,
    window: &PostWindowArgs,
) -> Result<RunOptions> {
    let concurrency = args.concurrency.unwrap_or(config.ingest.concurrency);
    if concurrency == 0 {
        return Err(IngestError::config("--concurrency must be at least 1"));
    }
    if let (Some(from), Some(to)) = (window.from_date, window.to_date) {
        if from > to {
            return Err(IngestError::config(format!(
                "--from-date ({}) is after --to-date ({})",
                from, to
            )));
        }
    }

    let (fetch_feed_posts, fetch_community_posts) = match kind {
        FetchKind::Profiles {
            feed_posts,
            community_posts,
        } => (feed_posts, community_posts),
        FetchKind::Posts | FetchKind::SearchPosts(_) => (false, false),
    };

    Ok(RunOptions {
        fetch_comments: args.fetch_comments,
        max_comments: args.max_comments,
        max_posts: window.max_posts,
        max_pages: args.max_pages,
        fetch_feed_posts,
        fetch_community_posts,
        from_date: window.from_date,
        to_date: window.to_date,
        owner_profiles: !args.no_owner_profiles,
        refresh: !args.no_refresh,
        restart: args.restart,
        concurrency,
        page_size: config.ingest.page_size,
        refresh_poll: Duration::from_secs(config.ingest.refresh_poll_secs),
        refresh_timeout: Duration::from_secs(config.ingest.refresh_timeout_secs),
    })
}

fn print_summary(report: &RunReport) {
    let stats = &report.stats;

    println!("{}", "Run summary:".cyan().bold());
    println!("  Run id:    {}", report.run_id);
    println!(
        "  Targets:   {} done, {} skipped, {} failed, {} cancelled",
        report.count(TargetStatus::Done).to_string().green(),
        report.count(TargetStatus::Skipped),
        report.count(TargetStatus::Failed).to_string().red(),
        report.count(TargetStatus::Cancelled)
    );
    println!(
        "  Records:   {} inserted, {} updated, {} failed",
        stats.records_inserted, stats.records_updated, stats.records_failed
    );
    println!("  Pages:     {}", stats.pages_fetched);
    println!("  Duration:  {:.1}s", stats.duration_secs);

    let failed: Vec<_> = report
        .targets
        .iter()
        .filter(|t| t.status == TargetStatus::Failed)
        .collect();
    if !failed.is_empty() {
        println!();
        println!("{}", "Failed targets:".red().bold());
        for target in failed {
            println!(
                "  {}: {}",
                target.target_key,
                target.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if let Some(message) = &report.auth_failure {
        println!();
        println!("{} {}", "Stopped:".red().bold(), message);
    } else if report.cancelled {
        println!();
        println!("{}", "Interrupted. Run the same command again to resume.".yellow());
    }
}
