//! `feedkeeper status` command implementation
//!
//! Prints the resume ledger and the size of every destination table.

use crate::config::Config;
use crate::error::Result;
use crate::framework::store::{ProgressEntry, RecordStore};
use crate::storage;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct StatusReport {
    backend: &'static str,
    tables: Vec<TableCount>,
    progress: Vec<ProgressEntry>,
}

#[derive(Debug, Serialize)]
struct TableCount {
    table: String,
    rows: i64,
}

pub async fn run(config: &Config, json: bool) -> Result<()> {
    let store = storage::connect(&config.database.url, config.database.max_connections).await?;
    let output = render(&*store, json).await?;
    print!("{}", output);
    Ok(())
}

async fn render(store: &dyn RecordStore, json: bool) -> Result<String> {
    let report = StatusReport {
        backend: store.backend(),
        tables: store
            .table_counts()
            .await?
            .into_iter()
            .map(|(table, rows)| TableCount { table, rows })
            .collect(),
        progress: store.list_progress().await?,
    };

    if json {
        let text = serde_json::to_string_pretty(&report)?;
        return Ok(format!("{}\n", text));
    }

    let mut out = String::new();
    out.push_str(&format!("{} ({})\n", "Tables:".cyan().bold(), report.backend));
    let mut tables = Table::new();
    tables
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Table", "Rows"]);
    for count in &report.tables {
        tables.add_row(vec![count.table.clone(), count.rows.to_string()]);
    }
    out.push_str(&format!("{}\n\n", tables));

    if report.progress.is_empty() {
        out.push_str("No progress recorded yet.\n");
        return Ok(out);
    }

    out.push_str(&format!("{}\n", "Progress:".cyan().bold()));
    let mut progress = Table::new();
    progress
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Target", "Collection", "Status", "Fetched", "Pages", "Cursor", "Updated", "Error"]);
    for entry in &report.progress {
        progress.add_row(vec![
            entry.target_key.clone(),
            entry.collection.clone(),
            entry.status.to_string(),
            entry.fetched.to_string(),
            entry.pages.to_string(),
            entry.cursor.clone().unwrap_or_else(|| "-".to_string()),
            entry.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.last_error.as_deref().map(|e| truncate(e, 60)).unwrap_or_else(|| "-".to_string()),
        ]);
    }
    out.push_str(&format!("{}\n", progress));
    Ok(out)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::framework::store::ProgressStatus;
    use crate::storage::SqliteStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_status_of_empty_store() {
        let store = SqliteStore::in_memory().await.unwrap();
        let text = render(&store, false).await.unwrap();
        assert!(text.contains("posts"));
        assert!(text.contains("No progress recorded yet."));
    }

    #[tokio::test]
    async fn test_status_json_lists_progress() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .save_progress(&ProgressEntry {
                target_key: "123".to_string(),
                collection: "comments".to_string(),
                status: ProgressStatus::Failed,
                cursor: Some("c1".to_string()),
                fetched: 100,
                pages: 1,
                last_error: Some("API error: boom".to_string()),
                run_id: Some("run-1".to_string()),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let text = render(&store, true).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["backend"], "sqlite");
        assert_eq!(value["progress"][0]["status"], "failed");
        assert_eq!(value["progress"][0]["cursor"], "c1");
        assert_eq!(value["tables"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
