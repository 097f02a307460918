//! End-to-end tests for the feedkeeper binary
//!
//! The API is a wiremock server, the store a SQLite file in a temp dir.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"data": data, "error": null, "status": "ok"}))
}

fn page(items: Value, next: Option<&str>) -> ResponseTemplate {
    ok(json!({
        "items": items,
        "page_info": {"has_next_page": next.is_some(), "cursor": next}
    }))
}

/// Post 1001 with comments on two pages
async fn mount_post(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/facebook/post/1001"))
        .respond_with(ok(json!({"id": "1001", "text": "hello", "comments_count": 3})))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/facebook/post/1001/comments"))
        .and(query_param("cursor", "c1"))
        .respond_with(page(json!([{"id": "3", "replies_count": 0}]), None))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/facebook/post/1001/comments"))
        .respond_with(page(
            json!([{"id": "1", "replies_count": 0}, {"id": "2", "replies_count": 0}]),
            Some("c1"),
        ))
        .with_priority(2)
        .mount(server)
        .await;
}

fn feedkeeper(dir: &TempDir, server: &MockServer) -> Command {
    let mut cmd = Command::cargo_bin("feedkeeper").unwrap();
    cmd.current_dir(dir.path())
        .env("FEEDKEEPER_ACCESS_TOKEN", "test-token")
        .env("FEEDKEEPER_API_URL", server.uri())
        .env("FEEDKEEPER_MAX_ATTEMPTS", "1")
        .env("DATABASE_URL", format!("sqlite://{}?mode=rwc", dir.path().join("feeds.db").display()))
        .env("NO_COLOR", "1")
        .env_remove("LOG_LEVEL")
        .env_remove("LOG_OUTPUT");
    cmd
}

fn status_json(dir: &TempDir, server: &MockServer) -> Value {
    let output = feedkeeper(dir, server).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

fn table_rows(status: &Value, table: &str) -> i64 {
    status["tables"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["table"] == table)
        .and_then(|t| t["rows"].as_i64())
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_posts_from_stdin_then_resume_skips() {
    let server = MockServer::start().await;
    mount_post(&server).await;
    let dir = TempDir::new().unwrap();

    feedkeeper(&dir, &server)
        .args(["posts", "--fetch-comments", "--no-refresh", "--no-owner-profiles"])
        .write_stdin("# watched posts\n1001\nhttps://www.facebook.com/someone/posts/1001\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 done"));

    let status = status_json(&dir, &server);
    assert_eq!(table_rows(&status, "posts"), 1);
    assert_eq!(table_rows(&status, "comments"), 3);
    assert_eq!(table_rows(&status, "connections"), 3);

    feedkeeper(&dir, &server)
        .args(["posts", "--fetch-comments", "--no-refresh", "--no-owner-profiles"])
        .write_stdin("1001\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 skipped"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_posts_from_file() {
    let server = MockServer::start().await;
    mount_post(&server).await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("posts.txt"), "1001\n").unwrap();

    feedkeeper(&dir, &server)
        .args(["posts", "posts.txt", "--no-refresh", "--no-owner-profiles"])
        .assert()
        .success();

    let status = status_json(&dir, &server);
    assert_eq!(table_rows(&status, "posts"), 1);
    assert_eq!(table_rows(&status, "comments"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_token_is_usage_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    feedkeeper(&dir, &server)
        .env_remove("FEEDKEEPER_ACCESS_TOKEN")
        .args(["posts", "--no-refresh"])
        .write_stdin("1001\n")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("FEEDKEEPER_ACCESS_TOKEN"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_input_is_usage_error() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    feedkeeper(&dir, &server)
        .args(["posts", "--no-refresh"])
        .write_stdin("# nothing here\n\n")
        .assert()
        .code(2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_token_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    feedkeeper(&dir, &server)
        .args(["posts", "--no-refresh"])
        .write_stdin("1001\n1002\n")
        .assert()
        .code(3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_post_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/facebook/post/404"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "error": {"code": "NotFoundError", "message": "Post not found"},
            "status": "fail"
        })))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    feedkeeper(&dir, &server)
        .args(["posts", "--no-refresh"])
        .write_stdin("404\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 skipped"));

    let status = status_json(&dir, &server);
    let progress = status["progress"].as_array().unwrap();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0]["status"], "done");
    assert_eq!(table_rows(&status, "posts"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_collection_forces_refetch() {
    let server = MockServer::start().await;
    mount_post(&server).await;
    let dir = TempDir::new().unwrap();

    feedkeeper(&dir, &server)
        .args(["posts", "--fetch-comments", "--no-refresh", "--no-owner-profiles"])
        .write_stdin("1001\n")
        .assert()
        .success();

    feedkeeper(&dir, &server)
        .args(["reset", "--collection", "comments", "--parent", "1001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 3 connection rows and 1 progress rows"));

    feedkeeper(&dir, &server)
        .args(["posts", "--fetch-comments", "--no-refresh", "--no-owner-profiles"])
        .write_stdin("1001\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 done"));

    let status = status_json(&dir, &server);
    assert_eq!(table_rows(&status, "comments"), 3);
    assert_eq!(table_rows(&status, "connections"), 3);
}

#[test]
fn test_no_subcommand_prints_help() {
    Command::cargo_bin("feedkeeper")
        .unwrap()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}
