use anyhow::Result;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use std::{sync::atomic::Ordering, time::Duration};
use tokio::time::{sleep, timeout};

#[path = "support/mod.rs"]
mod support;
use support::{EchoScanner, build_test_app, config};

async fn start(server: &TestServer, url: &str) -> String {
    let response = server.post("/api/scans").json(&json!({ "url": url })).await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    body["scan_id"]
        .as_str()
        .expect("scan_id present")
        .to_string()
}

async fn wait_for_status(
    server: &TestServer,
    id: &str,
    done: impl Fn(&Value) -> bool,
) -> Value {
    timeout(Duration::from_secs(5), async {
        loop {
            let response = server.get("/api/status").add_query_param("id", id).await;
            response.assert_status_ok();
            let body: Value = response.json();
            if done(&body) {
                return body;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scan did not reach the expected state in time")
}

#[tokio::test]
async fn accepted_scan_runs_to_completion() -> Result<()> {
    let app = build_test_app(config(Duration::ZERO), EchoScanner::default())?;

    let id = start(&app.server, "http://target.test").await;
    assert!(id.starts_with("scan_"));

    let session = wait_for_status(&app.server, &id, |s| s["status"] == "finished").await;
    assert_eq!(session["phase"], "Finished");
    assert_eq!(session["progress"], 100);
    assert_eq!(session["discovered"], 3);
    assert_eq!(session["targets"], 2);
    assert_eq!(session["findings"], 2);
    assert!(session.get("end_time").is_some());

    let findings: Value = app
        .server
        .get("/api/scans/findings")
        .add_query_param("id", &id)
        .await
        .json();
    let urls: Vec<&str> = findings
        .as_array()
        .expect("findings array")
        .iter()
        .filter_map(|f| f["url"].as_str())
        .collect();
    assert_eq!(urls, ["http://target.test/admin", "http://target.test/login"]);
    assert_eq!(findings[0]["count"], 1);
    assert_eq!(findings[1]["severity"], "low");

    let listed: Value = app.server.get("/api/scans").await.json();
    assert!(
        listed
            .as_array()
            .expect("session list")
            .iter()
            .any(|s| s["id"] == id.as_str())
    );
    Ok(())
}

#[tokio::test]
async fn invalid_requests_get_error_bodies() -> Result<()> {
    let app = build_test_app(config(Duration::ZERO), EchoScanner::default())?;

    let response = app
        .server
        .post("/api/scans")
        .json(&json!({ "url": "not a url" }))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], 400);
    assert!(body["error"]["message"].as_str().is_some_and(|m| m.contains("invalid")));

    let response = app.server.post("/api/scans").json(&json!({})).await;
    response.assert_status_bad_request();

    let response = app
        .server
        .post("/api/scans")
        .content_type("application/json")
        .bytes("{\"url\":".into())
        .await;
    response.assert_status_bad_request();

    assert!(app.state.scans.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_or_missing_ids() -> Result<()> {
    let app = build_test_app(config(Duration::ZERO), EchoScanner::default())?;

    let response = app
        .server
        .post("/api/scans/stop")
        .add_query_param("id", "scan_unknown")
        .await;
    response.assert_status_not_found();
    let body: Value = response.json();
    assert_eq!(body["error"]["status"], 404);

    app.server
        .get("/api/status")
        .add_query_param("id", "scan_unknown")
        .await
        .assert_status_not_found();

    app.server.post("/api/scans/stop").await.assert_status_bad_request();
    app.server.get("/api/scans/findings").await.assert_status_bad_request();
    Ok(())
}

#[tokio::test]
async fn stopping_a_running_scan_cancels_it() -> Result<()> {
    let scanner = EchoScanner {
        hold: true,
        ..EchoScanner::default()
    };
    let app = build_test_app(config(Duration::ZERO), scanner)?;
    let id = start(&app.server, "http://target.test").await;

    wait_for_status(&app.server, &id, |s| s["stage"] == "vulnerability_scan").await;

    let response = app
        .server
        .post("/api/scans/stop")
        .add_query_param("id", &id)
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({ "status": "stopped" }));

    let session = wait_for_status(&app.server, &id, |s| s["status"] == "cancelled").await;
    assert_eq!(session["phase"], "Cancelled");
    assert_eq!(session["progress"], 100);
    assert_eq!(app.scanner.launches.load(Ordering::SeqCst), 1);

    // Stopping again is accepted; the session stays cancelled.
    app.server
        .post("/api/scans/stop")
        .add_query_param("id", &id)
        .await
        .assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn ping_and_health() -> Result<()> {
    let app = build_test_app(config(Duration::ZERO), EchoScanner::default())?;

    let ping: Value = app.server.get("/ping").await.json();
    assert_eq!(ping["status"], "ok");

    let health = app.server.get("/health").await;
    health.assert_status_ok();
    let body: Value = health.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["scans"]["capacity"], 5);
    assert_eq!(body["checks"]["observers"], 0);
    Ok(())
}
