use anyhow::Result;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::timeout;

#[path = "support/mod.rs"]
mod support;
use support::{EchoScanner, build_test_app, config};

#[tokio::test]
async fn observer_receives_envelopes_from_binding_onwards() -> Result<()> {
    // The pipeline waits for an observer before it starts.
    let app = build_test_app(config(Duration::from_secs(5)), EchoScanner::default())?;

    let response = app
        .server
        .post("/api/scans")
        .json(&json!({ "url": "http://target.test" }))
        .await;
    let scan_id = response.json::<Value>()["scan_id"]
        .as_str()
        .expect("scan_id present")
        .to_string();

    let mut socket = app
        .server
        .get_websocket("/ws")
        .add_query_param("id", &scan_id)
        .await
        .into_websocket()
        .await;

    let envelopes = timeout(Duration::from_secs(5), async {
        let mut seen = Vec::new();
        loop {
            let envelope: Value = socket.receive_json().await;
            let done = envelope["data"]["event"] == "scan_complete";
            seen.push(envelope);
            if done {
                return seen;
            }
        }
    })
    .await?;

    // Nothing from before the binding, so the first frame is Discovery.
    assert_eq!(envelopes[0]["type"], "state");
    assert_eq!(envelopes[0]["data"]["phase"], "Discovery");
    assert_eq!(envelopes[0]["data"]["id"], scan_id.as_str());

    let live_counts: Vec<u64> = envelopes
        .iter()
        .filter(|e| e["data"]["event"] == "discovery_live")
        .filter_map(|e| e["data"]["count"].as_u64())
        .collect();
    assert_eq!(live_counts, [1, 2, 3]);

    let validated: Vec<&str> = envelopes
        .iter()
        .filter(|e| e["data"]["event"] == "discovery")
        .filter_map(|e| e["data"]["url"].as_str())
        .collect();
    assert_eq!(validated, ["http://target.test/admin", "http://target.test/login"]);

    let findings = envelopes
        .iter()
        .filter(|e| e["data"]["event"] == "vulnerability")
        .count();
    assert_eq!(findings, 2);

    let mut last_progress = 0;
    for state in envelopes.iter().filter(|e| e["type"] == "state") {
        let progress = state["data"]["progress"].as_u64().unwrap_or_default();
        assert!(progress >= last_progress, "progress went backwards");
        last_progress = progress;
    }
    assert_eq!(last_progress, 100);

    let complete = envelopes.last().expect("scan_complete frame");
    assert_eq!(complete["data"]["targets"], 2);
    assert_eq!(complete["data"]["findings"], 2);
    Ok(())
}

#[tokio::test]
async fn socket_for_unknown_scan_is_refused() -> Result<()> {
    let app = build_test_app(config(Duration::ZERO), EchoScanner::default())?;

    app.server
        .get_websocket("/ws")
        .add_query_param("id", "scan_unknown")
        .await
        .assert_status_not_found();
    assert_eq!(app.state.websocket_manager.binding_count(), 0);
    Ok(())
}

#[tokio::test]
async fn disconnecting_unbinds_the_session() -> Result<()> {
    let scanner = EchoScanner {
        hold: true,
        ..EchoScanner::default()
    };
    let app = build_test_app(config(Duration::from_secs(5)), scanner)?;
    let scan_id = app
        .server
        .post("/api/scans")
        .json(&json!({ "url": "http://target.test" }))
        .await
        .json::<Value>()["scan_id"]
        .as_str()
        .expect("scan_id present")
        .to_string();

    let socket = app
        .server
        .get_websocket("/ws")
        .add_query_param("id", &scan_id)
        .await
        .into_websocket()
        .await;

    let manager = app.state.websocket_manager.clone();
    timeout(Duration::from_secs(5), async {
        while manager.binding_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    socket.close().await;

    timeout(Duration::from_secs(5), async {
        while manager.binding_count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    // The session keeps running without an observer.
    let status: Value = app
        .server
        .get("/api/status")
        .add_query_param("id", &scan_id)
        .await
        .json();
    assert_eq!(status["status"], "running");

    app.state.scans.shutdown().await;
    Ok(())
}
