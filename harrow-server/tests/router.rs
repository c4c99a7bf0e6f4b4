use anyhow::Result;
use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

#[path = "support/mod.rs"]
mod support;
use support::{EchoScanner, config, toolkit};

use harrow_server::{AppState, create_app};

fn app() -> axum::Router {
    let mut config = config(Duration::ZERO);
    config.dev_mode = false;
    let state = AppState::new(config, toolkit(Arc::new(EchoScanner::default())));
    create_app(state)
}

fn preflight(origin: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/scans")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())?)
}

#[tokio::test]
async fn preflight_from_listed_origin_is_allowed() -> Result<()> {
    let response = app().oneshot(preflight("http://localhost:3000")?).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .map(|value| value.as_bytes()),
        Some(&b"http://localhost:3000"[..])
    );
    Ok(())
}

#[tokio::test]
async fn preflight_from_unlisted_origin_gets_no_allow_header() -> Result<()> {
    let response = app().oneshot(preflight("http://evil.test")?).await?;

    assert!(
        !response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );
    Ok(())
}

#[tokio::test]
async fn malformed_scan_body_is_a_json_error() -> Result<()> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/scans")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"url\":"))?;

    let response = app().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["error"]["status"], 400);
    assert!(body["error"]["message"].is_string());
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_not_found() -> Result<()> {
    let request = Request::builder()
        .uri("/api/nothing")
        .body(Body::empty())?;

    let response = app().oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
