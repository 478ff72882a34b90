//! `/metrics` exposition after real traffic.

mod support;

use axum::http::StatusCode;
use serde_json::json;
use support::{get_request, json_request, test_app};
use tessel_test_utils::fixtures::user_a;

#[tokio::test]
async fn test_metrics_expose_http_and_cache_series() -> Result<(), String> {
    let app = test_app()?;
    app.store.seed(user_a()).map_err(|e| e.to_string())?;

    app.send(json_request("POST", "/api/user/query", json!({ "id": 1 }))?)
        .await?;
    app.settle().await?;
    app.send(json_request("POST", "/api/user/query", json!({ "id": 1 }))?)
        .await?;
    assert_eq!(app.state.users.cached().stats().hits, 1);

    let (status, text) = app.send_text(get_request("/metrics")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("tessel_http_requests_total"));
    assert!(text.contains("tessel_cache_events{event=\"hit\"} 1"));
    assert!(text.contains("tessel_cache_populations_in_flight 0"));
    Ok(())
}
