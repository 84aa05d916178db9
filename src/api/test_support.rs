use crate::libs::app_config::AppConfig;
use crate::libs::db_driver::DbDriver;
use crate::libs::prober::Prober;
use crate::libs::shared_state::SharedState;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub(crate) fn test_app(prober: impl Prober + 'static) -> (Router, DbDriver) {
    let db = DbDriver::in_memory();
    let state = SharedState::with_parts(
        AppConfig::default().into(),
        db.clone(),
        Arc::new(prober),
    );
    (super::app(state), db)
}

pub(crate) async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, value)
}
