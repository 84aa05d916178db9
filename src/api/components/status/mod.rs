use crate::libs::api_response::ApiResponse;
use crate::libs::scheduler::SchedulerState;
use crate::libs::shared_state::SharedState;
use crate::models::refresh::{QuickStatus, StatusSummary};
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/", get(refresh_all))
        .route("/quick", get(quick))
        .route("/summary", get(summary))
        .route("/refresh", post(refresh))
        .with_state(state)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RefreshRequest {
    ids: Option<HashSet<String>>,
}

/// Refreshes everything, then answers with the registry as it now stands.
async fn refresh_all(State(state): State<SharedState>) -> eyre::Result<ApiResponse, ApiResponse> {
    state.scheduler.trigger(None).await?;
    let servers = state
        .db_driver
        .all_servers()
        .map_err(|e| ApiResponse::internal(&e.to_string()))?;
    Ok(ApiResponse::ok("", Some(json!(servers))))
}

async fn quick(State(state): State<SharedState>) -> eyre::Result<ApiResponse, ApiResponse> {
    let report = state.scheduler.trigger(None).await?;
    let rows: Vec<QuickStatus> = report.outcomes.iter().map(QuickStatus::from).collect();
    Ok(ApiResponse::ok("", Some(json!(rows))))
}

async fn refresh(
    State(state): State<SharedState>,
    body: Bytes,
) -> eyre::Result<ApiResponse, ApiResponse> {
    let req: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiResponse::bad_request(e.to_string()))?
    };
    let report = state.scheduler.trigger(req.ids).await?;
    Ok(ApiResponse::ok(
        format!("{} changed", report.changes().count()),
        Some(json!(report.as_ref())),
    ))
}

#[derive(Serialize)]
struct SummaryView {
    #[serde(flatten)]
    counts: StatusSummary,
    scheduler: SchedulerState,
}

/// Dashboard counters from the registry as it is, without probing.
async fn summary(State(state): State<SharedState>) -> ApiResponse {
    state
        .db_driver
        .all_servers()
        .map(|servers| {
            let view = SummaryView {
                counts: StatusSummary::of(&servers),
                scheduler: state.scheduler.state(),
            };
            ApiResponse::ok("", Some(json!(view)))
        })
        .map_err(|e| ApiResponse::internal(&e.to_string()))
        .into()
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{send, test_app};
    use crate::libs::db_driver::tests::seed;
    use crate::libs::prober::tests::FakeProber;
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn by_id<'a>(rows: &'a Value, id: &str) -> &'a Value {
        rows.as_array()
            .unwrap()
            .iter()
            .find(|r| r["id"] == id)
            .unwrap()
    }

    #[tokio::test]
    async fn refresh_then_listing_agree() {
        let prober = FakeProber::new(
            &[("10.0.0.1", true), ("10.0.0.2", false), ("10.0.0.3", true)],
            Duration::from_millis(10),
        );
        let (app, db) = test_app(prober);
        seed(&db, "a", "10.0.0.1");
        seed(&db, "b", "10.0.0.2");
        seed(&db, "c", "10.0.0.3");

        let (status, headers, body) = send(&app, Method::GET, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["cache-control"], "no-cache, no-store, must-revalidate");
        assert_eq!(by_id(&body["data"], "a")["status"], "online");
        assert_eq!(by_id(&body["data"], "b")["status"], "offline");
        assert_eq!(by_id(&body["data"], "c")["status"], "online");

        let (_, _, listing) = send(&app, Method::GET, "/servers", None).await;
        for id in ["a", "b", "c"] {
            let row = by_id(&listing["data"], id);
            assert_eq!(row["status"], by_id(&body["data"], id)["status"]);
            assert!(!row["last_checked"].is_null());
        }
    }

    #[tokio::test]
    async fn quick_calls_in_quick_succession_share_one_probe_round() {
        let prober = FakeProber::new(&[("10.0.0.1", true)], Duration::from_millis(200));
        let calls = prober.calls.clone();
        let (app, db) = test_app(prober);
        seed(&db, "a", "10.0.0.1");
        seed(&db, "b", "10.0.0.2");
        seed(&db, "c", "10.0.0.3");

        let (first, second) = tokio::join!(send(&app, Method::GET, "/status/quick", None), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            send(&app, Method::GET, "/status/quick", None).await
        });

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(second.0, StatusCode::OK);
        assert_eq!(first.2["data"], second.2["data"]);
        let row = by_id(&first.2["data"], "a");
        assert_eq!(row["is_online"], true);
        assert_eq!(row["ip_address"], "10.0.0.1");
        assert!(row["checked_at"].is_string());
    }

    #[tokio::test]
    async fn explicit_refresh_reports_changes_for_requested_ids() {
        let (app, db) = test_app(FakeProber::new(&[("10.0.0.1", true)], Duration::ZERO));
        seed(&db, "a", "10.0.0.1");
        seed(&db, "b", "10.0.0.2");

        let (status, _, body) = send(
            &app,
            Method::POST,
            "/status/refresh",
            Some(json!({"ids": ["a"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "1 changed");
        let outcomes = body["data"]["outcomes"].as_array().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0]["previous_status"], "offline");
        assert_eq!(outcomes[0]["new_status"], "online");
        assert_eq!(outcomes[0]["changed"], true);

        let (_, _, body) = send(&app, Method::GET, "/status/summary", None).await;
        assert_eq!(
            body["data"],
            json!({"total": 2, "online": 1, "offline": 1, "unchecked": 1, "scheduler": "idle"})
        );
    }

    #[tokio::test]
    async fn malformed_refresh_body_is_bad_request() {
        let (app, _) = test_app(FakeProber::new(&[], Duration::ZERO));
        let (status, _, _) = send(
            &app,
            Method::POST,
            "/status/refresh",
            Some(json!({"ids": "a"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
