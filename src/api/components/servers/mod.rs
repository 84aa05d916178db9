use crate::api::components::servers::models::{AddServerRequest, UpdateServerRequest};
use crate::libs::api_response::ApiResponse;
use crate::libs::shared_state::SharedState;
use crate::models::server::Server;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub mod models;

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/", get(get_servers).post(add_server))
        .route(
            "/{id}",
            get(get_by_id).patch(update_server).delete(delete_server),
        )
        .with_state(state)
}

async fn get_by_id(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResponse {
    state
        .db_driver
        .get_server_by_id(id)
        .map(|a| {
            a.map(|s| ApiResponse::ok("", Some(json!(s))))
                .unwrap_or(ApiResponse::not_found("server not found"))
        })
        .map_err(|e| ApiResponse::internal(&e.to_string()))
        .into()
}

async fn delete_server(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResponse {
    state
        .db_driver
        .delete_server(id)
        .map(|_| ApiResponse::ok("server deleted", None))
        .map_err(ApiResponse::from)
        .into()
}

async fn update_server(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateServerRequest>,
) -> eyre::Result<ApiResponse, ApiResponse> {
    req.validate().map_err(ApiResponse::bad_request)?;
    let server = state.db_driver.update_server(id, req)?;
    Ok(ApiResponse::ok("", Some(json!(server))))
}

async fn get_servers(State(state): State<SharedState>) -> ApiResponse {
    state
        .db_driver
        .all_servers()
        .map(|f| ApiResponse::ok("", Some(json!(f))))
        .map_err(|e| ApiResponse::internal(&e.to_string()))
        .into()
}

async fn add_server(
    State(state): State<SharedState>,
    Json(req): Json<AddServerRequest>,
) -> eyre::Result<ApiResponse, ApiResponse> {
    req.validate().map_err(ApiResponse::bad_request)?;

    let server = Server::from_req(cuid2::create_id(), req);
    state
        .db_driver
        .add_server(server.clone())
        .map(|_| ApiResponse::created(json!(server)))
        .map_err(|e| ApiResponse::internal(&e.to_string()))
}
