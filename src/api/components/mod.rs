use crate::libs::shared_state::SharedState;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub mod servers;
pub mod status;

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .nest("/servers", servers::routes(state.clone()))
        .nest("/status", status::routes(state))
        .route("/ping", get(root))
}

pub(crate) async fn root() -> impl IntoResponse {
    "UP".into_response()
}
