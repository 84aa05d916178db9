use crate::libs::db_driver::RegistryError;
use crate::libs::scheduler::RefreshError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

#[derive(Debug)]
pub(crate) struct ApiResponse {
    pub message: String,
    pub data: Option<Value>,
    pub status: StatusCode,
}

impl ApiResponse {
    pub(crate) fn ok<M: Into<String>>(message: M, data: Option<Value>) -> Self {
        Self {
            message: message.into(),
            data,
            status: StatusCode::OK,
        }
    }

    pub(crate) fn created(data: Value) -> Self {
        Self {
            message: "created".into(),
            data: Some(data),
            status: StatusCode::CREATED,
        }
    }

    pub fn bad_request<M: Into<String>>(message: M) -> Self {
        Self {
            data: None,
            message: message.into(),
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self {
            data: None,
            message: message.into(),
            status: StatusCode::NOT_FOUND,
        }
    }

    pub(crate) fn internal(msg: &str) -> Self {
        Self {
            message: msg.into(),
            data: None,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn conflict(message: &str) -> Self {
        Self {
            data: None,
            message: message.into(),
            status: StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "message":self.message,
                "data":self.data,
            })),
        )
            .into_response()
    }
}

impl From<eyre::Result<ApiResponse, ApiResponse>> for ApiResponse {
    fn from(value: eyre::Result<ApiResponse, ApiResponse>) -> Self {
        value.unwrap_or_else(|f| f)
    }
}

impl From<RegistryError> for ApiResponse {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => Self::not_found("server not found"),
            RegistryError::Storage(msg) => Self::internal(&msg),
        }
    }
}

impl From<RefreshError> for ApiResponse {
    fn from(e: RefreshError) -> Self {
        match e {
            RefreshError::Busy => Self::conflict(&e.to_string()),
            RefreshError::Failed(msg) => Self::internal(&msg),
        }
    }
}
