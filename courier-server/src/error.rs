use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use courier::{BrokerError, StoreError};
use serde_json::json;

/// HTTP face of [`BrokerError`], plus request validation failures.
#[derive(Debug)]
pub enum ApiError {
    Broker(BrokerError),
    BadRequest(String),
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        ApiError::Broker(err)
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::BadRequest(msg) => return json_error(StatusCode::BAD_REQUEST, msg),
            ApiError::Broker(err) => err,
        };

        let status = match &err {
            BrokerError::NotFound => StatusCode::NOT_FOUND,
            BrokerError::UnsupportedDelay { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BrokerError::Malformed(_) => StatusCode::BAD_GATEWAY,
            BrokerError::Queue(_) => StatusCode::BAD_GATEWAY,
            BrokerError::Store(StoreError::LockTimeout(_) | StoreError::Unavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BrokerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(%status, "request failed: {err}");
        }
        json_error(status, err.to_string())
    }
}
