use axum::{
    http::Uri,
    response::{IntoResponse, Response},
};
use std::any::Any;

use crate::error::ApiError;

/// Turns a handler panic into a 500 envelope instead of a dropped connection.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    tracing::error!("Handler panicked: {}", detail);
    ApiError::internal_server_error("Internal server error").into_response()
}

pub async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("Route {} not found", uri.path()))
}
