//! Error responses.
//!
//! Every failure leaves the server as `{"error": "<code>", "parameters": ...}`.
//! By default `parameters` only carries structured validation detail; the
//! [`echo_error_detail`] middleware (enabled in `dev`) replaces it with the
//! internal error string. Server-side the full error is always logged.

use axum::{
    Json,
    body::Body,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::Error;

/// Wire shape of an error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable code.
    pub error: &'static str,
    /// Detail, or `null`.
    pub parameters: Value,
}

/// Full error text, kept on the response for [`echo_error_detail`].
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        if status.is_server_error() {
            error!(code, error = %message, "Request failed");
        } else {
            debug!(code, error = %message, "Request rejected");
        }

        let parameters = match &self {
            Self::InvalidParameter { name, reason } => json!({ *name: reason }),
            _ => Value::Null,
        };

        let mut response = (status, Json(ErrorBody { error: code, parameters })).into_response();
        response
            .extensions_mut()
            .insert(ErrorDetail { code, message });
        response
    }
}

/// Replace `parameters` of error responses with the internal error string.
///
/// Only mounted in environments that allow echoing detail.
pub async fn echo_error_detail(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;
    let Some(detail) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };
    let status: StatusCode = response.status();
    let mut echoed = (
        status,
        Json(ErrorBody {
            error: detail.code,
            parameters: Value::String(detail.message),
        }),
    )
        .into_response();
    *echoed.headers_mut() = response.headers().clone();
    echoed.headers_mut().remove(header::CONTENT_LENGTH);
    echoed
}
