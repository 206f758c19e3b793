//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, State,
        rejection::{BytesRejection, JsonRejection},
    },
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info};

use super::AppState;
use super::audit::{self, AuditEvent};
use super::auth::{AuthenticatedUser, auth_middleware};
use super::response::echo_error_detail;
use crate::pki::{CSR_TAGS, decode_pem_block, parse_certificate, parse_csr, verify_csr};
use crate::user::{NewUser, UserProfile, normalize_display_name};
use crate::{Error, Result};

/// Content type of an issued client certificate.
pub const USER_CERT_CONTENT_TYPE: &str = "application/x-x509-user-cert";

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let user_routes = post(register_handler)
        .get(profile_handler)
        .put(update_profile_handler)
        .delete(delete_user_handler);

    let mut router = Router::new()
        .route("/version", get(version_handler))
        .route("/user/", user_routes.clone())
        .route("/user", user_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(state.max_body_size));

    if state.environment.echoes_error_detail() {
        router = router.layer(middleware::from_fn(echo_error_detail));
    }

    router
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /version
async fn version_handler() -> impl IntoResponse {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// POST /user/ - register a public key by CSR, answer with a client certificate
async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse> {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| Error::BadRequest("missing Content-Length".to_string()))?;
    if content_length < state.min_csr_length {
        return Err(Error::BadRequest(format!(
            "Content-Length {content_length} is below {}",
            state.min_csr_length
        )));
    }
    let body = body.map_err(|e| Error::BadRequest(e.body_text()))?;

    let block = decode_pem_block(&body, None).map_err(upload_error)?;
    if !CSR_TAGS.contains(&block.tag.as_str()) {
        return Err(Error::MalformedInput(format!(
            "expected a certificate request, got {}",
            block.tag
        )));
    }
    let csr = verify_csr(parse_csr(&block.der).map_err(upload_error)?)?;

    let requested_key = csr.csr().public_key();
    if state
        .users
        .find_by_public_key(&requested_key.der)
        .await?
        .is_some()
    {
        audit::emit(&AuditEvent::rejected(
            "user_exist",
            Some(requested_key.fingerprint()),
        ));
        return Err(Error::DuplicateKey(requested_key.fingerprint()));
    }

    let issued = state.ca.issue_client_certificate(&csr)?;
    let certificate = parse_certificate(&issued.der)
        .map_err(|e| Error::SigningFailed(format!("issued certificate is unreadable: {e}")))?;

    let user = state
        .users
        .create(NewUser {
            public_key_der: certificate.public_key.der.clone(),
            public_key_algorithm: certificate.public_key.algorithm.family().to_string(),
            key_fingerprint: certificate.public_key.fingerprint(),
        })
        .await?;

    info!(
        user_id = %user.id,
        fingerprint = %user.key_fingerprint,
        serial = %issued.serial_hex,
        subject = %csr.csr().subject(),
        "User registered"
    );
    audit::emit(&AuditEvent::registered(&user, &issued.serial_hex));

    Ok((
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, USER_CERT_CONTENT_TYPE)],
        issued.to_pem(),
    ))
}

/// Codec failures on an uploaded body are the client's fault, never a 500.
fn upload_error(error: Error) -> Error {
    if error.status().is_server_error() {
        Error::MalformedInput(error.to_string())
    } else {
        error
    }
}

/// GET /user/
async fn profile_handler(Extension(auth): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(UserProfile::from(&auth.user))
}

#[derive(Debug, Deserialize)]
struct UpdateProfile {
    display_name: String,
}

/// PUT /user/
async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedUser>,
    payload: std::result::Result<Json<UpdateProfile>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(update) = payload.map_err(|e| Error::BadRequest(e.body_text()))?;
    let display_name = normalize_display_name(&update.display_name)?;

    let user = state
        .users
        .update_display_name(auth.user.id, display_name)
        .await?;
    debug!(user_id = %user.id, "Display name updated");
    Ok(Json(UserProfile::from(&user)))
}

/// DELETE /user/ - revoke the presented certificate and remove the account
async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse> {
    state.revocations.revoke(&auth.certificate_der).await?;
    audit::emit(&AuditEvent::revoked(
        &auth.user,
        Some(auth.serial_hex.clone()),
    ));

    state.users.delete(auth.user.id).await?;
    info!(user_id = %auth.user.id, serial = %auth.serial_hex, "User deleted");
    audit::emit(&AuditEvent::deleted(&auth.user));

    Ok(StatusCode::ACCEPTED)
}
