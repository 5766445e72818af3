//! Signature verification for the session authority

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Session-Signature";

/// Largest request body accepted for signing
const MAX_SIGNED_BODY: usize = 64 * 1024;

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign(body: &[u8], secret: &str) -> Result<String, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSignature)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex HMAC-SHA256 signature over the raw body
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Result<(), AuthError> {
    let provided = hex::decode(signature.trim()).map_err(|_| AuthError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| AuthError::InvalidSignature)
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Request body could not be read")]
    InvalidBody,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::MissingSignature => StatusCode::UNAUTHORIZED,
            AuthError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AuthError::InvalidBody => StatusCode::BAD_REQUEST,
        };

        (status, self.to_string()).into_response()
    }
}

/// Middleware rejecting requests whose body is not signed with the
/// session secret
pub async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (parts, body) = request.into_parts();

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingSignature)?
        .to_string();

    let bytes = to_bytes(body, MAX_SIGNED_BODY)
        .await
        .map_err(|_| AuthError::InvalidBody)?;

    if let Err(e) = verify_signature(&bytes, &signature, &state.config.session_secret) {
        warn!(path = %parts.uri.path(), "Rejected unsigned request");
        return Err(e);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
