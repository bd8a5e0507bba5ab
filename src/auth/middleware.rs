use axum::{
    extract::{FromRef, OriginalUri, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::{
    auth::{extractors::AuthUser, jwt::JwtKeys},
    error::AppError,
    state::AppState,
};

lazy_static! {
    /// `ping`, `login` and `register`, with or without the `/v1` prefix and
    /// one trailing slash.
    static ref PUBLIC_PATH: Regex =
        Regex::new(r"^/(?:v1/)?(?:ping|login|register)/?$").expect("public path regex compiles");
}

/// Token gate for the versioned API.
///
/// Public routes pass straight through. Everything else needs a token that is
/// present in the token store and whose claims still decode; the decoded user
/// is attached to the request as [`AuthUser`].
pub async fn require_token(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers());
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path())
        .unwrap_or_else(|| req.uri().path())
        .to_owned();

    if is_public_path(&path) {
        return Ok(next.run(req).await);
    }

    match state.users.validate_token(&token).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(%path, "token not found");
            return Err(AppError::Unauthorized);
        }
        Err(e) => {
            warn!(error = %e, %path, "token lookup failed");
            return Err(AppError::Unauthorized);
        }
    }

    let claims = JwtKeys::from_ref(&state).verify(&token).map_err(|e| {
        warn!(error = %e, %path, "token claims rejected");
        AppError::Unauthorized
    })?;

    debug!(user_id = claims.user.id, %path, "request authenticated");
    req.extensions_mut().insert(AuthUser {
        id: claims.user.id,
        email: claims.user.email,
    });
    Ok(next.run(req).await)
}

/// Second word of `Authorization: <scheme> <token>`, or empty when the header
/// is missing or has no space.
pub fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .map(|(_, token)| token.trim().to_string())
        .unwrap_or_default()
}

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATH.is_match(path)
}
