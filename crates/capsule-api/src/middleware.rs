use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use capsule_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Alternative header carrying the bare token.
pub const TOKEN_HEADER: &str = "x-auth-token";

/// Extract and validate the JWT, then expose its [`Claims`] to the handler
/// as a request extension. The secret comes from router state.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(req.headers())
        .ok_or_else(|| ApiError::Unauthorized("No token, authorization denied".into()))?;

    let claims = verify_token(&state.jwt_secret, token)
        .map_err(|_| ApiError::Unauthorized("Token is not valid".into()))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// `Authorization: Bearer <jwt>` wins over `x-auth-token: <jwt>`.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        return value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
    }

    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(token_data.claims)
}
