use std::sync::{Arc, LazyLock};

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use capsule_db::{Database, from_millis};
use capsule_types::api::{Claims, FieldError, LoginRequest, RegisterRequest, TokenResponse, UserProfile};

use crate::error::ApiError;
use crate::storage::BlobStore;

/// Tokens are valid for one hour from issue.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

const MIN_PASSWORD_LEN: usize = 6;
const MAX_USERNAME_LEN: usize = 32;

const USER_EXISTS: &str = "User already exists";
const INVALID_CREDENTIALS: &str = "Invalid Credentials";

/// Verified against when the email is unknown, so both login failures cost
/// one argon2 run.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("capsule-dummy-password").ok());

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub blobs: BlobStore,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Run blocking database work off the async runtime.
    pub async fn with_db<F, T>(self: &Arc<Self>, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || f(&state.db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow::anyhow!("blocking task failed: {e}"))
            })?
    }
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let username = req.username.trim().to_string();
    let email = normalize_email(&req.email);

    let mut errors = Vec::new();
    if username.is_empty() {
        errors.push(field_error("username", "Username is required"));
    } else if username.chars().count() > MAX_USERNAME_LEN {
        errors.push(field_error(
            "username",
            format!("Username must be at most {MAX_USERNAME_LEN} characters"),
        ));
    }
    if !is_valid_email(&email) {
        errors.push(field_error("email", "Please include a valid email"));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(field_error(
            "password",
            format!("Please enter a password with {MIN_PASSWORD_LEN} or more characters"),
        ));
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let user_id = Uuid::new_v4();
    let now = Utc::now();
    let password = req.password;

    state
        .with_db(move |db| {
            if db.get_user_by_email(&email)?.is_some() {
                return Err(ApiError::BadRequest(USER_EXISTS.into()));
            }
            if db.get_user_by_username(&username)?.is_some() {
                return Err(ApiError::field("username", "Username is already taken"));
            }

            // Hash password with Argon2id
            let password_hash = hash_password(&password)?;

            // A concurrent registration may have claimed the email since the check
            if !db.create_user(&user_id.to_string(), &username, &email, &password_hash, now)? {
                return Err(ApiError::BadRequest(USER_EXISTS.into()));
            }
            Ok(())
        })
        .await?;

    info!("Registered user {}", user_id);

    let token = create_token(&state.jwt_secret, user_id, now)?;
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let email = normalize_email(&req.email);

    let mut errors = Vec::new();
    if !is_valid_email(&email) {
        errors.push(field_error("email", "Please include a valid email"));
    }
    if req.password.is_empty() {
        errors.push(field_error("password", "Password is required"));
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password = req.password;
    let user_id = state
        .with_db(move |db| {
            let Some(user) = db.get_user_by_email(&email)? else {
                if let Some(dummy) = DUMMY_HASH.as_deref() {
                    let _ = verify_password(&password, dummy);
                }
                return Err(ApiError::BadRequest(INVALID_CREDENTIALS.into()));
            };

            if !verify_password(&password, &user.password)? {
                return Err(ApiError::BadRequest(INVALID_CREDENTIALS.into()));
            }
            Ok(user.user_id()?)
        })
        .await?;

    let token = create_token(&state.jwt_secret, user_id, Utc::now())?;
    Ok(Json(TokenResponse { token }))
}

/// GET /auth/user: profile of the token holder, without the password hash.
pub async fn current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let user = state
        .with_db(move |db| Ok(db.get_user_by_id(&user_id.to_string())?))
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    Ok(Json(UserProfile {
        id: user.user_id()?,
        username: user.username,
        email: user.email,
        created_at: from_millis(user.created_at)?,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::seconds(TOKEN_TTL_SECS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

/// Constant-time check of `password` against a stored PHC hash string.
fn verify_password(password: &str, stored_hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Stored password hash is unreadable: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accepts `local@domain.tld` with no whitespace.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

fn field_error(field: &str, msg: impl Into<String>) -> FieldError {
    FieldError {
        field: field.to_string(),
        msg: msg.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::verify_token;

    #[test]
    fn email_validation() {
        for ok in ["a@b.co", "first.last@example.org", "x+tag@sub.domain.io"] {
            assert!(is_valid_email(ok), "{ok} should be valid");
        }
        for bad in ["", "plain", "@example.com", "a@b", "a@.com", "a@b.", "a b@c.de", "a@b@c.de"] {
            assert!(!is_valid_email(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hash = hash_password("correct horse").unwrap();
        assert!(!hash.contains("correct horse"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn unknown_email_path_verifies_against_a_real_hash() {
        let dummy = DUMMY_HASH.as_deref().unwrap();
        assert!(PasswordHash::new(dummy).is_ok());
        assert!(!verify_password("hunter22", dummy).unwrap());
    }

    #[test]
    fn unreadable_hash_is_an_error() {
        assert!(verify_password("pw", "not-a-phc-string").is_err());
    }

    #[test]
    fn token_expires_one_hour_after_issue() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let token = create_token("secret", user_id, now).unwrap();

        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS as usize);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = create_token("secret", Uuid::new_v4(), Utc::now()).unwrap();
        assert!(verify_token("other-secret", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = Utc::now() - chrono::Duration::seconds(TOKEN_TTL_SECS + 5);
        let token = create_token("secret", Uuid::new_v4(), issued).unwrap();
        assert!(verify_token("secret", &token).is_err());
    }
}
