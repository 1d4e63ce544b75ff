use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims issued at login/registration and checked on every protected
/// request. Identity only: no roles or scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
}

// -- Auth --

/// Missing fields deserialize as empty strings so they surface as field
/// errors instead of a body rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Profile of the logged-in user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

// -- Responses --

/// Plain `{ "msg": ... }` body used for confirmations and most errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub msg: String,
}

/// Body of a 400 carrying per-field validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

// -- Multipart form field names for capsule creation --

pub const FIELD_TITLE: &str = "title";
pub const FIELD_MESSAGE: &str = "message";
pub const FIELD_UNLOCK_DATE: &str = "unlockDate";
pub const FIELD_FILES: &str = "files";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_missing_fields_default_to_empty() {
        let req: RegisterRequest = serde_json::from_str(r#"{"email":"a@b.co"}"#).unwrap();
        assert_eq!(req.email, "a@b.co");
        assert!(req.username.is_empty());
        assert!(req.password.is_empty());
    }

    #[test]
    fn validation_errors_shape() {
        let body = ValidationErrors {
            errors: vec![FieldError {
                field: "email".into(),
                msg: "Please include a valid email".into(),
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["errors"][0]["field"], "email");
        assert_eq!(json["errors"][0]["msg"], "Please include a valid email");
    }
}
