//! Typed HTTP client for the time capsule service.
//!
//! Credentials are passed explicitly to every protected call. The client
//! itself holds no token, so one client can serve several users at once.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, multipart};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use capsule_types::api::{
    FIELD_FILES, FIELD_MESSAGE, FIELD_TITLE, FIELD_UNLOCK_DATE, LoginRequest, MessageBody,
    RegisterRequest, TokenResponse, UserProfile, ValidationErrors,
};
use capsule_types::models::Capsule;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Proof of identity for one user, attached per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewCapsule {
    pub title: String,
    pub message: Option<String>,
    pub unlock_at: DateTime<Utc>,
    pub files: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct CapsuleClient {
    http: Client,
    base_url: String,
}

impl CapsuleClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(Client::new(), base_url)
    }

    pub fn with_http(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    // -- Auth --

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Credentials> {
        let req = RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        };
        let resp: TokenResponse = self
            .send(self.http.post(self.url("/auth/register")).json(&req))
            .await?;
        Ok(Credentials::new(resp.token))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Credentials> {
        let req = LoginRequest {
            email: email.into(),
            password: password.into(),
        };
        let resp: TokenResponse = self
            .send(self.http.post(self.url("/auth/login")).json(&req))
            .await?;
        Ok(Credentials::new(resp.token))
    }

    pub async fn current_user(&self, creds: &Credentials) -> Result<UserProfile> {
        self.send(self.authed(self.http.get(self.url("/auth/user")), creds))
            .await
    }

    // -- Capsules --

    pub async fn create_capsule(&self, creds: &Credentials, capsule: NewCapsule) -> Result<Capsule> {
        let mut form = multipart::Form::new()
            .text(FIELD_TITLE, capsule.title)
            .text(
                FIELD_UNLOCK_DATE,
                capsule.unlock_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        if let Some(message) = capsule.message {
            form = form.text(FIELD_MESSAGE, message);
        }
        for file in capsule.files {
            let part = multipart::Part::bytes(file.data)
                .file_name(file.filename)
                .mime_str(&file.mime_type)?;
            form = form.part(FIELD_FILES, part);
        }

        self.send(self.authed(self.http.post(self.url("/capsules")), creds).multipart(form))
            .await
    }

    pub async fn list_capsules(&self, creds: &Credentials) -> Result<Vec<Capsule>> {
        self.send(self.authed(self.http.get(self.url("/capsules")), creds))
            .await
    }

    pub async fn get_capsule(&self, creds: &Credentials, id: Uuid) -> Result<Capsule> {
        self.send(self.authed(self.http.get(self.url(&format!("/capsules/{id}"))), creds))
            .await
    }

    /// Returns the server's confirmation message.
    pub async fn delete_capsule(&self, creds: &Credentials, id: Uuid) -> Result<String> {
        let body: MessageBody = self
            .send(self.authed(self.http.delete(self.url(&format!("/capsules/{id}"))), creds))
            .await?;
        Ok(body.msg)
    }

    pub async fn download_file(&self, creds: &Credentials, id: Uuid, index: usize) -> Result<Bytes> {
        let url = self.url(&format!("/capsules/{id}/files/{index}"));
        let resp = check(self.authed(self.http.get(url), creds).send().await?).await?;
        Ok(resp.bytes().await?)
    }

    // -- Helpers --

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder, creds: &Credentials) -> RequestBuilder {
        req.bearer_auth(&creds.token)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = check(req.send().await?).await?;
        Ok(resp.json().await?)
    }
}

/// Turn a non-success response into [`ClientError::Api`] with the server's
/// message.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    debug!("Request failed ({}): {}", status, body);
    Err(ClientError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    if let Ok(msg) = serde_json::from_str::<MessageBody>(body) {
        return msg.msg;
    }
    if let Ok(validation) = serde_json::from_str::<ValidationErrors>(body) {
        return validation
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.msg))
            .collect::<Vec<_>>()
            .join("; ");
    }
    body.to_string()
}
