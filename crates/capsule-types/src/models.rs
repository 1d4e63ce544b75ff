use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for one attachment. The bytes live in the blob store under
/// `storage_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Name the client uploaded the file under (basename only).
    pub filename: String,
    /// Blob key relative to the upload directory.
    pub storage_path: String,
    pub mime_type: String,
    pub size: u64,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
}

/// A message plus attachments that only the owner may read before
/// `unlock_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capsule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub message: Option<String>,
    pub files: Vec<StoredFile>,
    pub unlock_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set lazily by the first read at or after `unlock_at`.
    pub unlocked: bool,
}

impl Capsule {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn unlock_time_reached(&self, now: DateTime<Utc>) -> bool {
        now >= self.unlock_at
    }
}
