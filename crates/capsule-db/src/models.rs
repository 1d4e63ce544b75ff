//! Database row types. These map directly to SQLite rows and are converted
//! into capsule-types models at the edge of this crate.

use anyhow::{Context, Result};
use capsule_types::models::{Capsule, StoredFile};
use uuid::Uuid;

use crate::from_millis;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub created_at: i64,
}

impl UserRow {
    pub fn user_id(&self) -> Result<Uuid> {
        self.id
            .parse()
            .with_context(|| format!("Corrupt user id '{}'", self.id))
    }
}

pub struct CapsuleRow {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub message: Option<String>,
    pub unlock_at: i64,
    pub created_at: i64,
    pub unlocked: bool,
}

pub struct FileRow {
    pub capsule_id: String,
    pub position: i64,
    pub filename: String,
    pub storage_path: String,
    pub mime_type: String,
    pub size: i64,
    pub sha256: String,
}

impl CapsuleRow {
    /// `files` must already be ordered by position.
    pub fn into_capsule(self, files: Vec<FileRow>) -> Result<Capsule> {
        let id = self
            .id
            .parse()
            .with_context(|| format!("Corrupt capsule id '{}'", self.id))?;
        let owner_id = self
            .owner_id
            .parse()
            .with_context(|| format!("Corrupt owner_id '{}' on capsule '{}'", self.owner_id, self.id))?;

        Ok(Capsule {
            id,
            owner_id,
            title: self.title,
            message: self.message,
            files: files.into_iter().map(FileRow::into_stored_file).collect(),
            unlock_at: from_millis(self.unlock_at)?,
            created_at: from_millis(self.created_at)?,
            unlocked: self.unlocked,
        })
    }
}

impl FileRow {
    fn into_stored_file(self) -> StoredFile {
        StoredFile {
            filename: self.filename,
            storage_path: self.storage_path,
            mime_type: self.mime_type,
            size: self.size.max(0) as u64,
            sha256: self.sha256,
        }
    }
}
