//! Multipart intake for capsule creation.
//!
//! File parts are streamed straight to the blob store while their SHA-256 and
//! size are accumulated. Anything written is removed again if the form turns
//! out to be invalid.

use axum::extract::multipart::{Field, Multipart, MultipartError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use capsule_types::api::{FIELD_FILES, FIELD_MESSAGE, FIELD_TITLE, FIELD_UNLOCK_DATE, FieldError};
use capsule_types::models::StoredFile;

use crate::error::ApiError;
use crate::storage::{BlobStore, blob_key, sanitize_filename};

/// At most this many attachments per capsule.
pub const MAX_FILES: usize = 5;

/// 50 MB per attachment.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Whole request body: every attachment at full size plus room for text fields.
pub const MAX_BODY_SIZE: usize = MAX_FILES * MAX_FILE_SIZE as usize + 1024 * 1024;

const DEFAULT_MIME: &str = "application/octet-stream";

/// Raw form contents, before validation of the text fields.
#[derive(Debug, Default)]
pub struct CapsuleForm {
    pub title: Option<String>,
    pub message: Option<String>,
    pub unlock_date: Option<String>,
    pub files: Vec<StoredFile>,
}

/// Validated form.
#[derive(Debug)]
pub struct NewCapsule {
    pub title: String,
    pub message: Option<String>,
    pub unlock_at: DateTime<Utc>,
    pub files: Vec<StoredFile>,
}

impl CapsuleForm {
    /// Check the text fields. All problems are reported together.
    pub fn validate(self) -> Result<NewCapsule, (Vec<FieldError>, Vec<StoredFile>)> {
        let mut errors = Vec::new();

        let title = self.title.as_deref().map(str::trim).unwrap_or_default().to_string();
        if title.is_empty() {
            errors.push(FieldError {
                field: FIELD_TITLE.into(),
                msg: "Title is required".into(),
            });
        }

        let unlock_at = match self.unlock_date.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push(FieldError {
                    field: FIELD_UNLOCK_DATE.into(),
                    msg: "Unlock date is required".into(),
                });
                None
            }
            Some(raw) => {
                let parsed = parse_unlock_date(raw);
                if parsed.is_none() {
                    errors.push(FieldError {
                        field: FIELD_UNLOCK_DATE.into(),
                        msg: "Unlock date must be a valid date".into(),
                    });
                }
                parsed
            }
        };

        match unlock_at {
            Some(unlock_at) if errors.is_empty() => Ok(NewCapsule {
                title,
                message: self
                    .message
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty()),
                unlock_at,
                files: self.files,
            }),
            _ => Err((errors, self.files)),
        }
    }

    async fn discard(&self, blobs: &BlobStore) {
        discard_files(blobs, &self.files).await;
    }
}

/// Remove blobs written for a capsule that will not be stored.
pub async fn discard_files(blobs: &BlobStore, files: &[StoredFile]) {
    for file in files {
        if let Err(e) = blobs.delete(&file.storage_path).await {
            warn!("Failed to discard blob {}: {:#}", file.storage_path, e);
        }
    }
}

/// Drain the multipart body into a [`CapsuleForm`], storing file parts.
pub async fn read_capsule_form(
    blobs: &BlobStore,
    mut multipart: Multipart,
) -> Result<CapsuleForm, ApiError> {
    let mut form = CapsuleForm::default();

    if let Err(e) = collect_fields(blobs, &mut multipart, &mut form).await {
        form.discard(blobs).await;
        return Err(e);
    }

    Ok(form)
}

async fn collect_fields(
    blobs: &BlobStore,
    multipart: &mut Multipart,
    form: &mut CapsuleForm,
) -> Result<(), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            FIELD_TITLE => form.title = Some(field.text().await.map_err(bad_multipart)?),
            FIELD_MESSAGE => form.message = Some(field.text().await.map_err(bad_multipart)?),
            FIELD_UNLOCK_DATE => form.unlock_date = Some(field.text().await.map_err(bad_multipart)?),
            FIELD_FILES => {
                // Browsers send an empty, unnamed part when no file was picked
                if field.file_name().is_none_or(str::is_empty) {
                    debug!("Skipping file part without a filename");
                    continue;
                }
                if form.files.len() >= MAX_FILES {
                    return Err(ApiError::field(
                        FIELD_FILES,
                        format!("At most {MAX_FILES} files may be attached"),
                    ));
                }
                let stored = store_file(blobs, field).await?;
                form.files.push(stored);
            }
            other => debug!("Ignoring unknown multipart field '{}'", other),
        }
    }

    Ok(())
}

async fn store_file(blobs: &BlobStore, mut field: Field<'_>) -> Result<StoredFile, ApiError> {
    let filename = sanitize_filename(field.file_name().unwrap_or_default());
    let mime_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_MIME.to_string());
    let key = blob_key(&filename);

    let mut file = blobs.create(&key).await?;
    let mut hasher = Sha256::new();

    match write_field(&mut field, &mut file, &mut hasher).await {
        Ok(size) => {
            debug!("Stored {} ({} bytes) as blob {}", filename, size, key);
            Ok(StoredFile {
                filename,
                storage_path: key,
                mime_type,
                size,
                sha256: hex::encode(hasher.finalize()),
            })
        }
        Err(e) => {
            drop(file);
            if let Err(del) = blobs.delete(&key).await {
                warn!("Failed to remove partial blob {}: {:#}", key, del);
            }
            Err(e)
        }
    }
}

/// Copy one part to disk chunk by chunk, enforcing [`MAX_FILE_SIZE`].
async fn write_field(
    field: &mut Field<'_>,
    file: &mut File,
    hasher: &mut Sha256,
) -> Result<u64, ApiError> {
    let mut size: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        size += chunk.len() as u64;
        if size > MAX_FILE_SIZE {
            return Err(ApiError::field(
                FIELD_FILES,
                format!("Each file must be at most {} MB", MAX_FILE_SIZE / (1024 * 1024)),
            ));
        }
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write blob: {e}"))?;
    }

    file.flush()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to flush blob: {e}"))?;

    Ok(size)
}

fn bad_multipart(e: MultipartError) -> ApiError {
    ApiError::BadRequest(e.body_text())
}

/// Accepts RFC 3339 (`2030-01-01T00:00:00Z`), or a naive
/// `YYYY-MM-DDTHH:MM[:SS]` / `YYYY-MM-DD` taken as UTC. Truncated to
/// milliseconds, the precision the store keeps.
pub fn parse_unlock_date(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|ndt| ndt.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ndt| ndt.and_utc())
        })?;

    Some(parsed.trunc_subsecs(3))
}
