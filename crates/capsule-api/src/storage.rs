use anyhow::{Result, bail};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// On-disk blob store for capsule attachments.
///
/// Each attachment is a flat file at `{dir}/{key}`. Keys are generated by
/// [`blob_key`] and never contain path separators.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Path of the blob for `key`. Rejects keys that could escape the directory.
    pub fn path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_key(key) {
            bail!("Invalid blob key '{}'", key);
        }
        Ok(self.dir.join(key))
    }

    pub async fn create(&self, key: &str) -> Result<fs::File> {
        let path = self.path(key)?;
        Ok(fs::File::create(&path).await?)
    }

    /// Opens a blob for reading. `None` if it is not on disk.
    pub async fn open(&self, key: &str) -> Result<Option<fs::File>> {
        let path = self.path(key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob. A blob that is already gone is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Fresh blob key: a random UUID plus the (sanitized) extension of the
/// uploaded filename, e.g. `1b4e...c2.jpg`.
pub fn blob_key(filename: &str) -> String {
    let id = Uuid::new_v4();
    match extension(filename) {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

/// Basename of a client-supplied filename with anything outside
/// `[A-Za-z0-9._-]` replaced by `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext: String = ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    (!ext.is_empty()).then_some(ext)
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}
