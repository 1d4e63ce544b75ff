use std::collections::HashMap;

use anyhow::Result;
use capsule_types::models::Capsule;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::models::{CapsuleRow, FileRow, UserRow};
use crate::{Database, to_millis};

impl Database {
    // -- Users --

    /// Inserts a user unless the id, username or email is already taken.
    /// Returns `false` on conflict.
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, username, email, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT DO NOTHING",
                rusqlite::params![id, username, email, password_hash, to_millis(created_at)],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Capsules --

    /// Inserts the capsule and its file descriptors in one transaction.
    pub fn insert_capsule(&self, capsule: &Capsule) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let id = capsule.id.to_string();

            tx.execute(
                "INSERT INTO capsules (id, owner_id, title, message, unlock_at, created_at, unlocked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    &id,
                    capsule.owner_id.to_string(),
                    &capsule.title,
                    &capsule.message,
                    to_millis(capsule.unlock_at),
                    to_millis(capsule.created_at),
                    capsule.unlocked,
                ],
            )?;

            for (position, file) in capsule.files.iter().enumerate() {
                tx.execute(
                    "INSERT INTO capsule_files
                        (capsule_id, position, filename, storage_path, mime_type, size, sha256)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        &id,
                        position as i64,
                        &file.filename,
                        &file.storage_path,
                        &file.mime_type,
                        file.size as i64,
                        &file.sha256,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_capsule(&self, id: Uuid) -> Result<Option<Capsule>> {
        self.with_conn(|conn| {
            let id = id.to_string();
            let row = conn
                .query_row(
                    &format!("{CAPSULE_SELECT} WHERE id = ?1"),
                    [&id],
                    capsule_from_row,
                )
                .optional()?;

            let Some(row) = row else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(&format!(
                "{FILE_SELECT} WHERE capsule_id = ?1 ORDER BY position"
            ))?;
            let files = stmt
                .query_map([&id], file_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            row.into_capsule(files).map(Some)
        })
    }

    /// All capsules owned by `owner_id`, soonest unlock first.
    pub fn list_capsules_by_owner(&self, owner_id: Uuid) -> Result<Vec<Capsule>> {
        self.with_conn(|conn| {
            let owner_id = owner_id.to_string();

            let mut stmt = conn.prepare(&format!(
                "{CAPSULE_SELECT} WHERE owner_id = ?1 ORDER BY unlock_at ASC, created_at ASC"
            ))?;
            let rows = stmt
                .query_map([&owner_id], capsule_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Batch-fetch files for every capsule of this owner (avoids N+1)
            let mut stmt = conn.prepare(&format!(
                "{FILE_SELECT}
                 WHERE capsule_id IN (SELECT id FROM capsules WHERE owner_id = ?1)
                 ORDER BY capsule_id, position"
            ))?;
            let mut files_by_capsule: HashMap<String, Vec<FileRow>> = HashMap::new();
            for file in stmt.query_map([&owner_id], file_from_row)? {
                let file = file?;
                files_by_capsule.entry(file.capsule_id.clone()).or_default().push(file);
            }

            rows.into_iter()
                .map(|row| {
                    let files = files_by_capsule.remove(&row.id).unwrap_or_default();
                    row.into_capsule(files)
                })
                .collect()
        })
    }

    /// Atomic compare-and-set of the unlock flag. Flips `unlocked` only if it
    /// is still unset and `unlock_at <= now`. Returns whether this call
    /// performed the transition.
    pub fn mark_unlocked(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE capsules SET unlocked = 1
                 WHERE id = ?1 AND unlocked = 0 AND unlock_at <= ?2",
                rusqlite::params![id.to_string(), to_millis(now)],
            )?;
            Ok(changed == 1)
        })
    }

    /// Removes the capsule record; file rows go with it via ON DELETE CASCADE.
    /// Returns `false` if there was nothing to delete.
    pub fn delete_capsule(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM capsules WHERE id = ?1", [id.to_string()])?;
            Ok(deleted == 1)
        })
    }
}

const CAPSULE_SELECT: &str =
    "SELECT id, owner_id, title, message, unlock_at, created_at, unlocked FROM capsules";

const FILE_SELECT: &str =
    "SELECT capsule_id, position, filename, storage_path, mime_type, size, sha256 FROM capsule_files";

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, email, password, created_at FROM users WHERE {column} = ?1"
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn capsule_from_row(row: &Row<'_>) -> rusqlite::Result<CapsuleRow> {
    Ok(CapsuleRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        unlock_at: row.get(4)?,
        created_at: row.get(5)?,
        unlocked: row.get(6)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        capsule_id: row.get(0)?,
        position: row.get(1)?,
        filename: row.get(2)?,
        storage_path: row.get(3)?,
        mime_type: row.get(4)?,
        size: row.get(5)?,
        sha256: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
