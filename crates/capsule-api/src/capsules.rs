use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use chrono::{SubsecRound, Utc};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use capsule_types::api::{Claims, MessageBody};
use capsule_types::models::Capsule;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::gate;
use crate::upload::{self, discard_files};

/// POST /capsules: multipart `title`, `message`, `unlockDate`, up to five `files`.
pub async fn create_capsule(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = upload::read_capsule_form(&state.blobs, multipart).await?;

    let new = match form.validate() {
        Ok(new) => new,
        Err((errors, files)) => {
            discard_files(&state.blobs, &files).await;
            return Err(ApiError::Validation(errors));
        }
    };

    let capsule = Capsule {
        id: Uuid::new_v4(),
        owner_id: claims.sub,
        title: new.title,
        message: new.message,
        files: new.files,
        unlock_at: new.unlock_at,
        created_at: Utc::now().trunc_subsecs(3),
        unlocked: false,
    };

    let record = capsule.clone();
    if let Err(e) = state.with_db(move |db| Ok(db.insert_capsule(&record)?)).await {
        discard_files(&state.blobs, &capsule.files).await;
        return Err(e);
    }

    info!(
        "Capsule {} created by {} with {} file(s), unlocks at {}",
        capsule.id,
        capsule.owner_id,
        capsule.files.len(),
        capsule.unlock_at
    );

    Ok((StatusCode::CREATED, Json(capsule)))
}

/// GET /capsules: the requester's own capsules, soonest unlock first.
pub async fn list_capsules(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = claims.sub;
    let capsules = state
        .with_db(move |db| Ok(db.list_capsules_by_owner(owner_id)?))
        .await?;

    Ok(Json(capsules))
}

/// GET /capsules/{id}: the capsule, if the unlock gate allows it.
pub async fn get_capsule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let capsule_id = parse_capsule_id(&id)?;
    let requester = claims.sub;

    let capsule = state
        .with_db(move |db| Ok(gate::open(db, requester, capsule_id, Utc::now())?))
        .await?;

    Ok(Json(capsule))
}

/// GET /capsules/{id}/files/{index}: stream one attachment through the gate.
pub async fn download_file(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let capsule_id = parse_capsule_id(&id)?;
    let index: usize = index.parse().map_err(|_| ApiError::NotFound("File"))?;
    let requester = claims.sub;

    let capsule = state
        .with_db(move |db| Ok(gate::open(db, requester, capsule_id, Utc::now())?))
        .await?;

    let stored = capsule.files.get(index).ok_or(ApiError::NotFound("File"))?;
    let file = state.blobs.open(&stored.storage_path).await?.ok_or_else(|| {
        warn!("Blob {} of capsule {} is missing on disk", stored.storage_path, capsule.id);
        ApiError::NotFound("File")
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&stored.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stored.size));
    // Filenames are sanitized to [A-Za-z0-9._-] at upload
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("inline; filename=\"{}\"", stored.filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))))
}

/// DELETE /capsules/{id}: owner only, locked or not. Blobs are removed
/// best-effort before the record.
pub async fn delete_capsule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let capsule_id = parse_capsule_id(&id)?;

    let capsule = state
        .with_db(move |db| Ok(db.get_capsule(capsule_id)?))
        .await?
        .ok_or(ApiError::NotFound("Time Capsule"))?;

    if !capsule.is_owned_by(claims.sub) {
        warn!("User {} tried to delete capsule {} owned by {}", claims.sub, capsule.id, capsule.owner_id);
        return Err(ApiError::Unauthorized(
            "User not authorized to delete this capsule".into(),
        ));
    }

    for file in &capsule.files {
        if let Err(e) = state.blobs.delete(&file.storage_path).await {
            warn!("Failed to delete blob {} of capsule {}: {:#}", file.storage_path, capsule.id, e);
        }
    }

    let removed = state
        .with_db(move |db| Ok(db.delete_capsule(capsule_id)?))
        .await?;
    if removed {
        info!("Capsule {} deleted by {}", capsule.id, claims.sub);
    }

    Ok(Json(MessageBody {
        msg: "Time Capsule removed successfully".into(),
    }))
}

/// Malformed identifiers are reported as absent.
fn parse_capsule_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound("Time Capsule"))
}
