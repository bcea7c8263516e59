//! Upload and download-link routes

use crate::api::AppState;
use crate::auth::{AccessGrant, AccessUrl, Capability};
use crate::node::{File, Folder, Node};
use crate::storage::{self, Ingest};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};

use super::error::{extract_principal, AppError};
use super::gate::ClientAddr;
use super::types::{FileResponse, UploadQuery};

/// Multipart field carrying the uploaded content.
pub const UPLOAD_FIELD: &str = "file_uploaded";

// ============================================================================
// ROUTES
// ============================================================================

pub fn file_routes() -> Router<AppState> {
    Router::new()
        .route("/api/fupload", post(upload_file))
        .route("/api/access/*relpath", get(access_file))
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), AppError> {
    let principal = extract_principal(&state, &headers)?;
    let Some(user) = principal.user().cloned() else {
        return Err(AppError::Unauthorized("Authentication required".into()));
    };

    let raw_dir = query
        .dir
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| state.config.upload_dir.clone());
    let dir = state.storage.dir(&raw_dir)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("Uploaded file has no name".into()))?;
        let name = storage::validate_name(&filename)?.to_string();
        let Node::File(mut target) = dir.join(name.as_str())? else {
            return Err(AppError::BadRequest(format!("'{}' is not a file name", name)));
        };
        // Overwriting keeps the stored node, tier included
        let existing = state.storage.repo().get_file(target.relpath()?).await?;
        if let Some(record) = existing {
            target = File::from(record);
        }

        let allowed = state
            .authorizer
            .has_capability(&user, Capability::Upload, &target)
            .await?;
        if !allowed {
            tracing::info!(user = %user.username, path = %target, "upload refused");
            drop(field);
            drain(&mut multipart).await;
            return Err(AppError::Forbidden("Upload not permitted".into()));
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(&name).first().map(|m| m.to_string()));

        let outcome = state
            .ingester
            .ingest_stream(Some(field), content_type.as_deref(), &mut target)
            .await?;

        return match outcome {
            Ingest::Stored(file) => {
                drain(&mut multipart).await;
                let url = state.access.public_url(&file)?;
                Ok((StatusCode::CREATED, Json(FileResponse::new(&file, url))))
            }
            Ingest::Failed => {
                drain(&mut multipart).await;
                Err(AppError::Internal(format!("upload to {} failed", target)))
            }
            Ingest::NoUpload => Err(AppError::BadRequest("No file uploaded".into())),
        };
    }

    Err(AppError::BadRequest(format!(
        "Missing multipart field '{}'",
        UPLOAD_FIELD
    )))
}

/// Signed download link for a stored file.
async fn access_file(
    State(state): State<AppState>,
    Path(relpath): Path<String>,
    client: ClientAddr,
    headers: HeaderMap,
) -> Result<Json<AccessUrl>, AppError> {
    let principal = extract_principal(&state, &headers)?;
    let raw = format!("/{}", relpath.trim_start_matches('/'));
    let file = state
        .storage
        .files()
        .get(&raw)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", raw)))?;

    let origin = client.0.unwrap_or_default();
    match state
        .access
        .issue_access_token(&file, &principal, &origin, None)
        .await?
    {
        AccessGrant::Granted(url) => Ok(Json(url)),
        AccessGrant::Denied => Err(AppError::Forbidden("Access denied".into())),
    }
}

/// Consume whatever the client still sends so the connection stays usable.
async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(field)) = multipart.next_field().await {
        let _ = field.bytes().await;
    }
}
