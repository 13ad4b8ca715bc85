use std::path::Path;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use murmur_types::api::UploadResponse;

use crate::auth::AppState;

/// Header carrying the client's original file name.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// URL prefix uploaded files are served under.
pub const UPLOADS_ROUTE: &str = "/uploads";

/// Multipart form field holding the file.
pub const FILE_FIELD: &str = "file";

/// A file as received, before it is written to disk.
struct IncomingFile {
    name: Option<String>,
    mime_type: Option<String>,
    bytes: Bytes,
}

/// POST /api/upload: takes either `multipart/form-data` with a `file` field,
/// or the raw bytes with `Content-Type` set to the file's MIME type and
/// `X-File-Name` to its name. Saves the bytes under the upload dir and
/// returns the URL to share over the gateway with `file:send`.
pub async fn upload_file(
    State(state): State<AppState>,
    request: Request,
) -> Result<impl IntoResponse, StatusCode> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let incoming = if is_multipart {
        read_multipart(request).await?
    } else {
        read_raw(request).await?
    };

    if incoming.bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if incoming.bytes.len() > state.max_upload_bytes {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let file_type = incoming
        .mime_type
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let file_name = incoming
        .name
        .as_deref()
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string();

    let stored_name = stored_name_for(&file_name);

    // Ensure uploads directory exists
    tokio::fs::create_dir_all(&state.upload_dir)
        .await
        .map_err(|e| {
            error!("Failed to create uploads directory {}: {}", state.upload_dir.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let file_path = state.upload_dir.join(&stored_name);
    let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
        error!("Failed to create file {}: {}", file_path.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    file.write_all(&incoming.bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", file_path.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!("stored upload {} ({} bytes, {})", stored_name, incoming.bytes.len(), file_type);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_url: format!("{}/{}", UPLOADS_ROUTE, stored_name),
            file_name,
            file_type,
        }),
    ))
}

async fn read_raw(request: Request) -> Result<IncomingFile, StatusCode> {
    let headers: HeaderMap = request.headers().clone();
    let bytes = Bytes::from_request(request, &()).await.map_err(|e| {
        warn!("Failed to read upload body: {}", e);
        e.status()
    })?;

    let header_str = |name| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Ok(IncomingFile {
        name: header_str(FILE_NAME_HEADER),
        mime_type: header_str(header::CONTENT_TYPE.as_str()),
        bytes,
    })
}

/// Reads the first `file` field; other fields are skipped.
async fn read_multipart(request: Request) -> Result<IncomingFile, StatusCode> {
    let mut multipart = Multipart::from_request(request, &()).await.map_err(|e| {
        warn!("Rejected multipart upload: {}", e);
        e.status()
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Failed to read multipart field: {}", e);
        e.status()
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let name = field.file_name().map(str::to_string);
        let mime_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            warn!("Failed to read multipart file data: {}", e);
            e.status()
        })?;
        return Ok(IncomingFile { name, mime_type, bytes });
    }

    Err(StatusCode::BAD_REQUEST)
}

/// Random on-disk name that keeps a sane extension from the original.
fn stored_name_for(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 10 && e.chars().all(|c| c.is_ascii_alphanumeric()));

    match ext {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_ascii_lowercase()),
        None => Uuid::new_v4().to_string(),
    }
}
