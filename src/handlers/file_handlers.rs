//! HTTP handlers for file operations.
//! Every handler resolves the caller through [`Owner`] and delegates to
//! `FileLifecycle` or `FileQuery`; no handler touches storage directly.

use crate::{
    errors::AppError,
    handlers::identity::Owner,
    models::file::{File, FileState},
    services::{file_query::ListFilesParams, upload_gateway::RawUpload},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Query params accepted by `GET /files`.
#[derive(Debug, Deserialize)]
pub struct ListFilesQuery {
    pub search: Option<String>,
    pub favorites: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub recipient: String,
}

/// JSON view of a file. The storage key stays server-side.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub name: String,
    pub folder: String,
    pub description: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub favorite: bool,
    pub trashed: bool,
    pub state: FileState,
    pub shared_to: Vec<String>,
}

impl From<File> for FileResponse {
    fn from(file: File) -> Self {
        Self {
            state: file.state(),
            id: file.id,
            name: file.name,
            folder: file.folder,
            description: file.description,
            content_type: file.content_type,
            size_bytes: file.size_bytes,
            created_at: file.created_at,
            favorite: file.favorite,
            trashed: file.trashed,
            shared_to: file.shared_to.into_iter().collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub id: Uuid,
    pub state: FileState,
}

fn respond_many(files: Vec<File>) -> Json<Vec<FileResponse>> {
    Json(files.into_iter().map(FileResponse::from).collect())
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}

/// POST `/files`: multipart upload with a `file` part and optional
/// `folder` and `description` text parts.
pub async fn upload_file(
    State(state): State<AppState>,
    owner: Owner,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload: Option<RawUpload> = None;
    let mut folder = None;
    let mut description = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                // Read chunk by chunk so an oversized part is refused as soon
                // as it crosses the cap.
                let mut buffer = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if buffer.len() + chunk.len() > state.max_upload_bytes {
                        return Err(AppError::new(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            format!("file exceeds {} bytes", state.max_upload_bytes),
                        ));
                    }
                    buffer.extend_from_slice(&chunk);
                }
                let bytes = buffer.freeze();
                upload = Some(RawUpload {
                    filename,
                    folder: None,
                    description: None,
                    content_type,
                    bytes,
                });
            }
            Some("folder") => folder = Some(field.text().await.map_err(multipart_error)?),
            Some("description") => {
                description = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => {}
        }
    }

    let mut upload = upload.ok_or_else(|| AppError::bad_request("missing `file` part"))?;
    upload.folder = folder;
    upload.description = description;

    let file = state.lifecycle.upload(owner.as_str(), upload).await?;
    Ok((StatusCode::CREATED, Json(FileResponse::from(file))))
}

/// GET `/files`: active files, supports ?search=&favorites=true
pub async fn list_files(
    State(state): State<AppState>,
    owner: Owner,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    let params = ListFilesParams {
        search: q.search,
        favorites_only: q.favorites.unwrap_or(false),
    };
    let files = state.query.list_files(owner.as_str(), &params).await?;
    Ok(respond_many(files))
}

/// GET `/files/trash`
pub async fn list_trash(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    let files = state.query.list_trash(owner.as_str()).await?;
    Ok(respond_many(files))
}

/// GET `/files/shared`: files the caller has shared, with recipients.
pub async fn list_shared(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    let files = state.lifecycle.list_shared_by_me(owner.as_str()).await?;
    Ok(respond_many(files))
}

/// GET `/files/{id}`
pub async fn get_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<FileResponse>, AppError> {
    let file = state.lifecycle.get(owner.as_str(), id).await?;
    Ok(Json(file.into()))
}

/// GET `/files/{id}/download` as a streaming response.
pub async fn download_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (file, reader) = state.lifecycle.download(owner.as_str(), id).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    // Stored names are restricted to [A-Za-z0-9_.-], safe to quote as is.
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// POST `/files/{id}/trash`
pub async fn trash_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<FileResponse>, AppError> {
    let file = state.lifecycle.trash(owner.as_str(), id).await?;
    Ok(Json(file.into()))
}

/// POST `/files/{id}/restore`
pub async fn restore_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<FileResponse>, AppError> {
    let file = state.lifecycle.restore(owner.as_str(), id).await?;
    Ok(Json(file.into()))
}

/// POST `/files/{id}/favorite`: flips the flag.
pub async fn toggle_favorite(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<FileResponse>, AppError> {
    let file = state.lifecycle.toggle_favorite(owner.as_str(), id).await?;
    Ok(Json(file.into()))
}

/// POST `/files/{id}/share`
pub async fn share_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
    Json(payload): Json<ShareRequest>,
) -> Result<Json<FileResponse>, AppError> {
    let file = state
        .lifecycle
        .share(owner.as_str(), id, &payload.recipient)
        .await?;
    Ok(Json(file.into()))
}

/// DELETE `/files/{id}`: permanent delete, from either state.
pub async fn delete_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedResponse>, AppError> {
    state.lifecycle.permanent_delete(owner.as_str(), id).await?;
    Ok(Json(DeletedResponse {
        id,
        state: FileState::Deleted,
    }))
}
