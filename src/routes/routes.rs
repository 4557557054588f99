//! Defines routes for all file operations.
//!
//! ## Structure
//! - **Collection endpoints**
//!   - `POST   /files`          multipart upload
//!   - `GET    /files`          active files (supports search, favorites)
//!   - `GET    /files/trash`    trashed files
//!   - `GET    /files/shared`   files the caller has shared
//!
//! - **File endpoints**
//!   - `GET    /files/{id}`           metadata
//!   - `GET    /files/{id}/download`  content
//!   - `POST   /files/{id}/trash`     soft delete
//!   - `POST   /files/{id}/restore`   undo soft delete
//!   - `POST   /files/{id}/favorite`  toggle favorite
//!   - `POST   /files/{id}/share`     grant a recipient
//!   - `DELETE /files/{id}`           permanent delete
//!
//! Every `/files` route requires the `x-user-id` identity header.

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_file, get_file, list_files, list_shared, list_trash,
            restore_file, share_file, toggle_favorite, trash_file, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Room for multipart boundaries and the text parts around the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build and return the router for every endpoint.
///
/// The request body limit is derived from `max_upload_bytes` so oversized
/// uploads are refused before they are buffered.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Collection routes
        .route("/files", get(list_files).post(upload_file))
        .route("/files/trash", get(list_trash))
        .route("/files/shared", get(list_shared))
        // File routes
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/download", get(download_file))
        .route("/files/{id}/trash", post(trash_file))
        .route("/files/{id}/restore", post(restore_file))
        .route("/files/{id}/favorite", post(toggle_favorite))
        .route("/files/{id}/share", post(share_file))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::file_handlers::FileResponse,
        services::{
            content_store::DiskContentStore, file_lifecycle::FileLifecycle,
            metadata_repository::tests::setup_repo,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use std::{sync::Arc, time::Duration};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-FILEBOX-BOUNDARY";

    async fn app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let lifecycle = FileLifecycle::new(
            setup_repo().await,
            Arc::new(DiskContentStore::new(dir.path())),
            Duration::from_secs(5),
        );
        let router = routes(1024).with_state(AppState::new(lifecycle, 1024));
        (dir, router)
    }

    fn multipart_body(filename: &str, content: &str) -> String {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"folder\"\r\n\r\nwork\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = filename,
            c = content
        )
    }

    fn upload_request(user: &str, filename: &str, content: &str) -> Request<Body> {
        Request::post("/files")
            .header("x-user-id", user)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(filename, content)))
            .unwrap()
    }

    fn request(method: &str, uri: &str, user: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn upload(app: &Router, user: &str, filename: &str, content: &str) -> FileResponse {
        let response = app
            .clone()
            .oneshot(upload_request(user, filename, content))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn list(app: &Router, uri: &str, user: &str) -> Vec<FileResponse> {
        let response = app.clone().oneshot(request("GET", uri, user)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let (_dir, app) = app().await;
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_checks_database_and_storage() {
        let (_dir, app) = app().await;
        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let (_dir, app) = app().await;
        let response = app
            .oneshot(Request::get("/files").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_upload_trash_restore_download_flow() {
        let (_dir, app) = app().await;
        let file = upload(&app, "u1", "notes.txt", "hello").await;
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.folder, "work");

        let trashed = app
            .clone()
            .oneshot(request("POST", &format!("/files/{}/trash", file.id), "u1"))
            .await
            .unwrap();
        assert_eq!(trashed.status(), StatusCode::OK);
        assert!(list(&app, "/files", "u1").await.is_empty());
        assert_eq!(list(&app, "/files/trash", "u1").await.len(), 1);

        app.clone()
            .oneshot(request("POST", &format!("/files/{}/restore", file.id), "u1"))
            .await
            .unwrap();
        assert_eq!(list(&app, "/files", "u1").await.len(), 1);

        let download = app
            .clone()
            .oneshot(request("GET", &format!("/files/{}/download", file.id), "u1"))
            .await
            .unwrap();
        assert_eq!(download.status(), StatusCode::OK);
        assert_eq!(
            download.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"notes.txt\""
        );
        assert_eq!(body_bytes(download).await, b"hello");
    }

    #[tokio::test]
    async fn test_rejected_type_is_bad_request() {
        let (_dir, app) = app().await;
        let response = app
            .clone()
            .oneshot(upload_request("u1", "malware.exe", "MZ"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(list(&app, "/files", "u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_refused() {
        let (_dir, app) = app().await;
        let response = app
            .clone()
            .oneshot(upload_request("u1", "big.txt", &"x".repeat(2048)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_share_and_shared_listing() {
        let (_dir, app) = app().await;
        let file = upload(&app, "u1", "a.txt", "a").await;

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::post(format!("/files/{}/share", file.id))
                        .header("x-user-id", "u1")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(r#"{"recipient":"bob@x.com"}"#))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let shared = list(&app, "/files/shared", "u1").await;
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].shared_to, vec!["bob@x.com".to_string()]);
    }

    #[tokio::test]
    async fn test_foreign_file_is_not_found_and_delete_is_terminal() {
        let (_dir, app) = app().await;
        let file = upload(&app, "u1", "a.txt", "a").await;
        let uri = format!("/files/{}", file.id);

        let foreign = app.clone().oneshot(request("DELETE", &uri, "u2")).await.unwrap();
        assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

        let first = app.clone().oneshot(request("DELETE", &uri, "u1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(request("DELETE", &uri, "u1")).await.unwrap();
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_favorites_filter_via_query() {
        let (_dir, app) = app().await;
        let a = upload(&app, "u1", "a.txt", "a").await;
        upload(&app, "u1", "b.txt", "b").await;

        app.clone()
            .oneshot(request("POST", &format!("/files/{}/favorite", a.id), "u1"))
            .await
            .unwrap();

        let favorites = list(&app, "/files?favorites=true", "u1").await;
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, a.id);
        assert!(favorites[0].favorite);

        let searched = list(&app, "/files?search=B", "u1").await;
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].name, "b.txt");
    }
}
