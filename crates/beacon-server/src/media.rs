//! `/api/media`: uploaded and synced media files.

use crate::error::{ApiError, ApiResult};
use crate::handlers::AppState;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use beacon_store::{ensure_media_for_url, MediaItem, MediaType, RecordStore};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const INVALID_TYPE: &str = "Invalid media type. Use image, audio, or video.";

/// Routes mounted under `/api/media`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/data", get(list_all))
        .route("/data/:type", get(list_by_type))
        .route("/upload/:type", post(upload))
        .route("/sync", post(sync))
        .route("/:id", delete(remove))
}

/// Parse a path segment into a type that can be uploaded.
pub(crate) fn uploadable_type(raw: &str) -> ApiResult<MediaType> {
    raw.parse::<MediaType>()
        .ok()
        .filter(|media_type| MediaType::UPLOADABLE.contains(media_type))
        .ok_or_else(|| ApiError::bad_request(INVALID_TYPE))
}

/// File extension for a MIME type, dot included.
fn extension_for_mime(mime: &str) -> Option<&'static str> {
    Some(match mime {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "image/svg+xml" => ".svg",
        "audio/mpeg" => ".mp3",
        "audio/wav" => ".wav",
        "audio/ogg" => ".ogg",
        "audio/webm" => ".weba",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/ogg" => ".ogv",
        _ => return None,
    })
}

/// Extensions accepted when syncing files found on disk.
fn allowed_extensions(media_type: MediaType) -> &'static [&'static str] {
    match media_type {
        MediaType::Image => &[".jpg", ".jpeg", ".png", ".webp", ".gif", ".svg"],
        MediaType::Audio => &[".mp3", ".wav", ".ogg", ".weba"],
        MediaType::Video => &[".mp4", ".webm", ".ogv"],
        MediaType::Subtitle => &[],
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
}

fn upload_url(media_type: MediaType, file_name: &str) -> String {
    format!("/uploads/{}/{}", media_type.dir_name(), file_name)
}

/// Map an `/uploads/...` URL back onto the uploads directory.
///
/// Returns `None` for URLs outside `/uploads/` or with `..` segments.
fn upload_path(uploads_dir: &std::path::Path, url: &str) -> Option<PathBuf> {
    let relative = std::path::Path::new(url.strip_prefix("/uploads/")?);
    if !relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return None;
    }
    Some(uploads_dir.join(relative))
}

async fn list_all(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.media.get_all().await?))
}

async fn list_by_type(
    State(state): State<Arc<AppState>>,
    Path(raw_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let media_type = uploadable_type(&raw_type)?;
    let items: Vec<MediaItem> = state
        .media
        .get_all()
        .await?
        .into_values()
        .filter(|item| item.media_type == media_type)
        .collect();
    Ok(Json(items))
}

struct UploadedFile {
    file_name: Option<String>,
    mime: String,
    bytes: Vec<u8>,
}

async fn upload(
    State(state): State<Arc<AppState>>,
    Path(raw_type): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let media_type = uploadable_type(&raw_type)?;
    let mut multipart = multipart
        .map_err(|_| ApiError::bad_request("Invalid form data. Expected multipart/form-data."))?;

    let mut file = None;
    let mut name = None;
    let mut metadata_raw = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid form data: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_owned();
        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_owned);
                let mime = field.content_type().unwrap_or_default().to_owned();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;
                file = Some(UploadedFile {
                    file_name,
                    mime,
                    bytes: bytes.to_vec(),
                });
            }
            "name" | "metadata" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid form data: {e}")))?;
                if field_name == "name" {
                    name = Some(text);
                } else {
                    metadata_raw = Some(text);
                }
            }
            other => debug!(field = %other, "Ignoring form field"),
        }
    }

    let file = file.ok_or_else(|| ApiError::bad_request("Missing file field 'file'."))?;
    if !file.mime.starts_with(&format!("{media_type}/")) {
        return Err(ApiError::bad_request(format!(
            "Uploaded file MIME '{}' does not match type '{}'.",
            file.mime, media_type
        )));
    }

    let metadata = match metadata_raw {
        Some(raw) => serde_json::from_str::<Map<String, Value>>(&raw)
            .map_err(|_| ApiError::bad_request("Invalid metadata JSON."))?,
        None => Map::new(),
    };

    let id = Uuid::new_v4().to_string();
    let ext = extension_for_mime(&file.mime)
        .map(str::to_owned)
        .or_else(|| file.file_name.as_deref().and_then(extension_of))
        .unwrap_or_default();
    let stored_name = format!("{id}{ext}");

    let dir = state.config.storage.uploads_dir.join(media_type.dir_name());
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to create upload directory: {e}")))?;
    tokio::fs::write(dir.join(&stored_name), &file.bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to write upload: {e}")))?;

    let record = MediaItem {
        id: id.clone(),
        media_type,
        url: upload_url(media_type, &stored_name),
        name: name
            .or(file.file_name)
            .unwrap_or_else(|| stored_name.clone()),
        size: Some(file.bytes.len() as u64),
        metadata,
    };
    state.media.save(&id, record.clone()).await?;

    info!(id = %id, media_type = %media_type, bytes = file.bytes.len(), "Media uploaded");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let media = state
        .media
        .load(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Media not found"))?;

    if let Some(path) = upload_path(&state.config.storage.uploads_dir, &media.url) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Media file removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(id = %id, path = %path.display(), "Media file already gone");
            }
            Err(e) => {
                return Err(ApiError::Internal(format!("Failed to delete media file: {e}")));
            }
        }
    }

    state.media.delete(&id).await?;
    info!(id = %id, "Media deleted");
    Ok(Json(json!({ "message": "Media deleted" })))
}

async fn sync(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let mut known: HashSet<String> = state
        .media
        .get_all()
        .await?
        .into_values()
        .map(|item| item.url)
        .collect();

    let mut added = 0;
    let mut details = Map::new();

    for media_type in MediaType::UPLOADABLE {
        let dir = state.config.storage.uploads_dir.join(media_type.dir_name());
        let mut count = 0;

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping upload directory");
                details.insert(media_type.to_string(), json!(0));
                continue;
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to scan uploads: {e}")))?
        {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }

            let allowed = extension_of(&file_name)
                .map(|ext| ext.to_lowercase())
                .is_some_and(|ext| allowed_extensions(media_type).contains(&ext.as_str()));
            if !allowed {
                continue;
            }

            let url = upload_url(media_type, &file_name);
            if known.contains(&url) {
                continue;
            }

            ensure_media_for_url(state.media.as_ref(), media_type, &url, Some(file_name), None)
                .await?;
            known.insert(url);
            count += 1;
        }

        added += count;
        details.insert(media_type.to_string(), json!(count));
    }

    info!(added, "Media sync completed");
    Ok(Json(json!({
        "message": "Sync completed successfully",
        "added": added,
        "details": details,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{body_json, test_app};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const BOUNDARY: &str = "beacon-test-boundary";

    fn multipart_body(parts: &[(&str, Option<(&str, &str)>, &str)]) -> Body {
        let mut body = Vec::new();
        for (name, file, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file {
                Some((file_name, mime)) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {mime}\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    fn upload_request(media_type: &str, body: Body) -> Request<Body> {
        Request::post(format!("/api/media/upload/{media_type}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .unwrap()
    }

    #[test]
    fn test_upload_path() {
        let root = std::path::Path::new("/srv/uploads");
        assert_eq!(
            upload_path(root, "/uploads/images/a.png"),
            Some(PathBuf::from("/srv/uploads/images/a.png"))
        );
        assert_eq!(upload_path(root, "/uploads/../etc/passwd"), None);
        assert_eq!(upload_path(root, "https://cdn.example/a.png"), None);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for_mime("image/svg+xml"), Some(".svg"));
        assert_eq!(extension_for_mime("text/plain"), None);
        assert_eq!(extension_of("clip.MP4"), Some(".MP4".to_string()));
        assert_eq!(extension_of("README"), None);
    }

    #[tokio::test]
    async fn test_upload_list_and_delete() {
        let (app, state, _dir) = test_app();

        let body = multipart_body(&[
            ("file", Some(("cat.png", "image/png")), "PNG fake"),
            ("name", None, "My cat"),
            ("metadata", None, r#"{"tags":["pets"]}"#),
        ]);
        let response = app.clone().oneshot(upload_request("image", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let record = body_json(response).await;
        let id = record["id"].as_str().unwrap().to_string();
        assert_eq!(record["type"], "image");
        assert_eq!(record["name"], "My cat");
        assert_eq!(record["size"], 8);
        assert_eq!(record["metadata"]["tags"][0], "pets");
        assert_eq!(record["url"], format!("/uploads/images/{id}.png"));

        let on_disk = state.config.storage.uploads_dir.join(format!("images/{id}.png"));
        assert!(on_disk.exists());

        let response = app
            .clone()
            .oneshot(Request::get("/api/media/data/image").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/media/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!on_disk.exists());
        assert!(state.media.get_all().await.unwrap().is_empty());

        let response = app
            .oneshot(
                Request::delete(format!("/api/media/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let (app, _state, _dir) = test_app();

        let body = multipart_body(&[("file", Some(("song.mp3", "audio/mpeg")), "id3")]);
        let response = app.clone().oneshot(upload_request("image", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("does not match"));

        let body = multipart_body(&[("name", None, "no file")]);
        let response = app.clone().oneshot(upload_request("audio", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = multipart_body(&[("file", Some(("a.srt", "text/plain")), "1")]);
        let response = app.clone().oneshot(upload_request("subtitle", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = multipart_body(&[
            ("file", Some(("a.png", "image/png")), "x"),
            ("metadata", None, "{not json"),
        ]);
        let response = app.oneshot(upload_request("image", body)).await.unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"error": "Invalid metadata JSON."})
        );
    }

    #[tokio::test]
    async fn test_invalid_type_listing() {
        let (app, _state, _dir) = test_app();
        let response = app
            .oneshot(Request::get("/api/media/data/gif").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sync_registers_new_files() {
        let (app, state, _dir) = test_app();
        let uploads = &state.config.storage.uploads_dir;

        std::fs::create_dir_all(uploads.join("images")).unwrap();
        std::fs::create_dir_all(uploads.join("audios")).unwrap();
        std::fs::write(uploads.join("images/one.PNG"), b"x").unwrap();
        std::fs::write(uploads.join("images/.DS_Store"), b"x").unwrap();
        std::fs::write(uploads.join("images/notes.txt"), b"x").unwrap();
        std::fs::write(uploads.join("audios/beep.mp3"), b"x").unwrap();

        let request = || Request::post("/api/media/sync").body(Body::empty()).unwrap();

        let report = body_json(app.clone().oneshot(request()).await.unwrap()).await;
        assert_eq!(report["added"], 2);
        assert_eq!(report["details"], json!({"image": 1, "audio": 1, "video": 0}));

        let all = state.media.get_all().await.unwrap();
        assert!(all.values().any(|item| item.url == "/uploads/images/one.PNG"));

        let report = body_json(app.oneshot(request()).await.unwrap()).await;
        assert_eq!(report["added"], 0);
    }
}
