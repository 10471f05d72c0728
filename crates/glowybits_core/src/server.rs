/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{from_fn, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use glowybits_protocol::{InteractionKind, StatusMessage};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};

use crate::auth::{AuthService, LoginForm, RegisterForm};
use crate::config::GlowyConfig;
use crate::error::{AppError, Rejection};
use crate::feed::FeedEngine;
use crate::gateway::{AuthProvider, Backend};
use crate::image_db::GlowyDb;
use crate::interactions::InteractionResolver;
use crate::media_backend::{build_object_storage, guess_media_type, sniff_media_type};
use crate::session::{clear_session_cookie, resolve_session, session_cookie, SessionContext};
use crate::upload::{UploadForm, UploadService, Visibility};

static REQ_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    let id = REQ_ID.fetch_add(1, Ordering::Relaxed);
    format!("req-{id}")
}

/// Opens the SQLite tables and the configured object storage.
pub fn open_backend(cfg: &GlowyConfig) -> Result<Backend> {
    let db = Arc::new(GlowyDb::open(&cfg.db_path, cfg.session_ttl())?);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .build()
        .context("build http client")?;
    let storage = build_object_storage(&cfg.media, &cfg.public_base_url, http)?;
    Ok(Backend {
        images: db.clone(),
        interactions: db.clone(),
        auth: db,
        storage: Arc::from(storage),
    })
}

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<GlowyConfig>,
    backend: Backend,
    feed: FeedEngine,
    interactions: InteractionResolver,
    uploads: UploadService,
    auth: AuthService,
}

impl AppState {
    pub fn new(cfg: GlowyConfig, backend: Backend) -> Self {
        let feed = FeedEngine::new(backend.images.clone());
        let interactions =
            InteractionResolver::new(backend.images.clone(), backend.interactions.clone());
        let uploads = UploadService::new(
            backend.images.clone(),
            backend.storage.clone(),
            cfg.max_upload_bytes,
            cfg.key_token_hex_len,
        );
        let auth = AuthService::new(backend.auth.clone());
        Self {
            cfg: Arc::new(cfg),
            backend,
            feed,
            interactions,
            uploads,
            auth,
        }
    }

    async fn session(&self, headers: &HeaderMap) -> Option<SessionContext> {
        match resolve_session(self.backend.auth.as_ref(), headers).await {
            Ok(session) => session,
            Err(e) => {
                warn!("session lookup failed: {e:#}");
                None
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    let max_body = state.cfg.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/images", get(feed_page).post(upload_image))
        .route("/api/me/images", get(my_images))
        .route(
            "/api/images/:id/interactions",
            get(interaction_state).post(toggle_interaction),
        )
        .route("/api/images/:id/download", get(download))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/media/*key", get(media_get))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("req");
                info_span!(
                    "http",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id
                )
            }),
        )
        .layer(from_fn(ensure_request_ids))
        .with_state(state)
}

/// Prunes expired sessions once now, then every `every`.
pub fn spawn_session_pruner(auth: Arc<dyn AuthProvider>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match auth.prune_expired_sessions().await {
                Ok(0) => {}
                Ok(n) => info!(pruned = n, "expired sessions removed"),
                Err(e) => error!("session prune failed: {e:#}"),
            }
        }
    })
}

pub async fn serve(cfg: GlowyConfig, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
    let backend = open_backend(&cfg)?;
    let pruner = spawn_session_pruner(backend.auth.clone(), cfg.session_prune_interval());
    let addr = cfg.bind;
    let app = router(AppState::new(cfg, backend));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("glowybits listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server")?;
    pruner.abort();
    Ok(())
}

async fn ensure_request_ids(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let request_id = match req.headers().get("x-request-id") {
        Some(v) => v.clone(),
        None => {
            let v = HeaderValue::from_str(&next_request_id())
                .unwrap_or_else(|_| HeaderValue::from_static("req"));
            req.headers_mut().insert("x-request-id", v.clone());
            v
        }
    };
    let mut resp = next.run(req).await;
    resp.headers_mut().insert("x-request-id", request_id);
    resp
}

fn status_response(msg: StatusMessage) -> Response {
    let status = StatusCode::from_u16(msg.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(msg)).into_response()
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.backend.images.health_check().await {
        warn!("db not ready: {e:#}");
        return (StatusCode::SERVICE_UNAVAILABLE, "db not ready");
    }
    if let Err(e) = state.backend.storage.health_check().await {
        warn!("media backend not ready: {e:#}");
        return (StatusCode::SERVICE_UNAVAILABLE, "media backend not ready");
    }
    (StatusCode::OK, "ready")
}

#[derive(Debug, Deserialize)]
struct FeedParams {
    query: Option<String>,
    cursor: Option<u64>,
}

async fn feed_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedParams>,
) -> impl IntoResponse {
    let viewer = state.session(&headers).await;
    let page = state
        .feed
        .fetch_page(viewer.as_ref(), params.cursor.unwrap_or(0), params.query.as_deref())
        .await;
    Json(page)
}

async fn my_images(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let session = state.session(&headers).await;
    let images = state.feed.user_images(session.as_ref()).await?;
    Ok(Json(images).into_response())
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Rejection::TooLarge.into()
    } else {
        AppError::Validation(e.body_text())
    }
}

struct UploadedFile {
    filename: String,
    media_type: String,
    bytes: Bytes,
}

async fn read_upload(mut multipart: Multipart) -> Result<(UploadForm, Option<UploadedFile>), AppError> {
    let mut form = UploadForm::default();
    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let filename = field.file_name().unwrap_or("image").to_string();
            let media_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| guess_media_type(&filename));
            let bytes = field.bytes().await.map_err(multipart_error)?;
            file = Some(UploadedFile {
                filename,
                media_type,
                bytes,
            });
            continue;
        }
        let text = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "title" => form.title = Some(text),
            "description" => form.description = Some(text),
            "tags" => form.tags = Some(text),
            "category" => form.category = Some(text),
            "visibility" => form.visibility = text.parse()?,
            // Older clients send the flag instead of `visibility`.
            "is_private" if text.trim() == "true" => form.visibility = Visibility::Private,
            _ => {}
        }
    }
    Ok((form, file))
}

async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let session = state.session(&headers).await.ok_or(AppError::Auth)?;
    let (form, file) = read_upload(multipart).await?;
    let file = file.ok_or(Rejection::Empty)?;
    let receipt = state
        .uploads
        .upload(
            Some(&session),
            &form,
            &file.filename,
            &file.media_type,
            file.bytes,
        )
        .await?;
    Ok(Json(receipt).into_response())
}

#[derive(Debug, Deserialize)]
struct ToggleBody {
    kind: String,
}

async fn toggle_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
    Json(body): Json<ToggleBody>,
) -> Result<Response, AppError> {
    let session = state.session(&headers).await;
    let kind: InteractionKind = body
        .kind
        .parse()
        .map_err(|e: glowybits_protocol::UnknownInteractionKind| AppError::Validation(e.to_string()))?;
    let outcome = state
        .interactions
        .toggle(session.as_ref(), &image_id, kind)
        .await?;
    Ok(Json(outcome).into_response())
}

async fn interaction_state(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> Result<Response, AppError> {
    let session = state.session(&headers).await;
    let current = state.interactions.state(session.as_ref(), &image_id).await?;
    Ok(Json(current).into_response())
}

async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> Result<Response, AppError> {
    let session = state.session(&headers).await;
    let url = state.uploads.download_url(session.as_ref(), &image_id).await?;
    Ok(Redirect::temporary(&url).into_response())
}

async fn register(State(state): State<AppState>, Json(form): Json<RegisterForm>) -> Response {
    status_response(state.auth.register(form).await)
}

async fn login(State(state): State<AppState>, Json(form): Json<LoginForm>) -> Response {
    let result = state.auth.login(form).await;
    let mut resp = status_response(result.status);
    if let Some(session) = result.session {
        let cookie = session_cookie(&session.token, state.cfg.session_ttl_secs, state.cfg.secure_cookies);
        if let Ok(v) = HeaderValue::from_str(&cookie) {
            resp.headers_mut().insert(header::SET_COOKIE, v);
        }
    }
    resp
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = state.session(&headers).await;
    let msg = state.auth.logout(session.as_ref()).await;
    let ok = msg.is_success();
    let mut resp = status_response(msg);
    if ok {
        if let Ok(v) = HeaderValue::from_str(&clear_session_cookie(state.cfg.secure_cookies)) {
            resp.headers_mut().insert(header::SET_COOKIE, v);
        }
    }
    resp
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let session = state.session(&headers).await;
    let user = state.auth.current_user(session.as_ref())?;
    Ok(Json(user).into_response())
}

#[derive(Debug, Deserialize)]
struct MediaParams {
    download: Option<String>,
}

async fn media_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Query(params): Query<MediaParams>,
) -> Response {
    let viewer = state.session(&headers).await;
    let image = match state.backend.images.find_by_storage_path(&key).await {
        Ok(Some(image)) => image,
        Ok(None) => return (StatusCode::NOT_FOUND, "not found").into_response(),
        Err(e) => {
            warn!(%key, "media owner lookup failed: {e:#}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "media lookup failed").into_response();
        }
    };
    if !image.visible_to(viewer.as_ref().map(|s| s.user_id.as_str())) {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }

    let bytes = match state.backend.storage.load(&key).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%key, "media load failed: {e:#}");
            return (StatusCode::NOT_FOUND, "not found").into_response();
        }
    };
    let mut media_type = guess_media_type(&key);
    if media_type == "application/octet-stream" {
        if let Some(sniffed) = sniff_media_type(&bytes) {
            media_type = sniffed.to_string();
        }
    }

    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&media_type) {
        headers.insert(header::CONTENT_TYPE, v);
    }
    let cache = if image.is_private {
        "private, no-store"
    } else {
        "public, max-age=31536000, immutable"
    };
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache));
    if let Some(name) = params.download {
        let name = name.replace(['"', '\r', '\n'], "");
        if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, v);
        }
    }
    (StatusCode::OK, headers, bytes).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use glowybits_protocol::{FeedPage, FeedState, InteractionState, ToggleOutcome, UploadReceipt};
    use tower::util::ServiceExt;

    const BOUNDARY: &str = "glowyboundary";

    fn app(dir: &tempfile::TempDir) -> Router {
        let cfg = GlowyConfig::for_data_dir(dir.path());
        let backend = open_backend(&cfg).unwrap();
        router(AppState::new(cfg, backend))
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    async fn signed_in(app: &Router) -> String {
        signed_in_as(app, "ana").await
    }

    async fn signed_in_as(app: &Router, username: &str) -> String {
        let email = format!("{username}@example.com");
        let (status, _, _) = call(
            app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                serde_json::json!({
                    "email": email,
                    "password": "hunter2hunter2",
                    "username": username,
                    "full_name": "Glowy Tester"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, headers, _) = call(
            app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                serde_json::json!({ "email": email, "password": "hunter2hunter2" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let set_cookie = headers[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn multipart_upload(cookie: &str, filename: &str, media_type: &str, bytes: &[u8]) -> Request<Body> {
        multipart_upload_with(cookie, &[("tags", "sea, sky")], filename, media_type, bytes)
    }

    fn multipart_upload_with(
        cookie: &str,
        fields: &[(&str, &str)],
        filename: &str,
        media_type: &str,
        bytes: &[u8],
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: {media_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri("/api/images")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .header(header::COOKIE, cookie)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_and_request_ids() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let (status, headers, body) =
            call(&app, Request::get("/healthz").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ok");
        assert!(headers.contains_key("x-request-id"));

        let req = Request::get("/readyz")
            .header("x-request-id", "abc")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-request-id"], "abc");
    }

    #[tokio::test]
    async fn empty_feed_and_missing_search_hits() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let (status, _, body) =
            call(&app, Request::get("/api/images").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let page: FeedPage = serde_json::from_slice(&body).unwrap();
        assert_eq!(page.state, FeedState::Empty);

        let (_, _, body) = call(
            &app,
            Request::get("/api/images?query=sunset&cursor=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let page: FeedPage = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            page.state,
            FeedState::NoResults {
                query: "sunset".to_string()
            }
        );
    }

    #[tokio::test]
    async fn anonymous_calls_are_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let (status, _, body) = call(
            &app,
            json_request("POST", "/api/images/x/interactions", None, serde_json::json!({ "kind": "like" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let msg: StatusMessage = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.message, "User not authenticated");

        let (status, _, _) =
            call(&app, Request::get("/api/auth/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upload_feed_toggle_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let cookie = signed_in(&app).await;

        let (status, _, body) = call(&app, multipart_upload(&cookie, "notes.txt", "text/plain", b"hi")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let msg: StatusMessage = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.message, "Please select a valid image file");

        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x02\0\0\0\x02";
        let (status, _, body) = call(&app, multipart_upload(&cookie, "sunset-beach.png", "image/png", png)).await;
        assert_eq!(status, StatusCode::OK);
        let receipt: UploadReceipt = serde_json::from_slice(&body).unwrap();
        assert_eq!(receipt.image.tags, Some(vec!["sea".to_string(), "sky".to_string()]));

        let (_, _, body) = call(
            &app,
            Request::get("/api/images?query=SUNSET").body(Body::empty()).unwrap(),
        )
        .await;
        let page: FeedPage = serde_json::from_slice(&body).unwrap();
        assert_eq!(page.images.len(), 1);
        let image_id = page.images[0].id.clone();

        let uri = format!("/api/images/{image_id}/interactions");
        let (status, _, body) = call(
            &app,
            json_request("POST", &uri, Some(&cookie), serde_json::json!({ "kind": "like" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let outcome: ToggleOutcome = serde_json::from_slice(&body).unwrap();
        assert!(outcome.state.liked);

        let (status, _, _) = call(
            &app,
            json_request("POST", &uri, Some(&cookie), serde_json::json!({ "kind": "love" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let req = Request::get(&uri).header(header::COOKIE, &cookie).body(Body::empty()).unwrap();
        let (_, _, body) = call(&app, req).await;
        let state: InteractionState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state, InteractionState { liked: true, favorited: false });

        let req = Request::get(format!("/api/images/{image_id}/download"))
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(&app, req).await;
        assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
        let location = headers[header::LOCATION].to_str().unwrap();
        let media_path = location.strip_prefix("http://127.0.0.1:8080").unwrap();

        let (status, headers, body) =
            call(&app, Request::get(media_path).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], &png[..]);
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert!(headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment;"));
    }

    #[tokio::test]
    async fn private_media_is_served_only_to_its_owner() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let owner = signed_in_as(&app, "ana").await;
        let other = signed_in_as(&app, "bea").await;

        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x02\0\0\0\x02";
        let req = multipart_upload_with(&owner, &[("visibility", "private")], "ghost.png", "image/png", png);
        let (status, _, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let receipt: UploadReceipt = serde_json::from_slice(&body).unwrap();
        assert!(receipt.image.is_private);
        let media_path = format!("/media/{}", receipt.key);
        let download_path = format!("/api/images/{}/download", receipt.image.id);

        for cookie in [None, Some(other.as_str())] {
            for path in [&media_path, &download_path] {
                let mut req = Request::get(path.as_str());
                if let Some(cookie) = cookie {
                    req = req.header(header::COOKIE, cookie);
                }
                let (status, _, _) = call(&app, req.body(Body::empty()).unwrap()).await;
                assert_eq!(status, StatusCode::NOT_FOUND, "{path} as {cookie:?}");
            }
        }

        let req = Request::get(media_path.as_str())
            .header(header::COOKIE, &owner)
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], &png[..]);
        assert_eq!(headers[header::CACHE_CONTROL], "private, no-store");
    }

    #[tokio::test]
    async fn media_without_an_image_row_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let media = dir.path().join("media").join("u1");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("ab12-stray.png"), b"stray").unwrap();

        let (status, _, _) = call(
            &app,
            Request::get("/media/u1/ab12-stray.png").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn huge_cursor_is_an_empty_last_page() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir);
        let cookie = signed_in(&app).await;
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x02\0\0\0\x02";
        let (status, _, _) = call(&app, multipart_upload(&cookie, "a.png", "image/png", png)).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/images?cursor={}", u64::MAX - 9);
        let (status, _, body) = call(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let page: FeedPage = serde_json::from_slice(&body).unwrap();
        assert!(page.images.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn pruner_clears_expired_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glowybits.db");
        let db = Arc::new(GlowyDb::open(&path, Duration::ZERO).unwrap());
        db.create_user(&crate::gateway::NewUser {
            email: "cy@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
            username: "cy".to_string(),
            full_name: "Cy Young".to_string(),
            bio: None,
        })
        .unwrap();
        db.create_session("cy@example.com", "hunter2hunter2").unwrap().unwrap();

        let count = || -> i64 {
            rusqlite::Connection::open(&path)
                .unwrap()
                .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(count(), 1);

        let pruner = spawn_session_pruner(db, Duration::from_secs(3600));
        for _ in 0..100 {
            if count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        pruner.abort();
        assert_eq!(count(), 0);
    }
}
