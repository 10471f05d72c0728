/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Upload intake: checks a file before it is sent to object storage, shapes
//! its storage key and records the resulting image row.

use bytes::Bytes;
use glowybits_protocol::{Image, UploadReceipt};
use rand::{rngs::OsRng, RngCore};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::error::{AppError, Rejection};
use crate::gateway::{ImageStore, NewImage};
use crate::media_backend::{probe_image_dimensions, ObjectStorage};
use crate::session::SessionContext;

const UPLOAD_FAILED: &str = "An error has occured when trying to upload image.";
const DOWNLOAD_FAILED: &str = "Unable to resolve download URL";

/// What the client declared about the file it wants to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIntake {
    pub filename: String,
    pub media_type: String,
    pub size: u64,
}

pub fn validate(file: &FileIntake) -> Result<(), Rejection> {
    validate_with_limit(file, DEFAULT_MAX_UPLOAD_BYTES)
}

/// `max_bytes` is inclusive.
pub fn validate_with_limit(file: &FileIntake, max_bytes: u64) -> Result<(), Rejection> {
    if !file.media_type.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(Rejection::InvalidType);
    }
    if file.size > max_bytes {
        return Err(Rejection::TooLarge);
    }
    if file.size == 0 {
        return Err(Rejection::Empty);
    }
    Ok(())
}

/// Everything before the first `.`.
pub fn default_title(filename: &str) -> &str {
    filename.split('.').next().unwrap_or_default()
}

/// The user's title when one was given, otherwise the original file name.
pub fn resolve_filename<'a>(title: Option<&'a str>, filename: &'a str) -> &'a str {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => filename,
    }
}

/// `{owner}/{token}-{filename}`, with exactly one `/`.
pub fn object_key(owner_id: &str, token: &str, filename: &str) -> String {
    let filename = filename.trim().replace(['/', '\\'], "_");
    let filename = if filename.is_empty() { "image".to_string() } else { filename };
    format!("{owner_id}/{token}-{filename}")
}

pub fn random_key_token(hex_len: usize) -> String {
    let mut bytes = vec![0u8; hex_len.div_ceil(2)];
    OsRng.fill_bytes(&mut bytes);
    let mut token = hex::encode(bytes);
    token.truncate(hex_len);
    token
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl FromStr for Visibility {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(AppError::Validation(format!("unknown visibility: {other}"))),
        }
    }
}

/// Text fields sent alongside the file.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub category: Option<String>,
    pub visibility: Visibility,
}

impl UploadForm {
    /// Comma-separated, trimmed, blanks dropped. `None` when nothing is left.
    pub fn parsed_tags(&self) -> Option<Vec<String>> {
        let tags = self
            .tags
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        (!tags.is_empty()).then_some(tags)
    }

    fn text(field: &Option<String>) -> Value {
        match field.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Value::String(v.to_string()),
            _ => Value::Null,
        }
    }
}

#[derive(Clone)]
pub struct UploadService {
    images: Arc<dyn ImageStore>,
    storage: Arc<dyn ObjectStorage>,
    max_upload_bytes: u64,
    key_token_hex_len: usize,
}

impl UploadService {
    pub fn new(
        images: Arc<dyn ImageStore>,
        storage: Arc<dyn ObjectStorage>,
        max_upload_bytes: u64,
        key_token_hex_len: usize,
    ) -> Self {
        Self {
            images,
            storage,
            max_upload_bytes,
            key_token_hex_len,
        }
    }

    pub async fn upload(
        &self,
        session: Option<&SessionContext>,
        form: &UploadForm,
        filename: &str,
        media_type: &str,
        bytes: Bytes,
    ) -> Result<UploadReceipt, AppError> {
        let session = session.ok_or(AppError::Auth)?;
        let intake = FileIntake {
            filename: filename.to_string(),
            media_type: media_type.to_string(),
            size: bytes.len() as u64,
        };
        validate_with_limit(&intake, self.max_upload_bytes)?;

        let resolved = resolve_filename(form.title.as_deref(), filename);
        let key = object_key(
            &session.user_id,
            &random_key_token(self.key_token_hex_len),
            resolved,
        );
        let display = match form.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => default_title(filename),
        };
        let tags = form.parsed_tags();
        let is_private = form.visibility == Visibility::Private;

        let mut metadata = Map::new();
        metadata.insert("tags".into(), json!(tags));
        metadata.insert("description".into(), UploadForm::text(&form.description));
        metadata.insert("category".into(), UploadForm::text(&form.category));
        metadata.insert("is_private".into(), json!(is_private));
        metadata.insert("is_deleted".into(), json!(false));
        metadata.insert("path".into(), json!(key));
        metadata.insert("title".into(), json!(display));
        metadata.insert("content_type".into(), json!(media_type));
        metadata.insert("size".into(), json!(intake.size));
        if let Some((w, h)) = probe_image_dimensions(&bytes) {
            metadata.insert("width".into(), json!(w));
            metadata.insert("height".into(), json!(h));
        }

        let stored = self
            .storage
            .put(&key, media_type, &bytes)
            .await
            .map_err(|e| {
                error!(%key, "storage upload failed: {e:#}");
                AppError::backend(UPLOAD_FAILED, e)
            })?;

        let title = key.rsplit('/').next().unwrap_or(&key).to_string();
        let image = self
            .images
            .insert_image(NewImage {
                title,
                tags,
                url: self.storage.public_url(&stored.key, None),
                metadata,
                is_private,
                owner_id: session.user_id.clone(),
                storage_image_id: stored.id,
            })
            .await;
        let image = match image {
            Ok(image) => image,
            Err(e) => {
                error!(%key, "image row insert failed: {e:#}");
                if let Err(cleanup) = self.storage.delete(&key).await {
                    warn!(%key, "orphaned upload left in storage: {cleanup:#}");
                }
                return Err(AppError::backend(UPLOAD_FAILED, e));
            }
        };
        info!(image_id = %image.id, %key, size = intake.size, "image uploaded");
        Ok(UploadReceipt {
            status: 200,
            key,
            image,
        })
    }

    /// Attachment URL for an image's stored object.
    pub async fn download_url(
        &self,
        viewer: Option<&SessionContext>,
        image_id: &str,
    ) -> Result<String, AppError> {
        let image: Image = self
            .images
            .get_image(image_id)
            .await
            .map_err(|e| AppError::backend(DOWNLOAD_FAILED, e))?
            .ok_or(AppError::NotFound)?;
        if !image.visible_to(viewer.map(|s| s.user_id.as_str())) {
            return Err(AppError::NotFound);
        }
        let path = image.storage_path().ok_or(AppError::NotFound)?;
        let name = path.rsplit('/').next().unwrap_or(path);
        Ok(self.storage.public_url(path, Some(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_db::GlowyDb;
    use crate::media_backend::LocalObjectStorage;
    use std::time::Duration;

    fn intake(media_type: &str, size: u64) -> FileIntake {
        FileIntake {
            filename: "cat.png".to_string(),
            media_type: media_type.to_string(),
            size,
        }
    }

    fn png_bytes() -> Bytes {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&[0, 0, 0, 13]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&32u32.to_be_bytes());
        png.extend_from_slice(&16u32.to_be_bytes());
        Bytes::from(png)
    }

    fn session(user_id: &str) -> SessionContext {
        SessionContext {
            user_id: user_id.to_string(),
            email: format!("{user_id}@example.com"),
            username: user_id.to_string(),
            token: "t".to_string(),
        }
    }

    fn service(dir: &tempfile::TempDir, hex_len: usize) -> UploadService {
        let db = GlowyDb::open(dir.path().join("glowybits.db"), Duration::from_secs(3600)).unwrap();
        let storage = LocalObjectStorage::new(dir.path().join("media"), "http://glowy.test");
        UploadService::new(
            Arc::new(db),
            Arc::new(storage),
            DEFAULT_MAX_UPLOAD_BYTES,
            hex_len,
        )
    }

    #[test]
    fn size_ceiling_is_inclusive() {
        let limit = 10 * 1024 * 1024;
        assert_eq!(validate(&intake("image/png", limit)), Ok(()));
        assert_eq!(validate(&intake("image/png", limit + 1)), Err(Rejection::TooLarge));
    }

    #[test]
    fn type_is_checked_before_size() {
        assert_eq!(validate(&intake("text/plain", 10)), Err(Rejection::InvalidType));
        assert_eq!(
            validate(&intake("application/pdf", u64::MAX)),
            Err(Rejection::InvalidType)
        );
        assert_eq!(validate(&intake("image/jpeg", 0)), Err(Rejection::Empty));
    }

    #[test]
    fn filename_rules() {
        assert_eq!(default_title("holiday.photo.jpg"), "holiday");
        assert_eq!(resolve_filename(Some("  "), "cat.png"), "cat.png");
        assert_eq!(resolve_filename(Some("My cat"), "cat.png"), "My cat");
        assert_eq!(object_key("u1", "ab12", "a/b.png"), "u1/ab12-a_b.png");
    }

    #[test]
    fn key_tokens_have_the_requested_length() {
        for len in [4, 5, 16] {
            let token = random_key_token(len);
            assert_eq!(token.len(), len);
            assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn tags_are_split_and_trimmed() {
        let form = UploadForm {
            tags: Some(" sky, ,beach ,".to_string()),
            ..UploadForm::default()
        };
        assert_eq!(form.parsed_tags(), Some(vec!["sky".to_string(), "beach".to_string()]));
        assert_eq!(UploadForm::default().parsed_tags(), None);
        assert!("secret".parse::<Visibility>().is_err());
    }

    #[tokio::test]
    async fn upload_stores_object_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, 4);
        let me = session("u1");
        let form = UploadForm {
            tags: Some("cats".to_string()),
            visibility: Visibility::Private,
            ..UploadForm::default()
        };

        let receipt = svc
            .upload(Some(&me), &form, "cat.png", "image/png", png_bytes())
            .await
            .unwrap();
        let (owner, rest) = receipt.key.split_once('/').unwrap();
        assert_eq!(owner, "u1");
        assert_eq!(rest.len(), "abcd-cat.png".len());
        assert!(rest.ends_with("-cat.png"));

        let image = receipt.image;
        assert_eq!(image.title, rest);
        assert!(image.is_private);
        assert_eq!(image.storage_path(), Some(receipt.key.as_str()));
        assert_eq!(image.metadata["title"], "cat");
        assert_eq!(image.metadata["width"], 32);
        assert!(dir.path().join("media").join(&receipt.key).exists());

        let url = svc.download_url(Some(&me), &image.id).await.unwrap();
        assert!(url.ends_with(&format!("?download={rest}")));
        assert!(matches!(
            svc.download_url(None, &image.id).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn rejected_uploads_never_reach_storage() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir, 16);
        let err = svc
            .upload(
                Some(&session("u1")),
                &UploadForm::default(),
                "notes.txt",
                "text/plain",
                Bytes::from_static(b"hello"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Rejected(Rejection::InvalidType)));
        assert!(!dir.path().join("media").exists());

        let err = svc
            .upload(None, &UploadForm::default(), "cat.png", "image/png", png_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth));
    }
}
