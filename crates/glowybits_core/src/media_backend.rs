/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client as S3Client, Config as S3Config,
};
use rand::{rngs::OsRng, RngCore};
use reqwest::Client as HttpClient;
use std::path::PathBuf;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// "local" (default), "webdav" or "s3"
    pub backend: String,
    pub local_dir: PathBuf,
    /// Base for public URLs of non-local backends (CDN, bucket website, ...).
    pub public_url_base: Option<String>,

    pub webdav_base_url: Option<String>,
    pub webdav_username: Option<String>,
    pub webdav_password: Option<String>,
    pub webdav_bearer_token: Option<String>,

    pub s3_region: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_path_style: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self::local(PathBuf::from("media"))
    }
}

impl MediaConfig {
    pub fn local(dir: PathBuf) -> Self {
        Self {
            backend: "local".to_string(),
            local_dir: dir,
            public_url_base: None,
            webdav_base_url: None,
            webdav_username: None,
            webdav_password: None,
            webdav_bearer_token: None,
            s3_region: None,
            s3_bucket: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_path_style: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Storage-layer identifier, distinct from the image id.
    pub id: String,
    pub key: String,
    pub media_type: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, media_type: &str, bytes: &[u8]) -> Result<StoredObject>;
    async fn load(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Public URL for `key`; with `download` the URL asks for an attachment
    /// response named after the given file name.
    fn public_url(&self, key: &str, download: Option<&str>) -> String;
    async fn health_check(&self) -> Result<()>;
}

/// Normalizes an object key and refuses anything that could escape the bucket.
pub fn sanitize_key(key: &str) -> Result<String> {
    let key = key.trim().replace('\\', "/");
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        anyhow::bail!("empty object key");
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        anyhow::bail!("invalid object key: {key}");
    }
    Ok(key.to_string())
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn with_download(url: String, download: Option<&str>) -> String {
    match download {
        Some(name) => format!("{url}?download={}", urlencoding::encode(name)),
        None => url,
    }
}

pub fn guess_media_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Media type from magic bytes, for keys whose file name has no extension.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Width and height from the image header, for the formats uploads accept.
pub fn probe_image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    // PNG: big-endian width/height right after the IHDR tag.
    if bytes.len() >= 24 && &bytes[0..8] == b"\x89PNG\r\n\x1a\n" {
        let w = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
        let h = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
        return (w > 0 && h > 0).then_some((w, h));
    }

    // GIF: logical screen size, little-endian, at offset 6.
    if bytes.len() >= 10 && (&bytes[0..6] == b"GIF87a" || &bytes[0..6] == b"GIF89a") {
        let w = u16::from_le_bytes(bytes[6..8].try_into().ok()?) as u32;
        let h = u16::from_le_bytes(bytes[8..10].try_into().ok()?) as u32;
        return (w > 0 && h > 0).then_some((w, h));
    }

    if bytes.len() >= 4 && bytes[0] == 0xFF && bytes[1] == 0xD8 {
        return jpeg_dimensions(bytes);
    }

    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return webp_dimensions(bytes);
    }

    None
}

/// Walks JPEG segments up to the first baseline or progressive frame header.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2usize;
    while i + 4 < bytes.len() {
        if bytes[i] != 0xFF {
            i += 1;
            continue;
        }
        // Runs of 0xFF are padding before the marker byte.
        while i < bytes.len() && bytes[i] == 0xFF {
            i += 1;
        }
        let marker = *bytes.get(i)?;
        i += 1;
        // End of image or start of scan: no frame header follows.
        if marker == 0xD9 || marker == 0xDA {
            return None;
        }
        let seg_len = u16::from_be_bytes(bytes.get(i..i + 2)?.try_into().ok()?) as usize;
        if seg_len < 2 || i + seg_len > bytes.len() {
            return None;
        }
        if marker == 0xC0 || marker == 0xC2 {
            // Length, precision, then height before width.
            let h = u16::from_be_bytes(bytes.get(i + 3..i + 5)?.try_into().ok()?) as u32;
            let w = u16::from_be_bytes(bytes.get(i + 5..i + 7)?.try_into().ok()?) as u32;
            return (w > 0 && h > 0).then_some((w, h));
        }
        i += seg_len;
    }
    None
}

/// First VP8X, VP8L or VP8 chunk that carries a canvas size.
fn webp_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let le24 = |b: &[u8]| u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16);
    let mut i = 12usize;
    while i + 8 <= bytes.len() {
        let tag = &bytes[i..i + 4];
        let size = u32::from_le_bytes(bytes[i + 4..i + 8].try_into().ok()?) as usize;
        let data = bytes.get(i + 8..(i + 8).checked_add(size)?)?;
        match tag {
            b"VP8X" if data.len() >= 10 => {
                return Some((le24(&data[4..7]) + 1, le24(&data[7..10]) + 1));
            }
            // Lossless: 0x2f signature, then two packed 14-bit sizes minus one.
            b"VP8L" if data.len() >= 5 && data[0] == 0x2F => {
                let bits = u32::from_le_bytes(data[1..5].try_into().ok()?);
                return Some(((bits & 0x3FFF) + 1, ((bits >> 14) & 0x3FFF) + 1));
            }
            // Lossy: key frame start code, then 14-bit sizes.
            b"VP8 " if data.len() >= 10 && data[3..6] == [0x9D, 0x01, 0x2A] => {
                let w = u32::from(u16::from_le_bytes(data[6..8].try_into().ok()?) & 0x3FFF);
                let h = u32::from(u16::from_le_bytes(data[8..10].try_into().ok()?) & 0x3FFF);
                return (w > 0 && h > 0).then_some((w, h));
            }
            _ => {}
        }
        // Chunk payloads are padded to an even length.
        i += 8 + size + (size % 2);
    }
    None
}

pub struct LocalObjectStorage {
    dir: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(dir: PathBuf, public_base_url: &str) -> Self {
        Self {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.dir.join(sanitize_key(key)?))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, key: &str, media_type: &str, bytes: &[u8]) -> Result<StoredObject> {
        let key = sanitize_key(key)?;
        let path = self.dir.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.context("create media dir")?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("write media {path:?}"))?;
        Ok(StoredObject {
            id: new_id(),
            key,
            media_type: media_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("read media {path:?}"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("delete media {path:?}"))?;
        }
        Ok(())
    }

    fn public_url(&self, key: &str, download: Option<&str>) -> String {
        let url = format!("{}/media/{}", self.public_base_url, encode_key(key));
        with_download(url, download)
    }

    async fn health_check(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("ensure media dir")?;
        Ok(())
    }
}

pub struct WebDavObjectStorage {
    base_url: String,
    public_url_base: String,
    username: Option<String>,
    password: Option<String>,
    bearer_token: Option<String>,
    http: HttpClient,
}

impl WebDavObjectStorage {
    pub fn new(
        base_url: String,
        public_url_base: Option<String>,
        username: Option<String>,
        password: Option<String>,
        bearer_token: Option<String>,
        http: HttpClient,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            public_url_base: public_url_base
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| base_url.clone()),
            base_url,
            username,
            password,
            bearer_token,
            http,
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(tok) = &self.bearer_token {
            req.header("Authorization", format!("Bearer {tok}"))
        } else if let (Some(u), Some(p)) = (&self.username, &self.password) {
            req.basic_auth(u, Some(p))
        } else {
            req
        }
    }
}

#[async_trait]
impl ObjectStorage for WebDavObjectStorage {
    async fn put(&self, key: &str, media_type: &str, bytes: &[u8]) -> Result<StoredObject> {
        let key = sanitize_key(key)?;
        let url = format!("{}/{}", self.base_url, encode_key(&key));
        let req = self
            .authorize(self.http.put(&url))
            .header("Content-Type", media_type)
            .body(bytes.to_vec());
        let resp = req.send().await.context("webdav put")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("webdav upload failed: {} {}", status, text);
        }
        Ok(StoredObject {
            id: new_id(),
            key,
            media_type: media_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let key = sanitize_key(key)?;
        let url = format!("{}/{}", self.base_url, encode_key(&key));
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .context("webdav get")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("webdav get failed: {} {}", status, text);
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = sanitize_key(key)?;
        let url = format!("{}/{}", self.base_url, encode_key(&key));
        let resp = self
            .authorize(self.http.request(reqwest::Method::DELETE, &url))
            .send()
            .await
            .context("webdav delete")?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("webdav delete failed: {} {}", status, text);
        }
        Ok(())
    }

    fn public_url(&self, key: &str, download: Option<&str>) -> String {
        with_download(format!("{}/{}", self.public_url_base, encode_key(key)), download)
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .authorize(self.http.request(reqwest::Method::OPTIONS, &self.base_url))
            .send()
            .await
            .context("webdav options")?;
        if !resp.status().is_success() {
            anyhow::bail!("webdav health failed: {}", resp.status());
        }
        Ok(())
    }
}

pub struct S3ObjectStorage {
    client: S3Client,
    bucket: String,
    public_url_base: String,
}

impl S3ObjectStorage {
    pub fn new(client: S3Client, bucket: String, public_url_base: String) -> Self {
        Self {
            client,
            bucket,
            public_url_base: public_url_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn put(&self, key: &str, media_type: &str, bytes: &[u8]) -> Result<StoredObject> {
        let key = sanitize_key(key)?;
        let out = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(media_type)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .context("s3 put")?;
        let id = out
            .e_tag()
            .map(|t| t.trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(new_id);
        Ok(StoredObject {
            id,
            key,
            media_type: media_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(sanitize_key(key)?)
            .send()
            .await
            .context("s3 get")?;
        let data = resp.body.collect().await.context("s3 body")?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(sanitize_key(key)?)
            .send()
            .await
            .context("s3 delete")?;
        Ok(())
    }

    fn public_url(&self, key: &str, download: Option<&str>) -> String {
        with_download(format!("{}/{}", self.public_url_base, encode_key(key)), download)
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .context("s3 head_bucket")?;
        Ok(())
    }
}

pub fn build_object_storage(
    cfg: &MediaConfig,
    public_base_url: &str,
    http: HttpClient,
) -> Result<Box<dyn ObjectStorage>> {
    match cfg.backend.trim().to_lowercase().as_str() {
        "local" => Ok(Box::new(LocalObjectStorage::new(
            cfg.local_dir.clone(),
            public_base_url,
        ))),
        "webdav" => {
            let base = cfg.webdav_base_url.clone().ok_or_else(|| {
                anyhow::anyhow!("media.backend=webdav requires GLOWYBITS_MEDIA_WEBDAV_BASE_URL")
            })?;
            Ok(Box::new(WebDavObjectStorage::new(
                base,
                cfg.public_url_base.clone(),
                cfg.webdav_username.clone(),
                cfg.webdav_password.clone(),
                cfg.webdav_bearer_token.clone(),
                http,
            )))
        }
        "s3" => {
            let region = cfg.s3_region.clone().ok_or_else(|| {
                anyhow::anyhow!("media.backend=s3 requires GLOWYBITS_MEDIA_S3_REGION")
            })?;
            let bucket = cfg.s3_bucket.clone().ok_or_else(|| {
                anyhow::anyhow!("media.backend=s3 requires GLOWYBITS_MEDIA_S3_BUCKET")
            })?;
            let access = cfg.s3_access_key.clone().ok_or_else(|| {
                anyhow::anyhow!("media.backend=s3 requires GLOWYBITS_MEDIA_S3_ACCESS_KEY")
            })?;
            let secret = cfg.s3_secret_key.clone().ok_or_else(|| {
                anyhow::anyhow!("media.backend=s3 requires GLOWYBITS_MEDIA_S3_SECRET_KEY")
            })?;
            let public_url_base = cfg.public_url_base.clone().unwrap_or_else(|| {
                match &cfg.s3_endpoint {
                    Some(endpoint) => format!("{}/{bucket}", endpoint.trim_end_matches('/')),
                    None => format!("https://{bucket}.s3.{region}.amazonaws.com"),
                }
            });
            let credentials = Credentials::new(access, secret, None, None, "glowybits");
            let mut builder = S3Config::builder()
                .region(Region::new(region))
                .credentials_provider(credentials)
                .force_path_style(cfg.s3_path_style);
            if let Some(endpoint) = cfg.s3_endpoint.clone() {
                builder = builder.endpoint_url(endpoint);
            }
            let client = S3Client::from_conf(builder.build());
            Ok(Box::new(S3ObjectStorage::new(client, bucket, public_url_base)))
        }
        other => anyhow::bail!("unsupported media.backend: {other}"),
    }
}

fn new_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_the_media_dir() {
        assert_eq!(sanitize_key("/u1/ab12-cat.png").unwrap(), "u1/ab12-cat.png");
        assert_eq!(sanitize_key("u1\\ab12-cat.png").unwrap(), "u1/ab12-cat.png");
        assert!(sanitize_key("u1/../../etc/passwd").is_err());
        assert!(sanitize_key("u1//x").is_err());
        assert!(sanitize_key("  ").is_err());
    }

    #[test]
    fn download_urls_carry_the_file_name() {
        let storage = LocalObjectStorage::new(PathBuf::from("/tmp/x"), "http://glowy.test/");
        assert_eq!(
            storage.public_url("u1/ab12-my cat.png", None),
            "http://glowy.test/media/u1/ab12-my%20cat.png"
        );
        assert_eq!(
            storage.public_url("u1/ab12-cat.png", Some("ab12-cat.png")),
            "http://glowy.test/media/u1/ab12-cat.png?download=ab12-cat.png"
        );
    }

    #[test]
    fn png_dimensions_are_read_from_ihdr() {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&[0, 0, 0, 13]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&640u32.to_be_bytes());
        png.extend_from_slice(&480u32.to_be_bytes());
        assert_eq!(probe_image_dimensions(&png), Some((640, 480)));
        assert_eq!(probe_image_dimensions(b"plain text"), None);
    }

    fn riff(chunk: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = b"RIFF\0\0\0\0WEBP".to_vec();
        out.extend_from_slice(chunk);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn webp_dimensions_from_each_chunk_kind() {
        let mut vp8x = vec![0u8; 10];
        vp8x[4..7].copy_from_slice(&999u32.to_le_bytes()[..3]);
        vp8x[7..10].copy_from_slice(&499u32.to_le_bytes()[..3]);
        assert_eq!(probe_image_dimensions(&riff(b"VP8X", &vp8x)), Some((1000, 500)));

        let bits: u32 = 299 | (199 << 14);
        let mut vp8l = vec![0x2F];
        vp8l.extend_from_slice(&bits.to_le_bytes());
        assert_eq!(probe_image_dimensions(&riff(b"VP8L", &vp8l)), Some((300, 200)));

        let mut vp8 = vec![0, 0, 0, 0x9D, 0x01, 0x2A];
        vp8.extend_from_slice(&64u16.to_le_bytes());
        vp8.extend_from_slice(&48u16.to_le_bytes());
        assert_eq!(probe_image_dimensions(&riff(b"VP8 ", &vp8)), Some((64, 48)));

        assert_eq!(probe_image_dimensions(&riff(b"VP8X", &[0u8; 4])), None);
    }

    #[test]
    fn jpeg_dimensions_skip_to_the_frame_header() {
        let mut jpeg = vec![0xFF, 0xD8];
        // APP0 with a 4-byte payload.
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x06, 1, 2, 3, 4]);
        // SOF0: length 11, precision 8, height 120, width 160, one component.
        jpeg.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x78, 0x00, 0xA0, 0x01, 0x01, 0x11, 0x00]);
        assert_eq!(probe_image_dimensions(&jpeg), Some((160, 120)));
    }

    #[tokio::test]
    async fn local_storage_round_trips_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path().join("media"), "http://glowy.test");
        let saved = storage.put("u1/ab12-cat.png", "image/png", b"meow").await.unwrap();
        assert_eq!(saved.key, "u1/ab12-cat.png");
        assert_eq!(saved.size, 4);
        assert_eq!(storage.load("u1/ab12-cat.png").await.unwrap(), b"meow");
        storage.delete("u1/ab12-cat.png").await.unwrap();
        assert!(storage.load("u1/ab12-cat.png").await.is_err());
    }
}
