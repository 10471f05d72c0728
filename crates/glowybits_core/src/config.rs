/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media_backend::MediaConfig;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_KEY_TOKEN_HEX_LEN: usize = 16;
pub const LEGACY_KEY_TOKEN_HEX_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct GlowyConfig {
    pub bind: SocketAddr,
    pub public_base_url: String,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub max_body_bytes: usize,
    pub max_upload_bytes: u64,
    pub key_token_hex_len: usize,
    pub session_ttl_secs: u64,
    pub session_prune_interval_secs: u64,
    pub secure_cookies: bool,
    pub http_timeout_secs: u64,
    pub media: MediaConfig,
}

/// Optional JSON overlay; every field left out keeps its env/default value.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub bind: Option<String>,
    pub public_base_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub max_body_bytes: Option<usize>,
    pub max_upload_bytes: Option<u64>,
    pub key_token_hex_len: Option<usize>,
    pub session_ttl_secs: Option<u64>,
    pub session_prune_interval_secs: Option<u64>,
    pub secure_cookies: Option<bool>,
    pub media: Option<MediaConfig>,
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("GLOWYBITS_DATA_DIR") {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    let proj = ProjectDirs::from("net", "glowybits", "GlowyBits")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|v| v.parse::<T>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl GlowyConfig {
    pub fn from_env() -> Result<Self> {
        let bind = env_str("GLOWYBITS_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let bind: SocketAddr = bind
            .parse()
            .with_context(|| format!("GLOWYBITS_BIND invalid: {bind}"))?;
        let public_base_url = env_str("GLOWYBITS_PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{bind}"))
            .trim_end_matches('/')
            .to_string();
        let data_dir = default_data_dir()?;
        let db_path = env_str("GLOWYBITS_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("glowybits.db"));
        let max_upload_bytes = env_parse::<u64>("GLOWYBITS_MAX_UPLOAD_BYTES")
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
            .max(1);
        // Multipart framing needs headroom above the raw file ceiling.
        let max_body_bytes = env_parse::<usize>("GLOWYBITS_MAX_BODY_BYTES")
            .unwrap_or(max_upload_bytes as usize + 1024 * 1024);
        let key_token_hex_len = env_parse::<usize>("GLOWYBITS_KEY_TOKEN_HEX_LEN")
            .unwrap_or(DEFAULT_KEY_TOKEN_HEX_LEN)
            .clamp(LEGACY_KEY_TOKEN_HEX_LEN, 64);
        let session_ttl_secs = env_parse::<u64>("GLOWYBITS_SESSION_TTL_SECS")
            .unwrap_or(7 * 24 * 3600)
            .clamp(60, 365 * 24 * 3600);
        let session_prune_interval_secs = env_parse::<u64>("GLOWYBITS_SESSION_PRUNE_INTERVAL_SECS")
            .unwrap_or(3600)
            .clamp(60, 24 * 3600);
        let secure_cookies = env_bool("GLOWYBITS_SECURE_COOKIES").unwrap_or(false);
        let http_timeout_secs = env_parse::<u64>("GLOWYBITS_HTTP_TIMEOUT_SECS")
            .unwrap_or(30)
            .clamp(5, 120);

        let media = MediaConfig {
            backend: env_str("GLOWYBITS_MEDIA_BACKEND").unwrap_or_else(|| "local".to_string()),
            local_dir: env_str("GLOWYBITS_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("media")),
            public_url_base: env_str("GLOWYBITS_MEDIA_PUBLIC_URL_BASE"),
            webdav_base_url: env_str("GLOWYBITS_MEDIA_WEBDAV_BASE_URL"),
            webdav_username: env_str("GLOWYBITS_MEDIA_WEBDAV_USERNAME"),
            webdav_password: env_str("GLOWYBITS_MEDIA_WEBDAV_PASSWORD"),
            webdav_bearer_token: env_str("GLOWYBITS_MEDIA_WEBDAV_BEARER_TOKEN"),
            s3_region: env_str("GLOWYBITS_MEDIA_S3_REGION"),
            s3_bucket: env_str("GLOWYBITS_MEDIA_S3_BUCKET"),
            s3_endpoint: env_str("GLOWYBITS_MEDIA_S3_ENDPOINT"),
            s3_access_key: env_str("GLOWYBITS_MEDIA_S3_ACCESS_KEY"),
            s3_secret_key: env_str("GLOWYBITS_MEDIA_S3_SECRET_KEY"),
            s3_path_style: env_bool("GLOWYBITS_MEDIA_S3_PATH_STYLE").unwrap_or(false),
        };

        Ok(Self {
            bind,
            public_base_url,
            data_dir,
            db_path,
            max_body_bytes,
            max_upload_bytes,
            key_token_hex_len,
            session_ttl_secs,
            session_prune_interval_secs,
            secure_cookies,
            http_timeout_secs,
            media,
        })
    }

    /// Environment first, then the JSON file at `path` on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::from_env()?;
        if let Some(path) = path {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            let file: ConfigFile = serde_json::from_str(&text).context("parse config json")?;
            cfg.apply(file)?;
        }
        Ok(cfg)
    }

    pub fn apply(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(bind) = file.bind {
            self.bind = bind
                .parse()
                .with_context(|| format!("config bind invalid: {bind}"))?;
        }
        if let Some(v) = file.public_base_url {
            self.public_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.max_body_bytes {
            self.max_body_bytes = v;
        }
        if let Some(v) = file.max_upload_bytes {
            self.max_upload_bytes = v.max(1);
        }
        if let Some(v) = file.key_token_hex_len {
            self.key_token_hex_len = v.clamp(LEGACY_KEY_TOKEN_HEX_LEN, 64);
        }
        if let Some(v) = file.session_ttl_secs {
            self.session_ttl_secs = v.clamp(60, 365 * 24 * 3600);
        }
        if let Some(v) = file.session_prune_interval_secs {
            self.session_prune_interval_secs = v.clamp(60, 24 * 3600);
        }
        if let Some(v) = file.secure_cookies {
            self.secure_cookies = v;
        }
        if let Some(v) = file.media {
            self.media = v;
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_prune_interval(&self) -> Duration {
        Duration::from_secs(self.session_prune_interval_secs)
    }

    /// Config rooted in `dir`, local media, ephemeral bind. Used by tests and the dev client.
    pub fn for_data_dir(dir: &Path) -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            data_dir: dir.to_path_buf(),
            db_path: dir.join("glowybits.db"),
            max_body_bytes: DEFAULT_MAX_UPLOAD_BYTES as usize + 1024 * 1024,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            key_token_hex_len: DEFAULT_KEY_TOKEN_HEX_LEN,
            session_ttl_secs: 7 * 24 * 3600,
            session_prune_interval_secs: 3600,
            secure_cookies: false,
            http_timeout_secs: 30,
            media: MediaConfig::local(dir.join("media")),
        }
    }
}
