/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use glowybits_protocol::{Image, InteractionKind, InteractionState, ToggleAction, ToggleOutcome};
use rand::{rngs::OsRng, RngCore};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gateway::{
    AuthProvider, ImageStore, InteractionStore, IssuedSession, NewImage, NewUser, RangeQuery,
    SignUpOutcome, UserRecord,
};
use crate::interactions::plan_toggle;

const PASSWORD_ROUNDS: u32 = 10_000;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const IMAGE_COLUMNS: &str = "id, title, tags_json, url, metadata_json, is_private, is_deleted, owner_id, created_at_ms, updated_at_ms, storage_image_id";

/// SQLite-backed tables for images, interactions, users and sessions.
#[derive(Clone)]
pub struct GlowyDb {
    path: PathBuf,
    session_ttl_ms: i64,
}

impl GlowyDb {
    pub fn open(db_path: impl AsRef<Path>, session_ttl: Duration) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create db dir: {}", parent.display()))?;
            }
        }
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS users (
              id TEXT PRIMARY KEY,
              email TEXT NOT NULL UNIQUE,
              username TEXT NOT NULL,
              full_name TEXT NOT NULL,
              bio TEXT NULL,
              password_salt TEXT NOT NULL,
              password_hash TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
              token_sha256 TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

            -- seq gives the default (insertion) order used by range queries.
            CREATE TABLE IF NOT EXISTS images (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              id TEXT NOT NULL UNIQUE,
              title TEXT NOT NULL,
              tags_json TEXT NULL,
              url TEXT NOT NULL,
              metadata_json TEXT NOT NULL,
              is_private INTEGER NOT NULL DEFAULT 0,
              is_deleted INTEGER NOT NULL DEFAULT 0,
              owner_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              storage_image_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_images_owner ON images(owner_id, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS interactions (
              id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              image_id TEXT NOT NULL,
              interaction_type TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(user_id, image_id)
            );
            CREATE INDEX IF NOT EXISTS idx_interactions_image ON interactions(image_id);
            "#,
        )?;
        Ok(Self {
            path,
            session_ttl_ms: session_ttl.as_millis().min(i64::MAX as u128) as i64,
        })
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // SQLite's own lower() only folds ASCII.
        conn.create_scalar_function(
            "unicode_lower",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
        )?;
        Ok(conn)
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn select_images_range(&self, query: &RangeQuery) -> Result<Vec<Image>> {
        // Offsets SQLite cannot represent lie past any table's end.
        let Ok(offset) = i64::try_from(query.from) else {
            return Ok(Vec::new());
        };
        let limit = i64::try_from(query.limit()).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let like = query
            .title_ilike
            .as_deref()
            .map(|q| format!("%{}%", escape_like(&q.to_lowercase())));
        let sql = format!(
            r#"
            SELECT {IMAGE_COLUMNS} FROM images
            WHERE is_deleted=0
              AND (is_private=0 OR (?1 IS NOT NULL AND owner_id=?1))
              AND (?2 IS NULL OR unicode_lower(title) LIKE ?2 ESCAPE '\')
            ORDER BY seq ASC
            LIMIT ?3 OFFSET ?4
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                query.viewer_id,
                like,
                limit,
                offset
            ],
            map_image_row,
        )?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ImageRow::into_image).collect()
    }

    pub fn list_images_by_owner(&self, owner_id: &str) -> Result<Vec<Image>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE owner_id=?1 AND is_deleted=0 ORDER BY created_at_ms DESC, seq DESC"
        ))?;
        let rows = stmt.query_map(params![owner_id], map_image_row)?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ImageRow::into_image).collect()
    }

    pub fn get_image_by_id(&self, image_id: &str) -> Result<Option<Image>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id=?1"),
                params![image_id],
                map_image_row,
            )
            .optional()?;
        row.map(ImageRow::into_image).transpose()
    }

    pub fn get_image_by_path(&self, path: &str) -> Result<Option<Image>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {IMAGE_COLUMNS} FROM images WHERE json_extract(metadata_json, '$.path')=?1 ORDER BY seq DESC LIMIT 1"
                ),
                params![path],
                map_image_row,
            )
            .optional()?;
        row.map(ImageRow::into_image).transpose()
    }

    pub fn insert_image_row(&self, image: &NewImage) -> Result<Image> {
        let conn = self.conn()?;
        let id = new_id();
        let now = now_ms();
        let tags_json = image
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata_json = serde_json::to_string(&image.metadata)?;
        conn.execute(
            r#"
            INSERT INTO images(id, title, tags_json, url, metadata_json, is_private, is_deleted, owner_id, created_at_ms, updated_at_ms, storage_image_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?8, ?9)
            "#,
            params![
                id,
                image.title,
                tags_json,
                image.url,
                metadata_json,
                image.is_private as i64,
                image.owner_id,
                now,
                image.storage_image_id,
            ],
        )?;
        self.get_image_by_id(&id)?
            .context("inserted image row vanished")
    }

    /// Soft delete; the row stays but drops out of every listing.
    #[cfg(test)]
    pub fn mark_image_deleted(&self, image_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE images SET is_deleted=1, updated_at_ms=?2 WHERE id=?1",
            params![image_id, now_ms()],
        )?;
        Ok(n > 0)
    }

    pub fn toggle_interaction(
        &self,
        user_id: &str,
        image_id: &str,
        kind: InteractionKind,
    ) -> Result<ToggleOutcome> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock before the read, so two toggles for the
        // same pair can never both observe "no record".
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, interaction_type FROM interactions WHERE user_id=?1 AND image_id=?2",
                params![user_id, image_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let existing_kind = existing
            .as_ref()
            .map(|(_, ty)| ty.parse::<InteractionKind>())
            .transpose()?;

        let action = plan_toggle(existing_kind, kind);
        match action {
            ToggleAction::Insert => {
                tx.execute(
                    "INSERT INTO interactions(id, user_id, image_id, interaction_type, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![new_id(), user_id, image_id, kind.as_str(), now_ms()],
                )?;
            }
            ToggleAction::Delete | ToggleAction::Replace { .. } => {
                if let Some((id, _)) = &existing {
                    tx.execute("DELETE FROM interactions WHERE id=?1", params![id])?;
                }
                if matches!(action, ToggleAction::Replace { .. }) {
                    tx.execute(
                        "INSERT INTO interactions(id, user_id, image_id, interaction_type, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![new_id(), user_id, image_id, kind.as_str(), now_ms()],
                    )?;
                }
            }
        }
        tx.commit()?;

        let after = match action {
            ToggleAction::Delete => None,
            ToggleAction::Insert | ToggleAction::Replace { .. } => Some(kind),
        };
        Ok(ToggleOutcome {
            action,
            state: InteractionState::from_kind(after),
        })
    }

    pub fn get_interaction(&self, user_id: &str, image_id: &str) -> Result<Option<InteractionKind>> {
        let conn = self.conn()?;
        let ty: Option<String> = conn
            .query_row(
                "SELECT interaction_type FROM interactions WHERE user_id=?1 AND image_id=?2",
                params![user_id, image_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(ty.map(|t| t.parse::<InteractionKind>()).transpose()?)
    }

    #[cfg(test)]
    pub fn count_interactions(&self, image_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM interactions WHERE image_id=?1",
            params![image_id],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn create_user(&self, user: &NewUser) -> Result<SignUpOutcome> {
        let email = normalize_email(&user.email);
        let conn = self.conn()?;
        let salt = new_id();
        let hash = password_hash_hex(&salt, &user.password);
        let record = UserRecord {
            id: new_id(),
            email: email.clone(),
            username: user.username.trim().to_string(),
            full_name: user.full_name.trim().to_string(),
            bio: user
                .bio
                .as_ref()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty()),
        };
        let inserted = conn.execute(
            r#"
            INSERT INTO users(id, email, username, full_name, bio, password_salt, password_hash, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(email) DO NOTHING
            "#,
            params![
                record.id,
                record.email,
                record.username,
                record.full_name,
                record.bio,
                salt,
                hash,
                now_ms()
            ],
        )?;
        if inserted == 0 {
            return Ok(SignUpOutcome::AlreadyExists);
        }
        Ok(SignUpOutcome::Created(record))
    }

    pub fn create_session(&self, email: &str, password: &str) -> Result<Option<IssuedSession>> {
        let email = normalize_email(email);
        let conn = self.conn()?;
        let row: Option<(String, String, String, String, Option<String>, String, String)> = conn
            .query_row(
                "SELECT id, email, username, full_name, bio, password_salt, password_hash FROM users WHERE email=?1",
                params![email],
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, email, username, full_name, bio, salt, stored)) = row else {
            return Ok(None);
        };
        if !constant_time_eq(stored.as_bytes(), password_hash_hex(&salt, password).as_bytes()) {
            return Ok(None);
        }

        let token = new_token();
        let now = now_ms();
        let expires_at_ms = now.saturating_add(self.session_ttl_ms);
        conn.execute(
            "INSERT INTO sessions(token_sha256, user_id, created_at_ms, expires_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![token_hash_hex(&token), id, now, expires_at_ms],
        )?;
        Ok(Some(IssuedSession {
            token,
            user: UserRecord {
                id,
                email,
                username,
                full_name,
                bio,
            },
            expires_at_ms,
        }))
    }

    pub fn delete_session(&self, token: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM sessions WHERE token_sha256=?1",
            params![token_hash_hex(token)],
        )?;
        Ok(())
    }

    pub fn user_for_session(&self, token: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                r#"
                SELECT u.id, u.email, u.username, u.full_name, u.bio
                FROM sessions s JOIN users u ON u.id = s.user_id
                WHERE s.token_sha256=?1 AND s.expires_at_ms > ?2
                "#,
                params![token_hash_hex(token), now_ms()],
                |r| {
                    Ok(UserRecord {
                        id: r.get(0)?,
                        email: r.get(1)?,
                        username: r.get(2)?,
                        full_name: r.get(3)?,
                        bio: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn prune_expired_sessions(&self) -> Result<u64> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM sessions WHERE expires_at_ms <= ?1",
            params![now_ms()],
        )? as u64)
    }
}

async fn blocking<T, F>(db: &GlowyDb, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(GlowyDb) -> Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(db))
        .await
        .context("db task panicked")?
}

#[async_trait]
impl ImageStore for GlowyDb {
    async fn select_range(&self, query: &RangeQuery) -> Result<Vec<Image>> {
        let query = query.clone();
        blocking(self, move |db| db.select_images_range(&query)).await
    }

    async fn select_by_owner(&self, owner_id: &str) -> Result<Vec<Image>> {
        let owner_id = owner_id.to_string();
        blocking(self, move |db| db.list_images_by_owner(&owner_id)).await
    }

    async fn get_image(&self, image_id: &str) -> Result<Option<Image>> {
        let image_id = image_id.to_string();
        blocking(self, move |db| db.get_image_by_id(&image_id)).await
    }

    async fn find_by_storage_path(&self, path: &str) -> Result<Option<Image>> {
        let path = path.to_string();
        blocking(self, move |db| db.get_image_by_path(&path)).await
    }

    async fn insert_image(&self, image: NewImage) -> Result<Image> {
        blocking(self, move |db| db.insert_image_row(&image)).await
    }

    async fn health_check(&self) -> Result<()> {
        blocking(self, |db| GlowyDb::health_check(&db)).await
    }
}

#[async_trait]
impl InteractionStore for GlowyDb {
    async fn toggle(&self, user_id: &str, image_id: &str, kind: InteractionKind) -> Result<ToggleOutcome> {
        let (user_id, image_id) = (user_id.to_string(), image_id.to_string());
        blocking(self, move |db| db.toggle_interaction(&user_id, &image_id, kind)).await
    }

    async fn current(&self, user_id: &str, image_id: &str) -> Result<Option<InteractionKind>> {
        let (user_id, image_id) = (user_id.to_string(), image_id.to_string());
        blocking(self, move |db| db.get_interaction(&user_id, &image_id)).await
    }
}

#[async_trait]
impl AuthProvider for GlowyDb {
    async fn sign_up(&self, user: &NewUser) -> Result<SignUpOutcome> {
        let user = user.clone();
        blocking(self, move |db| db.create_user(&user)).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Option<IssuedSession>> {
        let (email, password) = (email.to_string(), password.to_string());
        blocking(self, move |db| db.create_session(&email, &password)).await
    }

    async fn sign_out(&self, token: &str) -> Result<()> {
        let token = token.to_string();
        blocking(self, move |db| db.delete_session(&token)).await
    }

    async fn get_user(&self, token: &str) -> Result<Option<UserRecord>> {
        let token = token.to_string();
        blocking(self, move |db| db.user_for_session(&token)).await
    }

    async fn prune_expired_sessions(&self) -> Result<u64> {
        blocking(self, |db| GlowyDb::prune_expired_sessions(&db)).await
    }
}

struct ImageRow {
    id: String,
    title: String,
    tags_json: Option<String>,
    url: String,
    metadata_json: String,
    is_private: bool,
    is_deleted: bool,
    owner_id: String,
    created_at_ms: i64,
    updated_at_ms: i64,
    storage_image_id: String,
}

fn map_image_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        id: r.get(0)?,
        title: r.get(1)?,
        tags_json: r.get(2)?,
        url: r.get(3)?,
        metadata_json: r.get(4)?,
        is_private: r.get::<_, i64>(5)? != 0,
        is_deleted: r.get::<_, i64>(6)? != 0,
        owner_id: r.get(7)?,
        created_at_ms: r.get(8)?,
        updated_at_ms: r.get(9)?,
        storage_image_id: r.get(10)?,
    })
}

impl ImageRow {
    fn into_image(self) -> Result<Image> {
        let tags = self
            .tags_json
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .with_context(|| format!("decode tags of image {}", self.id))?;
        let metadata = serde_json::from_str(&self.metadata_json)
            .with_context(|| format!("decode metadata of image {}", self.id))?;
        Ok(Image {
            id: self.id,
            title: self.title,
            tags,
            url: self.url,
            metadata,
            is_private: self.is_private,
            is_deleted: self.is_deleted,
            owner_id: self.owner_id,
            created_at: format_ms(self.created_at_ms)?,
            updated_at: format_ms(self.updated_at_ms)?,
            storage_image_id: self.storage_image_id,
        })
    }
}

fn format_ms(ms: i64) -> Result<String> {
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)?;
    Ok(ts.format(&time::format_description::well_known::Rfc3339)?)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn password_hash_hex(salt: &str, password: &str) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    for _ in 1..PASSWORD_ROUNDS {
        digest = Sha256::new()
            .chain_update(salt.as_bytes())
            .chain_update(digest)
            .finalize();
    }
    hex::encode(digest)
}

fn token_hash_hex(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn escape_like(input: &str) -> String {
    input.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn new_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

fn new_token() -> String {
    let mut b = [0u8; 32];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
