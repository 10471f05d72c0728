/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Backend Client Gateway: the seams between request orchestration and the
//! services that actually hold data (tables, object storage, auth).

use anyhow::Result;
use async_trait::async_trait;
use glowybits_protocol::{Image, InteractionKind, ToggleOutcome};
use std::sync::Arc;

use crate::media_backend::ObjectStorage;

/// Inclusive offset range plus optional case-insensitive title filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub from: u64,
    pub to: u64,
    /// Already trimmed and non-empty when present.
    pub title_ilike: Option<String>,
    /// Owner allowed to see their own private images.
    pub viewer_id: Option<String>,
}

impl RangeQuery {
    pub fn limit(&self) -> u64 {
        self.to.saturating_sub(self.from).saturating_add(1)
    }
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub title: String,
    pub tags: Option<Vec<String>>,
    pub url: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub is_private: bool,
    pub owner_id: String,
    pub storage_image_id: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub username: String,
    pub full_name: String,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub bio: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub user: UserRecord,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    Created(UserRecord),
    AlreadyExists,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// `select * from images [where title ilike %term%] range(from, to)`.
    async fn select_range(&self, query: &RangeQuery) -> Result<Vec<Image>>;
    async fn select_by_owner(&self, owner_id: &str) -> Result<Vec<Image>>;
    async fn get_image(&self, image_id: &str) -> Result<Option<Image>>;
    /// Image whose stored object lives at `path`.
    async fn find_by_storage_path(&self, path: &str) -> Result<Option<Image>>;
    async fn insert_image(&self, image: NewImage) -> Result<Image>;
    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Atomic conditional write keyed by `(user_id, image_id)`.
    async fn toggle(&self, user_id: &str, image_id: &str, kind: InteractionKind) -> Result<ToggleOutcome>;
    async fn current(&self, user_id: &str, image_id: &str) -> Result<Option<InteractionKind>>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, user: &NewUser) -> Result<SignUpOutcome>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Option<IssuedSession>>;
    async fn sign_out(&self, token: &str) -> Result<()>;
    async fn get_user(&self, token: &str) -> Result<Option<UserRecord>>;
    /// Drops expired sessions, returning how many went.
    async fn prune_expired_sessions(&self) -> Result<u64>;
}

/// Configured handle to every external collaborator.
#[derive(Clone)]
pub struct Backend {
    pub images: Arc<dyn ImageStore>,
    pub interactions: Arc<dyn InteractionStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub storage: Arc<dyn ObjectStorage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_limit_is_inclusive() {
        let q = RangeQuery {
            from: 10,
            to: 19,
            title_ilike: None,
            viewer_id: None,
        };
        assert_eq!(q.limit(), 10);
    }
}
