/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed number of images per feed page.
pub const PAGE_SIZE: u64 = 10;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Image {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub url: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub is_private: bool,
    pub is_deleted: bool,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub storage_image_id: String,
}

impl Image {
    /// Storage key recorded at upload time, used to build download URLs.
    pub fn storage_path(&self) -> Option<&str> {
        self.metadata.get("path").and_then(|v| v.as_str())
    }

    /// Deleted images are visible to nobody, private ones only to their owner.
    pub fn visible_to(&self, viewer_id: Option<&str>) -> bool {
        !self.is_deleted && (!self.is_private || viewer_id == Some(self.owner_id.as_str()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Like,
    Favorite,
}

impl InteractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Like => "like",
            InteractionKind::Favorite => "favorite",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownInteractionKind(pub String);

impl fmt::Display for UnknownInteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown interaction kind: {}", self.0)
    }
}

impl std::error::Error for UnknownInteractionKind {}

impl FromStr for InteractionKind {
    type Err = UnknownInteractionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" => Ok(InteractionKind::Like),
            "favorite" => Ok(InteractionKind::Favorite),
            other => Err(UnknownInteractionKind(other.to_string())),
        }
    }
}

/// What the toggle did to the (user, image) reaction record.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToggleAction {
    Insert,
    Delete,
    Replace { from: InteractionKind },
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionState {
    pub liked: bool,
    pub favorited: bool,
}

impl InteractionState {
    pub fn from_kind(kind: Option<InteractionKind>) -> Self {
        Self {
            liked: kind == Some(InteractionKind::Like),
            favorited: kind == Some(InteractionKind::Favorite),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    #[serde(flatten)]
    pub action: ToggleAction,
    pub state: InteractionState,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedState {
    /// At least one image on this page.
    Results,
    /// A non-empty search matched nothing.
    NoResults { query: String },
    /// The unfiltered feed has no images at all.
    Empty,
    /// A later page came back empty.
    EndOfFeed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeedPage {
    pub images: Vec<Image>,
    pub current_cursor: u64,
    pub next_cursor: Option<u64>,
    pub state: FeedState,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub status: u16,
    pub message: String,
}

impl StatusMessage {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadReceipt {
    pub status: u16,
    pub key: String,
    pub image: Image,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub username: String,
}
