/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Offset-paged image feed with optional title search.
//!
//! Retrieval fails soft: a backend error is logged and reported as an empty
//! last page, exactly like the true end of the feed.

use glowybits_protocol::{FeedPage, FeedState, Image, PAGE_SIZE};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::AppError;
use crate::gateway::{ImageStore, RangeQuery};
use crate::session::SessionContext;

/// Largest cursor the store can address; anything beyond is an empty last page.
pub const MAX_CURSOR: u64 = i64::MAX as u64;

/// Trimmed search term, `None` when blank.
pub fn normalize_search(search: Option<&str>) -> Option<&str> {
    search.map(str::trim).filter(|s| !s.is_empty())
}

pub fn feed_state(len: usize, cursor: u64, search: Option<&str>) -> FeedState {
    match (len, cursor, search) {
        (n, _, _) if n > 0 => FeedState::Results,
        (_, 0, Some(q)) => FeedState::NoResults {
            query: q.to_string(),
        },
        (_, 0, None) => FeedState::Empty,
        _ => FeedState::EndOfFeed,
    }
}

#[derive(Clone)]
pub struct FeedEngine {
    images: Arc<dyn ImageStore>,
}

impl FeedEngine {
    pub fn new(images: Arc<dyn ImageStore>) -> Self {
        Self { images }
    }

    pub async fn fetch_page(
        &self,
        viewer: Option<&SessionContext>,
        cursor: u64,
        search: Option<&str>,
    ) -> FeedPage {
        let search = normalize_search(search);
        if cursor > MAX_CURSOR {
            debug!(cursor, "cursor past the addressable range");
            return FeedPage {
                images: Vec::new(),
                current_cursor: cursor,
                next_cursor: None,
                state: feed_state(0, cursor, search),
            };
        }
        let query = RangeQuery {
            from: cursor,
            to: cursor.saturating_add(PAGE_SIZE - 1),
            title_ilike: search.map(str::to_string),
            viewer_id: viewer.map(|s| s.user_id.clone()),
        };
        let mut images = match self.images.select_range(&query).await {
            Ok(images) => images,
            Err(e) => {
                error!(cursor, query = ?search, "feed fetch failed: {e:#}");
                Vec::new()
            }
        };
        images.truncate(PAGE_SIZE as usize);

        let next_cursor = (images.len() as u64 == PAGE_SIZE)
            .then(|| cursor.checked_add(PAGE_SIZE))
            .flatten()
            .filter(|next| *next <= MAX_CURSOR);
        let state = feed_state(images.len(), cursor, search);
        debug!(cursor, count = images.len(), ?next_cursor, "feed page");
        FeedPage {
            images,
            current_cursor: cursor,
            next_cursor,
            state,
        }
    }

    /// The session user's own images, newest first.
    pub async fn user_images(&self, session: Option<&SessionContext>) -> Result<Vec<Image>, AppError> {
        let session = session.ok_or(AppError::Auth)?;
        match self.images.select_by_owner(&session.user_id).await {
            Ok(images) => Ok(images),
            Err(e) => {
                error!(user_id = %session.user_id, "user images fetch failed: {e:#}");
                Ok(Vec::new())
            }
        }
    }
}

/// Handle for one issued page request. Completions carrying a ticket from
/// before the last `reset` are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub cursor: u64,
    generation: u64,
}

/// Client-side aggregation of feed pages for infinite scrolling.
#[derive(Debug, Default)]
pub struct InfiniteFeed {
    query: Option<String>,
    pages: BTreeMap<u64, FeedPage>,
    in_flight: HashSet<u64>,
    generation: u64,
}

impl InfiniteFeed {
    pub fn new(query: Option<&str>) -> Self {
        Self {
            query: normalize_search(query).map(str::to_string),
            ..Self::default()
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Cursor the sentinel should request next, `None` once the last loaded
    /// page said there is nothing more.
    pub fn next_cursor(&self) -> Option<u64> {
        match self.pages.last_key_value() {
            None => Some(0),
            Some((_, page)) => page.next_cursor,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_cursor().is_none()
    }

    /// Registers a request for `cursor`; `None` if it is already loaded or in flight.
    pub fn begin(&mut self, cursor: u64) -> Option<FetchTicket> {
        if self.pages.contains_key(&cursor) || !self.in_flight.insert(cursor) {
            return None;
        }
        Some(FetchTicket {
            cursor,
            generation: self.generation,
        })
    }

    /// Stores a finished page. Returns `false` for stale tickets.
    pub fn complete(&mut self, ticket: FetchTicket, page: FeedPage) -> bool {
        if ticket.generation != self.generation {
            return false;
        }
        self.in_flight.remove(&ticket.cursor);
        self.pages.insert(ticket.cursor, page);
        true
    }

    /// Frees the cursor so it can be requested again.
    pub fn abandon(&mut self, ticket: FetchTicket) {
        if ticket.generation == self.generation {
            self.in_flight.remove(&ticket.cursor);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Loaded images in cursor order, regardless of completion order.
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.pages.values().flat_map(|p| p.images.iter())
    }

    /// State of the first page, if loaded.
    pub fn state(&self) -> Option<&FeedState> {
        self.pages.get(&0).map(|p| &p.state)
    }

    /// Drops every page when the search term changes; same term is a no-op.
    pub fn reset(&mut self, query: Option<&str>) -> bool {
        let query = normalize_search(query).map(str::to_string);
        if query == self.query {
            return false;
        }
        self.query = query;
        self.pages.clear();
        self.in_flight.clear();
        self.generation += 1;
        true
    }
}
