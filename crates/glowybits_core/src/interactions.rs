/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Like/favorite toggling. A user holds at most one reaction per image; the
//! two kinds are mutually exclusive.

use glowybits_protocol::{Image, InteractionKind, InteractionState, ToggleAction, ToggleOutcome};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::AppError;
use crate::gateway::{ImageStore, InteractionStore};
use crate::session::SessionContext;

const TOGGLE_FAILED: &str = "Failed to process interaction";

/// Three-way branch over the caller's existing reaction on an image.
pub fn plan_toggle(existing: Option<InteractionKind>, requested: InteractionKind) -> ToggleAction {
    match existing {
        None => ToggleAction::Insert,
        Some(kind) if kind == requested => ToggleAction::Delete,
        Some(from) => ToggleAction::Replace { from },
    }
}

#[derive(Clone)]
pub struct InteractionResolver {
    images: Arc<dyn ImageStore>,
    store: Arc<dyn InteractionStore>,
}

impl InteractionResolver {
    pub fn new(images: Arc<dyn ImageStore>, store: Arc<dyn InteractionStore>) -> Self {
        Self { images, store }
    }

    async fn visible_image(&self, session: &SessionContext, image_id: &str) -> Result<Image, AppError> {
        let image = self
            .images
            .get_image(image_id)
            .await
            .map_err(|e| AppError::backend(TOGGLE_FAILED, e))?
            .ok_or(AppError::NotFound)?;
        if !image.visible_to(Some(&session.user_id)) {
            return Err(AppError::NotFound);
        }
        Ok(image)
    }

    /// Applies the toggle and returns the state the UI should render.
    pub async fn toggle(
        &self,
        session: Option<&SessionContext>,
        image_id: &str,
        kind: InteractionKind,
    ) -> Result<ToggleOutcome, AppError> {
        let session = session.ok_or(AppError::Auth)?;
        let image = self.visible_image(session, image_id).await?;
        let outcome = self
            .store
            .toggle(&session.user_id, &image.id, kind)
            .await
            .map_err(|e| {
                error!(image_id = %image.id, user_id = %session.user_id, "toggle failed: {e:#}");
                AppError::backend(TOGGLE_FAILED, e)
            })?;
        debug!(image_id = %image.id, %kind, action = ?outcome.action, "interaction toggled");
        Ok(outcome)
    }

    /// Anonymous viewers always see an inactive state.
    pub async fn state(
        &self,
        session: Option<&SessionContext>,
        image_id: &str,
    ) -> Result<InteractionState, AppError> {
        let Some(session) = session else {
            return Ok(InteractionState::default());
        };
        let image = self.visible_image(session, image_id).await?;
        let kind = self
            .store
            .current(&session.user_id, &image.id)
            .await
            .map_err(|e| AppError::backend(TOGGLE_FAILED, e))?;
        Ok(InteractionState::from_kind(kind))
    }
}
