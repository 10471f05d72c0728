/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use glowybits_protocol::StatusMessage;
use thiserror::Error;

/// Reasons the upload intake refuses a file before it reaches storage.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("Please select a valid image file")]
    InvalidType,
    #[error("File size must be less than 10MB")]
    TooLarge,
    #[error("Please select an image to upload")]
    Empty,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("User not authenticated")]
    Auth,

    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("{message}")]
    Backend {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn backend(message: &'static str, source: anyhow::Error) -> Self {
        AppError::Backend { message, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth => StatusCode::UNAUTHORIZED,
            AppError::Rejected(_) | AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_status_message(&self) -> StatusMessage {
        StatusMessage::new(self.status().as_u16(), self.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Backend { source, .. } = &self {
            tracing::error!("backend failure: {source:#}");
        }
        (self.status(), Json(self.to_status_message())).into_response()
    }
}
