/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod auth;
pub mod config;
pub mod debounce;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod image_db;
pub mod interactions;
pub mod media_backend;
pub mod server;
pub mod session;
pub mod title;
pub mod upload;
