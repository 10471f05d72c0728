/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Request-scoped session context.
//!
//! The HTTP layer resolves the caller once and passes the result into every
//! operation; nothing below this module talks to the auth provider on its own.

use anyhow::Result;
use axum::http::HeaderMap;

use crate::gateway::{AuthProvider, UserRecord};

pub const SESSION_COOKIE: &str = "glowybits_session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub token: String,
}

impl SessionContext {
    pub fn from_user(user: UserRecord, token: String) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            username: user.username,
            token,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    let token = auth.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Bearer header wins over the cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| cookie_token(headers))
}

/// `Ok(None)` for anonymous callers and for unknown or expired tokens.
pub async fn resolve_session(
    auth: &dyn AuthProvider,
    headers: &HeaderMap,
) -> Result<Option<SessionContext>> {
    let Some(token) = session_token(headers) else {
        return Ok(None);
    };
    Ok(auth
        .get_user(&token)
        .await?
        .map(|user| SessionContext::from_user(user, token)))
}

pub fn session_cookie(token: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}
