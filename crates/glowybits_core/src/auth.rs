/*
 * SPDX-FileCopyrightText: 2026 GlowyBits Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use glowybits_protocol::{StatusMessage, UserInfo};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::AppError;
use crate::gateway::{AuthProvider, IssuedSession, NewUser, SignUpOutcome};
use crate::session::SessionContext;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub username: String,
    pub full_name: String,
    #[serde(default)]
    pub bio: Option<String>,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.username.trim().chars().count() < 3 {
            return Err(AppError::Validation(
                "Username must be at least 3 characters long".to_string(),
            ));
        }
        if self.full_name.trim().chars().count() < 3 {
            return Err(AppError::Validation("Enter your name".to_string()));
        }
        if !is_valid_email(&self.email) {
            return Err(AppError::Validation("Enter a valid email address".to_string()));
        }
        if self.password.chars().count() < 8 {
            return Err(AppError::Validation(
                "Password must be at least 8 characters long".to_string(),
            ));
        }
        Ok(())
    }

    fn into_new_user(self) -> NewUser {
        NewUser {
            email: self.email,
            password: self.password,
            username: self.username,
            full_name: self.full_name,
            bio: self.bio,
        }
    }
}

fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

pub struct LoginResult {
    pub status: StatusMessage,
    pub session: Option<IssuedSession>,
}

/// Sign-up / sign-in / sign-out, reported as status/message pairs for the
/// caller to show as a notice.
#[derive(Clone)]
pub struct AuthService {
    auth: Arc<dyn AuthProvider>,
}

impl AuthService {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Self {
        Self { auth }
    }

    pub async fn register(&self, form: RegisterForm) -> StatusMessage {
        if let Err(e) = form.validate() {
            return e.to_status_message();
        }
        let user = form.into_new_user();
        match self.auth.sign_up(&user).await {
            Ok(SignUpOutcome::Created(record)) => {
                info!(user_id = %record.id, "user registered");
                StatusMessage::new(200, "User registered successfully")
            }
            Ok(SignUpOutcome::AlreadyExists) => {
                StatusMessage::new(422, "Failed to register user, user already exists")
            }
            Err(e) => {
                error!("sign up failed: {e:#}");
                StatusMessage::new(500, "API error occured while trying to sign up.")
            }
        }
    }

    pub async fn login(&self, form: LoginForm) -> LoginResult {
        match self
            .auth
            .sign_in_with_password(&form.email, &form.password)
            .await
        {
            Ok(Some(session)) => {
                info!(user_id = %session.user.id, "login");
                LoginResult {
                    status: StatusMessage::new(200, "Login successful"),
                    session: Some(session),
                }
            }
            // Same notice for unknown email and wrong password.
            Ok(None) => LoginResult {
                status: StatusMessage::new(401, "Invalid Credentials"),
                session: None,
            },
            Err(e) => {
                error!("sign in failed: {e:#}");
                LoginResult {
                    status: StatusMessage::new(500, "API error occured while trying to sign in."),
                    session: None,
                }
            }
        }
    }

    pub async fn logout(&self, session: Option<&SessionContext>) -> StatusMessage {
        let Some(session) = session else {
            return StatusMessage::new(200, "Logged out");
        };
        match self.auth.sign_out(&session.token).await {
            Ok(()) => StatusMessage::new(200, "Logged out"),
            Err(e) => {
                error!("sign out failed: {e:#}");
                StatusMessage::new(500, "API error occured while trying to sign out")
            }
        }
    }

    pub fn current_user(&self, session: Option<&SessionContext>) -> Result<UserInfo, AppError> {
        let session = session.ok_or(AppError::Auth)?;
        Ok(UserInfo {
            id: session.user_id.clone(),
            email: session.email.clone(),
            username: session.username.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_db::GlowyDb;
    use std::time::Duration;

    fn service() -> (tempfile::TempDir, AuthService) {
        let dir = tempfile::tempdir().unwrap();
        let db = GlowyDb::open(dir.path().join("glowybits.db"), Duration::from_secs(3600)).unwrap();
        (dir, AuthService::new(Arc::new(db)))
    }

    fn register_form(email: &str) -> RegisterForm {
        RegisterForm {
            email: email.to_string(),
            password: "hunter2hunter2".to_string(),
            username: "glowy".to_string(),
            full_name: "Glowy Bits".to_string(),
            bio: None,
        }
    }

    #[test]
    fn register_form_rules() {
        assert!(register_form("a@b.co").validate().is_ok());
        assert!(register_form("not-an-email").validate().is_err());
        assert!(register_form("a@b").validate().is_err());

        let mut short = register_form("a@b.co");
        short.password = "1234567".to_string();
        assert!(short.validate().is_err());

        let mut short = register_form("a@b.co");
        short.username = "ab".to_string();
        assert!(short.validate().is_err());
    }

    #[tokio::test]
    async fn register_then_login_then_logout() {
        let (_dir, svc) = service();
        let first = svc.register(register_form("ana@example.com")).await;
        assert_eq!(first, StatusMessage::new(200, "User registered successfully"));
        let again = svc.register(register_form("ana@example.com")).await;
        assert_eq!(again.status, 422);

        let bad = svc
            .login(LoginForm {
                email: "ana@example.com".to_string(),
                password: "wrong-password".to_string(),
            })
            .await;
        assert_eq!(bad.status, StatusMessage::new(401, "Invalid Credentials"));
        assert!(bad.session.is_none());

        let ok = svc
            .login(LoginForm {
                email: "ana@example.com".to_string(),
                password: "hunter2hunter2".to_string(),
            })
            .await;
        assert_eq!(ok.status.message, "Login successful");
        let issued = ok.session.unwrap();
        let ctx = SessionContext::from_user(issued.user, issued.token);
        assert_eq!(svc.current_user(Some(&ctx)).unwrap().username, "glowy");
        assert!(svc.logout(Some(&ctx)).await.is_success());
    }

    #[test]
    fn anonymous_current_user_is_auth_error() {
        let (_dir, svc) = service();
        assert!(matches!(svc.current_user(None), Err(AppError::Auth)));
    }
}
