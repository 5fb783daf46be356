//! Gateway to the hosted (GoTrue-compatible) auth API, plus the role
//! lookup every authenticated request goes through.

use crate::config::{AppConfig, AuthConfig};
use crate::db::Database;
use crate::domain::{EmailAddress, MIN_PASSWORD_LEN, Password};
use crate::error::AppError;
use crate::types::{AuthUser, Roles};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Failure talking to the auth service.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The auth service answered with an error for this request.
    #[error("{0}")]
    Rejected(String),

    #[error("Auth service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Rejected(msg) => Self::Validation(msg),
            AuthError::Transport(e) => Self::Upstream(format!("Auth service unreachable: {e}")),
        }
    }
}

/// Tokens and user returned by a successful sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

/// Result of a sign-up: a session when the account is usable immediately,
/// otherwise the address must be confirmed first.
#[derive(Debug, Clone, Serialize)]
pub struct SignUpOutcome {
    pub session: Option<Session>,
    pub confirmation_required: bool,
}

/// Operations the hosted auth service provides.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The user a bearer token belongs to, `None` when the token is not valid.
    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError>;
    async fn sign_up(&self, email: &EmailAddress, password: &Password) -> Result<SignUpOutcome, AuthError>;
    async fn sign_in(&self, email: &EmailAddress, password: &Password) -> Result<Session, AuthError>;
    async fn sign_out(&self, token: &str) -> Result<(), AuthError>;
    async fn send_password_reset(&self, email: &EmailAddress, redirect_to: &str) -> Result<(), AuthError>;
    async fn update_password(&self, token: &str, password: &Password) -> Result<(), AuthError>;
}

/// REST client for the hosted auth API.
pub struct HostedAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl HostedAuth {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{}/auth/v1", config.url),
            anon_key: config.anon_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("apikey", &self.anon_key)
    }
}

/// Pull the human-readable message out of an auth error body.
fn error_message(status: StatusCode, body: &Value) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(ToString::to_string)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Auth request failed").to_string())
}

async fn checked(response: reqwest::Response) -> Result<Value, AuthError> {
    let status = response.status();
    let body = if status == StatusCode::NO_CONTENT {
        Value::Null
    } else {
        response.json::<Value>().await.unwrap_or(Value::Null)
    };
    if status.is_success() {
        Ok(body)
    } else {
        debug!(%status, "Auth service rejected request");
        Err(AuthError::Rejected(error_message(status, &body)))
    }
}

fn parse_session(body: Value) -> Result<Session, AuthError> {
    serde_json::from_value(body)
        .map_err(|e| AuthError::Rejected(format!("Unexpected auth response: {e}")))
}

#[async_trait]
impl AuthBackend for HostedAuth {
    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        let response = self
            .request(reqwest::Method::GET, "/user")
            .bearer_auth(token)
            .send()
            .await?;
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Ok(None);
        }
        let body = checked(response).await?;
        Ok(serde_json::from_value(body).ok())
    }

    async fn sign_up(&self, email: &EmailAddress, password: &Password) -> Result<SignUpOutcome, AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/signup")
            .json(&json!({ "email": email.as_str(), "password": password.as_str() }))
            .send()
            .await?;
        let body = checked(response).await?;
        if body.get("access_token").is_some() {
            Ok(SignUpOutcome {
                session: Some(parse_session(body)?),
                confirmation_required: false,
            })
        } else {
            Ok(SignUpOutcome {
                session: None,
                confirmation_required: true,
            })
        }
    }

    async fn sign_in(&self, email: &EmailAddress, password: &Password) -> Result<Session, AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/token?grant_type=password")
            .json(&json!({ "email": email.as_str(), "password": password.as_str() }))
            .send()
            .await?;
        parse_session(checked(response).await?)
    }

    async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/logout")
            .bearer_auth(token)
            .send()
            .await?;
        checked(response).await.map(|_| ())
    }

    async fn send_password_reset(&self, email: &EmailAddress, redirect_to: &str) -> Result<(), AuthError> {
        let response = self
            .request(reqwest::Method::POST, "/recover")
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email.as_str() }))
            .send()
            .await?;
        checked(response).await.map(|_| ())
    }

    async fn update_password(&self, token: &str, password: &Password) -> Result<(), AuthError> {
        let response = self
            .request(reqwest::Method::PUT, "/user")
            .bearer_auth(token)
            .json(&json!({ "password": password.as_str() }))
            .send()
            .await?;
        checked(response).await.map(|_| ())
    }
}

fn parse_email(input: &str) -> Result<EmailAddress, AppError> {
    EmailAddress::parse(input).ok_or_else(|| AppError::validation("Please enter a valid email address"))
}

fn parse_password(input: &str, what: &str) -> Result<Password, AppError> {
    Password::parse(input).ok_or_else(|| {
        AppError::validation(format!("{what} must be at least {MIN_PASSWORD_LEN} characters"))
    })
}

#[instrument(skip(backend, password, confirm))]
pub async fn sign_up(
    backend: &dyn AuthBackend,
    email: &str,
    password: &str,
    confirm: &str,
) -> Result<SignUpOutcome, AppError> {
    let email = parse_email(email)?;
    if password != confirm {
        return Err(AppError::validation("Passwords do not match"));
    }
    let password = parse_password(password, "Password")?;
    Ok(backend.sign_up(&email, &password).await?)
}

#[instrument(skip(backend, password))]
pub async fn sign_in(backend: &dyn AuthBackend, email: &str, password: &str) -> Result<Session, AppError> {
    let email = parse_email(email)?;
    let password = Password::parse(password).ok_or_else(|| AppError::validation("Invalid login credentials"))?;
    Ok(backend.sign_in(&email, &password).await?)
}

/// Ask the auth service to mail a reset link pointing back at this site.
#[instrument(skip(backend))]
pub async fn request_password_reset(backend: &dyn AuthBackend, site_url: &str, email: &str) -> Result<(), AppError> {
    let email = parse_email(email)?;
    let redirect_to = format!("{site_url}/update-password");
    Ok(backend.send_password_reset(&email, &redirect_to).await?)
}

/// Set a new password for the session's user. With `old_password` the
/// current password is verified first by signing in with it.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    backend: &dyn AuthBackend,
    token: &str,
    user: &AuthUser,
    old_password: Option<&str>,
    new_password: &str,
    confirm: &str,
) -> Result<(), AppError> {
    if new_password != confirm {
        return Err(AppError::validation(if old_password.is_some() {
            "New passwords do not match"
        } else {
            "Passwords do not match"
        }));
    }
    let label = if old_password.is_some() { "New password" } else { "Password" };
    let new_password = parse_password(new_password, label)?;

    if let Some(old) = old_password {
        if old == new_password.as_str() {
            return Err(AppError::validation("New password must be different from old password"));
        }
        let email = user
            .normalized_email()
            .and_then(|e| EmailAddress::parse(&e))
            .ok_or_else(|| AppError::validation("Current password is incorrect"))?;
        let old = Password::parse(old).ok_or_else(|| AppError::validation("Current password is incorrect"))?;
        if let Err(e) = backend.sign_in(&email, &old).await {
            return Err(match e {
                AuthError::Rejected(_) => AppError::validation("Current password is incorrect"),
                other => other.into(),
            });
        }
    }
    Ok(backend.update_password(token, &new_password).await?)
}

/// Roles for a caller. A failed admin lookup means "not admin".
pub async fn resolve_roles(db: &Database, config: &AppConfig, user: &AuthUser) -> Roles {
    let Some(email) = user.normalized_email() else {
        return Roles::default();
    };
    if config.is_super_admin(&email) {
        return Roles {
            is_admin: true,
            is_super_admin: true,
        };
    }
    let is_admin = match db.is_admin_email(&email).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "Admin lookup failed");
            false
        }
    };
    Roles {
        is_admin,
        is_super_admin: false,
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::types::UserId;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-process auth backend. Tokens are `token-<email>`.
    #[derive(Default)]
    pub struct FakeAuth {
        pub passwords: Mutex<HashMap<String, String>>,
        pub resets: Mutex<Vec<(String, String)>>,
    }

    impl FakeAuth {
        pub fn with_user(email: &str, password: &str) -> Self {
            let fake = Self::default();
            fake.passwords
                .lock()
                .unwrap()
                .insert(email.to_string(), password.to_string());
            fake
        }

        pub fn user(email: &str) -> AuthUser {
            AuthUser {
                id: UserId::new(format!("uid-{email}")),
                email: Some(email.to_string()),
            }
        }

        pub fn token(email: &str) -> String {
            format!("token-{email}")
        }
    }

    #[async_trait]
    impl AuthBackend for FakeAuth {
        async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
            Ok(token.strip_prefix("token-").map(Self::user))
        }

        async fn sign_up(&self, email: &EmailAddress, password: &Password) -> Result<SignUpOutcome, AuthError> {
            let mut passwords = self.passwords.lock().unwrap();
            if passwords.contains_key(email.as_str()) {
                return Err(AuthError::Rejected("User already registered".to_string()));
            }
            passwords.insert(email.to_string(), password.as_str().to_string());
            Ok(SignUpOutcome {
                session: None,
                confirmation_required: true,
            })
        }

        async fn sign_in(&self, email: &EmailAddress, password: &Password) -> Result<Session, AuthError> {
            let passwords = self.passwords.lock().unwrap();
            match passwords.get(email.as_str()) {
                Some(stored) if stored == password.as_str() => Ok(Session {
                    access_token: Self::token(email.as_str()),
                    refresh_token: None,
                    expires_in: Some(3600),
                    user: Self::user(email.as_str()),
                }),
                _ => Err(AuthError::Rejected("Invalid login credentials".to_string())),
            }
        }

        async fn sign_out(&self, _token: &str) -> Result<(), AuthError> {
            Ok(())
        }

        async fn send_password_reset(&self, email: &EmailAddress, redirect_to: &str) -> Result<(), AuthError> {
            self.resets
                .lock()
                .unwrap()
                .push((email.to_string(), redirect_to.to_string()));
            Ok(())
        }

        async fn update_password(&self, token: &str, password: &Password) -> Result<(), AuthError> {
            let email = token
                .strip_prefix("token-")
                .ok_or_else(|| AuthError::Rejected("Invalid token".to_string()))?;
            self.passwords
                .lock()
                .unwrap()
                .insert(email.to_string(), password.as_str().to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAuth;
    use super::*;
    use crate::config::test_config;

    #[tokio::test]
    async fn sign_up_validates_before_calling_out() {
        let auth = FakeAuth::default();
        let err = sign_up(&auth, "op@example.my", "secret1", "secret2").await.unwrap_err();
        assert_eq!(err.to_string(), "Passwords do not match");

        let err = sign_up(&auth, "op@example.my", "12345", "12345").await.unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 6 characters");

        let err = sign_up(&auth, "not-an-email", "secret1", "secret1").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(auth.passwords.lock().unwrap().is_empty());

        let outcome = sign_up(&auth, "Op@Example.my", "secret1", "secret1").await.unwrap();
        assert!(outcome.confirmation_required);
        assert!(auth.passwords.lock().unwrap().contains_key("op@example.my"));
    }

    #[tokio::test]
    async fn change_password_checks_old_one() {
        let auth = FakeAuth::with_user("op@example.my", "oldpass");
        let user = FakeAuth::user("op@example.my");
        let token = FakeAuth::token("op@example.my");

        let err = change_password(&auth, &token, &user, Some("oldpass"), "oldpass", "oldpass")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "New password must be different from old password");

        let err = change_password(&auth, &token, &user, Some("wrongpw"), "newpass", "newpass")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Current password is incorrect");

        let err = change_password(&auth, &token, &user, Some("oldpass"), "newpass", "newpasz")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "New passwords do not match");

        change_password(&auth, &token, &user, Some("oldpass"), "newpass", "newpass")
            .await
            .unwrap();
        assert_eq!(auth.passwords.lock().unwrap()["op@example.my"], "newpass");
    }

    #[tokio::test]
    async fn reset_link_points_at_site() {
        let auth = FakeAuth::default();
        request_password_reset(&auth, "https://callbook.hamradio.my", "op@example.my")
            .await
            .unwrap();
        let resets = auth.resets.lock().unwrap();
        assert_eq!(resets[0].1, "https://callbook.hamradio.my/update-password");
    }

    #[tokio::test]
    async fn roles_from_allow_list_and_table() {
        let db = Database::in_memory().await.unwrap();
        let config = test_config();

        let root = resolve_roles(&db, &config, &FakeAuth::user("ROOT@hamradio.my")).await;
        assert!(root.is_admin && root.is_super_admin);

        let member = FakeAuth::user("op@example.my");
        assert_eq!(resolve_roles(&db, &config, &member).await, Roles::default());

        db.add_admin("op@example.my", Some("root@hamradio.my")).await.unwrap();
        let admin = resolve_roles(&db, &config, &member).await;
        assert!(admin.is_admin && !admin.is_super_admin);

        db.close().await;
        assert_eq!(resolve_roles(&db, &config, &member).await, Roles::default());
    }

    #[test]
    fn error_bodies() {
        let body = json!({"error": "invalid_grant", "error_description": "Invalid login credentials"});
        assert_eq!(error_message(StatusCode::BAD_REQUEST, &body), "Invalid login credentials");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, &Value::Null), "Bad Gateway");
    }
}
