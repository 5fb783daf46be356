use super::WebState;
use crate::error::AppError;
use crate::services::auth::resolve_roles;
use crate::services::callsigns::Actor;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::sync::Arc;
use tracing::debug;

/// Bearer token from the `Authorization` header, or from an
/// `access_token` query parameter (EventSource cannot set headers).
pub fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
        && !token.trim().is_empty()
    {
        return Some(token.trim().to_string());
    }
    parts.uri.query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("access_token=")
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
        })
    })
}

/// Authenticated caller with resolved roles. Rejects with 401.
pub struct CurrentUser {
    pub actor: Actor,
    pub token: String,
}

impl FromRequestParts<Arc<WebState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<WebState>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;
        let user = state
            .auth
            .user_for_token(&token)
            .await?
            .ok_or(AppError::Unauthorized)?;
        let roles = resolve_roles(&state.db, &state.config, &user).await;
        debug!(user_id = %user.id, ?roles, "Authenticated request");
        Ok(Self {
            actor: Actor { user, roles },
            token,
        })
    }
}

/// Like [`CurrentUser`] but anonymous requests pass through as `None`.
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<Arc<WebState>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<WebState>) -> Result<Self, Self::Rejection> {
        if bearer_token(parts).is_none() {
            return Ok(Self(None));
        }
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(Self(Some(user))),
            Err(AppError::Unauthorized) => Ok(Self(None)),
            Err(e) => Err(e),
        }
    }
}
