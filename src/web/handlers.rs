use super::WebState;
use super::auth::{CurrentUser, MaybeUser};
use crate::directory::{Page, fetch_page};
use crate::domain::filters::{ContactFilter, FilterState, Filters, RecencyWindow};
use crate::domain::license::{LicenseClass, LicenseStatus};
use crate::domain::regions::normalize_state;
use crate::error::{AppError, AppResult};
use crate::notify::test_message;
use crate::realtime::{GLOBAL_CHANNEL, Notification, ONLINE_CHANNEL, PresenceMeta};
use crate::services::callsigns::{self, CallsignInput};
use crate::services::reminder;
use crate::services::{admin, auth, stats};
use crate::types::{CallsignId, UserId};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListParams {
    pub page: u32,
    pub search: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub class: Option<String>,
    pub status: Option<String>,
    pub recent: Option<String>,
    pub contact: Option<String>,
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl ListParams {
    fn filter_state(&self) -> AppResult<FilterState> {
        let bad = |what: &str, value: &str| AppError::validation(format!("Invalid {what}: {value}"));
        let state = non_blank(self.state.as_ref())
            .map(|s| normalize_state(s).map(ToString::to_string).ok_or_else(|| bad("state", s)))
            .transpose()?;
        let filters = Filters {
            state,
            district: non_blank(self.district.as_ref()).map(ToString::to_string),
            license_class: non_blank(self.class.as_ref())
                .map(|c| LicenseClass::parse(c).ok_or_else(|| bad("class", c)))
                .transpose()?,
            license_status: non_blank(self.status.as_ref())
                .map(|s| LicenseStatus::parse(s).ok_or_else(|| bad("status", s)))
                .transpose()?,
            recent: non_blank(self.recent.as_ref())
                .map(|r| RecencyWindow::from_days(r).ok_or_else(|| bad("recent", r)))
                .transpose()?,
            contact: non_blank(self.contact.as_ref())
                .map(|c| ContactFilter::parse(c).ok_or_else(|| bad("contact", c)))
                .transpose()?,
        };
        Ok(FilterState {
            search: self.search.clone().unwrap_or_default(),
            filters,
        })
    }
}

pub async fn list_callsigns(
    State(state): State<Arc<WebState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Page>> {
    let filter = params.filter_state()?;
    let today = Utc::now().date_naive();
    let page = fetch_page(
        &state.db,
        &filter,
        params.page,
        state.config.directory.page_size,
        today,
    )
    .await?;
    Ok(Json(page))
}

pub async fn my_callsigns(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
) -> AppResult<impl IntoResponse> {
    let records = callsigns::mine(&state.db, &user.actor).await?;
    Ok(Json(records))
}

pub async fn create_callsign(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Json(input): Json<CallsignInput>,
) -> AppResult<impl IntoResponse> {
    let today = Utc::now().date_naive();
    let record = callsigns::create(&state.db, &state.hub, &user.actor, &input, today).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update_callsign(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<CallsignInput>,
) -> AppResult<impl IntoResponse> {
    let record = callsigns::update(
        &state.db,
        &state.hub,
        &user.actor,
        &CallsignId::new(id),
        &input,
    )
    .await?;
    Ok(Json(record))
}

pub async fn delete_callsign(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    callsigns::delete(&state.db, &state.hub, &user.actor, &CallsignId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn public_stats(State(state): State<Arc<WebState>>) -> AppResult<impl IntoResponse> {
    let today = Utc::now().date_naive();
    Ok(Json(stats::public_stats(&state.db, today).await?))
}

pub async fn increment_visit(State(state): State<Arc<WebState>>) -> AppResult<impl IntoResponse> {
    let total = state.db.increment_visit().await?;
    Ok(Json(json!({ "total": total })))
}

pub async fn visit_count(State(state): State<Arc<WebState>>) -> AppResult<impl IntoResponse> {
    let total = state.db.visit_count().await?;
    Ok(Json(json!({ "total": total })))
}

pub async fn online_count(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    Json(json!({ "count": stats::online_count(&state.hub) }))
}

pub async fn session(State(state): State<Arc<WebState>>, MaybeUser(user): MaybeUser) -> impl IntoResponse {
    match user {
        Some(user) => {
            let identity = callsigns::identity(&state.db, &user.actor.user).await;
            Json(json!({
                "user": user.actor.user,
                "roles": user.actor.roles,
                "identity": identity,
            }))
        }
        None => Json(json!({ "user": null })),
    }
}

#[derive(Debug, Deserialize)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

pub async fn sign_up(State(state): State<Arc<WebState>>, Json(form): Json<SignUpForm>) -> AppResult<impl IntoResponse> {
    let outcome = auth::sign_up(
        state.auth.as_ref(),
        &form.email,
        &form.password,
        &form.confirm_password,
    )
    .await?;
    let message = if outcome.confirmation_required {
        Some("Registration successful! Please check your email for the confirmation link.")
    } else {
        None
    };
    Ok(Json(json!({ "session": outcome.session, "message": message })))
}

#[derive(Debug, Deserialize)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

pub async fn sign_in(State(state): State<Arc<WebState>>, Json(form): Json<SignInForm>) -> AppResult<impl IntoResponse> {
    let session = auth::sign_in(state.auth.as_ref(), &form.email, &form.password).await?;
    Ok(Json(session))
}

pub async fn sign_out(State(state): State<Arc<WebState>>, user: CurrentUser) -> AppResult<StatusCode> {
    state
        .auth
        .sign_out(&user.token)
        .await
        .map_err(AppError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ResetForm {
    pub email: String,
}

pub async fn reset_password(State(state): State<Arc<WebState>>, Json(form): Json<ResetForm>) -> AppResult<impl IntoResponse> {
    auth::request_password_reset(state.auth.as_ref(), &state.config.site_url, &form.email).await?;
    Ok(Json(json!({ "message": "Check your email for the password reset link" })))
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    pub old_password: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

pub async fn update_password(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Json(form): Json<PasswordForm>,
) -> AppResult<impl IntoResponse> {
    auth::change_password(
        state.auth.as_ref(),
        &user.token,
        &user.actor.user,
        form.old_password.as_deref(),
        &form.password,
        &form.confirm_password,
    )
    .await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_admins(State(state): State<Arc<WebState>>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    Ok(Json(admin::list_admins(&state.db, &user.actor).await?))
}

#[derive(Debug, Deserialize)]
pub struct AdminForm {
    pub email: String,
}

pub async fn add_admin(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Json(form): Json<AdminForm>,
) -> AppResult<impl IntoResponse> {
    let email = admin::add_admin(&state.db, &user.actor, &form.email).await?;
    Ok((StatusCode::CREATED, Json(json!({ "email": email }))))
}

pub async fn remove_admin(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Path(email): Path<String>,
) -> AppResult<StatusCode> {
    admin::remove_admin(&state.db, &user.actor, &email).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_donators(State(state): State<Arc<WebState>>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    Ok(Json(admin::list_donators(&state.db, &user.actor).await?))
}

pub async fn lookup_callsign(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Path(callsign): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(admin::find_callsign(&state.db, &user.actor, &callsign).await?))
}

#[derive(Debug, Deserialize)]
pub struct DonatorForm {
    pub callsign_id: String,
    pub note: Option<String>,
}

pub async fn grant_donator(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Json(form): Json<DonatorForm>,
) -> AppResult<StatusCode> {
    admin::grant_donator(
        &state.db,
        &user.actor,
        &CallsignId::new(form.callsign_id),
        form.note.as_deref(),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_donator(
    State(state): State<Arc<WebState>>,
    user: CurrentUser,
    Path(callsign_id): Path<String>,
) -> AppResult<StatusCode> {
    admin::revoke_donator(&state.db, &user.actor, &CallsignId::new(callsign_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StreamParams {
    pub visitor_id: Option<String>,
}

/// Server-sent notification stream for a realtime channel.
pub async fn realtime_stream(
    State(state): State<Arc<WebState>>,
    Path(channel): Path<String>,
    Query(params): Query<StreamParams>,
    MaybeUser(user): MaybeUser,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let connection = match channel.as_str() {
        GLOBAL_CHANNEL => {
            let user = user.ok_or(AppError::Unauthorized)?;
            let identity = callsigns::identity(&state.db, &user.actor.user).await;
            let user_id = user.actor.user.id;
            let mut connection = state
                .hub
                .connect(GLOBAL_CHANNEL, user_id.as_str(), Some(user_id.clone()));
            connection.subscribe();
            connection.track(PresenceMeta {
                user_id,
                callsign: identity,
                online_at: Utc::now(),
            });
            connection
        }
        ONLINE_CHANNEL => {
            let visitor = params
                .visitor_id
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| format!("anon-{}", uuid::Uuid::new_v4()));
            let visitor_id = UserId::new(visitor.clone());
            let mut connection = state
                .hub
                .connect(ONLINE_CHANNEL, visitor, Some(visitor_id.clone()));
            connection.subscribe();
            connection.track(PresenceMeta {
                user_id: visitor_id,
                callsign: String::new(),
                online_at: Utc::now(),
            });
            connection
        }
        other => return Err(AppError::not_found(format!("Unknown channel: {other}"))),
    };
    info!(key = %connection.key(), %channel, "Realtime stream opened");

    let stream = futures::stream::unfold(connection, |mut connection| async move {
        let Some(event) = connection.recv().await else {
            connection.unsubscribe();
            return None;
        };
        let payload = json!({
            "event": event,
            "notification": Notification::from(&event),
        });
        let sse = Event::default().event("realtime").data(payload.to_string());
        Some((Ok(sse), connection))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn trigger_authorized(state: &WebState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.config.reminders.trigger_token.as_deref() else {
        return true;
    };
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected)
}

/// Reminder sweep trigger. Fatal errors answer 500 with `success: false`.
pub async fn license_reminder(State(state): State<Arc<WebState>>, headers: HeaderMap) -> Response {
    if !trigger_authorized(&state, &headers) {
        return AppError::Unauthorized.into_response();
    }
    let today = Utc::now().date_naive();
    match reminder::run(&state.db, &state.config, &state.dispatch, today).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, "Reminder sweep failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TestNotificationForm {
    pub chat_id: String,
}

pub async fn test_notification(
    State(state): State<Arc<WebState>>,
    Json(form): Json<TestNotificationForm>,
) -> AppResult<impl IntoResponse> {
    let chat_id = form.chat_id.trim();
    if chat_id.is_empty() {
        return Err(AppError::validation("chat_id is required"));
    }
    let Some(chat) = state.dispatch.chat.as_deref() else {
        return Err(AppError::Upstream("TELEGRAM_BOT_TOKEN is not configured".to_string()));
    };
    if let Err(e) = chat.send_html(chat_id, &test_message(&state.config.site_url)).await {
        warn!(error = %e, "Test notification failed");
        return Err(AppError::Upstream(e.to_string()));
    }
    Ok(Json(json!({ "success": true })))
}
