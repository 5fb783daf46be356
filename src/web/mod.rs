use crate::config::AppConfig;
use crate::db::Database;
use crate::realtime::RealtimeHub;
use crate::services::auth::AuthBackend;
use crate::services::reminder::Dispatchers;
use axum::Router;
use axum::routing::{delete, get, post, put};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod auth;
mod handlers;

/// Services shared by every request.
pub struct WebState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub auth: Arc<dyn AuthBackend>,
    pub hub: RealtimeHub,
    pub dispatch: Dispatchers,
}

/// Run the directory API until `shutdown` fires.
pub async fn run_server(state: Arc<WebState>, shutdown: CancellationToken) {
    let config = state.config.clone();
    let app = build_router(state, &config.web.root_path);

    let addr_str = format!("{}:{}", config.web.web_app_host, config.web.web_app_port);
    info!(addr = %addr_str, "Web server listening");

    let addr: SocketAddr = match addr_str.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, addr = %addr_str, "Invalid listen address");
            return;
        }
    };

    if config.web.web_app_ssl_enabled {
        if let Err(e) = serve_https(&config, addr, addr_str.clone(), app, shutdown.clone()).await {
            error!(error = %e, "HTTPS server failed");
        }
        return;
    }

    if let Err(e) = serve_http(addr_str, app, shutdown).await {
        error!(error = %e, "HTTP server failed");
    }
}

fn build_router(state: Arc<WebState>, root_path: &str) -> Router {
    let app = Router::new()
        .route(
            "/api/callsigns",
            get(handlers::list_callsigns).post(handlers::create_callsign),
        )
        .route("/api/callsigns/mine", get(handlers::my_callsigns))
        .route(
            "/api/callsigns/{id}",
            put(handlers::update_callsign).delete(handlers::delete_callsign),
        )
        .route("/api/stats", get(handlers::public_stats))
        .route(
            "/api/visits",
            get(handlers::visit_count).post(handlers::increment_visit),
        )
        .route("/api/presence/online", get(handlers::online_count))
        .route("/api/session", get(handlers::session))
        .route("/api/auth/signup", post(handlers::sign_up))
        .route("/api/auth/signin", post(handlers::sign_in))
        .route("/api/auth/signout", post(handlers::sign_out))
        .route("/api/auth/reset", post(handlers::reset_password))
        .route("/api/auth/password", post(handlers::update_password))
        .route(
            "/api/admins",
            get(handlers::list_admins).post(handlers::add_admin),
        )
        .route("/api/admins/{email}", delete(handlers::remove_admin))
        .route(
            "/api/donators",
            get(handlers::list_donators).post(handlers::grant_donator),
        )
        .route("/api/donators/{callsign_id}", delete(handlers::revoke_donator))
        .route(
            "/api/donators/lookup/{callsign}",
            get(handlers::lookup_callsign),
        )
        .route("/realtime/{channel}", get(handlers::realtime_stream))
        .route("/functions/license-reminder", post(handlers::license_reminder))
        .route("/functions/test-notification", post(handlers::test_notification))
        .with_state(state);

    if !root_path.is_empty() && root_path != "/" {
        Router::new().nest(root_path, app)
    } else {
        app
    }
}

async fn serve_http(addr_str: String, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr_str)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener on {addr_str}: {e}"))?;

    let shutdown_wait = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_wait.cancelled().await;
    })
    .await
    .map_err(|e| anyhow::anyhow!("HTTP server failed: {e}"))
}

async fn serve_https(
    config: &AppConfig,
    addr: SocketAddr,
    addr_str: String,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let cert_path = config.web.web_app_ssl_cert_path.clone().unwrap_or_default();
    let key_path = config.web.web_app_ssl_key_path.clone().unwrap_or_default();
    if cert_path.is_empty() || key_path.is_empty() {
        warn!(
            cert_path = %cert_path,
            key_path = %key_path,
            "Web SSL enabled but cert/key paths are missing. Falling back to HTTP"
        );
        return serve_http(addr_str, app, shutdown).await;
    }

    let tls_config = match RustlsConfig::from_pem_file(cert_path, key_path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "Failed to load TLS config. Falling back to HTTP");
            return serve_http(addr_str, app, shutdown).await;
        }
    };

    let shutdown_wait = shutdown.clone();
    tokio::select! {
        res = axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>()) => {
            res.map_err(|e| anyhow::anyhow!("HTTPS server failed: {e}"))
        }
        () = shutdown_wait.cancelled() => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::db::testing::record;
    use crate::services::auth::fake::FakeAuth;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn state_with(config: AppConfig) -> Arc<WebState> {
        Arc::new(WebState {
            config: Arc::new(config),
            db: Database::in_memory().await.unwrap(),
            auth: Arc::new(FakeAuth::with_user("op@example.my", "secret123")),
            hub: RealtimeHub::new(),
            dispatch: Dispatchers::default(),
        })
    }

    async fn call(
        state: &Arc<WebState>,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = build_router(state.clone(), "/")
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn listing_is_public_and_paged() {
        let state = state_with(test_config()).await;
        for (callsign, added) in [("9M2AAA", "2026-10-01"), ("9W2BBB", "2026-10-02")] {
            state
                .db
                .insert_callsign(&record(callsign, added, "2026-10-02 10:00:00"))
                .await
                .unwrap();
        }

        let (status, body) = call(&state, Method::GET, "/api/callsigns?class=B", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], 0);
        assert_eq!(body["has_more"], false);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["callsign"], "9W2BBB");

        let (status, body) = call(&state, Method::GET, "/api/callsigns?class=Z", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid class: Z");
    }

    #[tokio::test]
    async fn writes_need_a_session() {
        let state = state_with(test_config()).await;
        let input = json!({ "callsign": "9m2pju", "name": "Piju" });

        let (status, body) = call(&state, Method::POST, "/api/callsigns", None, Some(input.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let token = FakeAuth::token("op@example.my");
        let (status, body) = call(&state, Method::POST, "/api/callsigns", Some(&token), Some(input.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["callsign"], "9M2PJU");

        let (status, _) = call(&state, Method::POST, "/api/callsigns", Some(&token), Some(input)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&state, Method::GET, "/api/callsigns/mine", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, session) = call(&state, Method::GET, "/api/session", Some(&token), None).await;
        assert_eq!(session["identity"], "9M2PJU");
        assert_eq!(session["roles"]["is_admin"], false);
    }

    #[tokio::test]
    async fn admin_routes_check_roles() {
        let state = state_with(test_config()).await;
        let member = FakeAuth::token("op@example.my");
        let root = FakeAuth::token("root@hamradio.my");

        let (status, _) = call(&state, Method::GET, "/api/admins", Some(&member), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/admins",
            Some(&root),
            Some(json!({ "email": "Op@Example.my" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "op@example.my");

        let (status, _) = call(&state, Method::GET, "/api/donators", Some(&member), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn sign_in_and_session() {
        let state = state_with(test_config()).await;
        let (status, body) = call(
            &state,
            Method::POST,
            "/api/auth/signin",
            None,
            Some(json!({ "email": "op@example.my", "password": "secret123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["access_token"].as_str().unwrap().to_string();

        let (_, session) = call(&state, Method::GET, "/api/session", Some(&token), None).await;
        assert_eq!(session["identity"], "op");

        let (_, anonymous) = call(&state, Method::GET, "/api/session", None, None).await;
        assert_eq!(anonymous["user"], Value::Null);

        let (status, _) = call(
            &state,
            Method::POST,
            "/api/auth/signup",
            None,
            Some(json!({ "email": "new@example.my", "password": "abcdef", "confirm_password": "abcxyz" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_and_visits() {
        let state = state_with(test_config()).await;
        let (status, body) = call(&state, Method::POST, "/api/visits", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        let (_, body) = call(&state, Method::GET, "/api/visits", None, None).await;
        assert_eq!(body["total"], 1);

        let (_, body) = call(&state, Method::GET, "/api/stats", None, None).await;
        assert_eq!(body["total"], 0);
        let (_, body) = call(&state, Method::GET, "/api/presence/online", None, None).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn reminder_trigger() {
        let mut config = test_config();
        config.reminders.trigger_token = Some("cron-secret".to_string());
        let state = state_with(config).await;

        let (status, _) = call(&state, Method::POST, "/functions/license-reminder", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Email is on but no mailer is wired.
        let (status, body) = call(
            &state,
            Method::POST,
            "/functions/license-reminder",
            Some("cron-secret"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "RESEND_API_KEY is not configured");

        let (status, body) = call(
            &state,
            Method::POST,
            "/functions/test-notification",
            None,
            Some(json!({ "chat_id": "12345" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "TELEGRAM_BOT_TOKEN is not configured");
    }

    #[tokio::test]
    async fn unknown_realtime_channel() {
        let state = state_with(test_config()).await;
        let (status, _) = call(&state, Method::GET, "/realtime/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&state, Method::GET, "/realtime/global_presence", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
