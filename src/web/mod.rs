//! Web server module

pub mod capture;
pub mod ratelimit;
pub mod routes;
pub mod session;

use anyhow::Result;
use axum::{
    http::HeaderMap,
    routing::{delete, get, post},
    Router,
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::Config;
use crate::db::Database;

pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub sessions: session::SessionStore,
}

/// Client address used for admission control and profile keying: the
/// first X-Forwarded-For entry when a proxy set one, else the peer
/// address.
pub(crate) fn client_ip(headers: &HeaderMap, fallback_ip: &str) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(ips) = forwarded.to_str() {
            if let Some(first_ip) = ips.split(',').next() {
                let ip = first_ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }
    fallback_ip.to_string()
}

/// The complete route table. Every (method, path) -> handler binding in
/// the application is registered here, at startup.
pub fn build_router(state: Arc<AppState>) -> Router {
    let quota = |per_minute: u32| NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);

    // Sensor-facing capture API: HMAC trust domain, per-IP admission cap
    let capture_api = Router::new()
        .route("/api/capture", post(capture::capture))
        .route_layer(ratelimit::RateLimitLayer::new(quota(
            state.config.capture.rate_limit_per_minute,
        )))
        .layer(CorsLayer::permissive());

    let login_api = Router::new()
        .route("/login", post(session::login))
        .route_layer(ratelimit::RateLimitLayer::new(quota(
            state.config.auth.login_rate_limit_per_minute,
        )));

    let register_api = Router::new()
        .route("/register", post(session::register))
        .route_layer(ratelimit::RateLimitLayer::new(quota(
            state.config.auth.register_rate_limit_per_minute,
        )));

    // Session trust domain: admin read surface and account settings
    let admin_api = Router::new()
        .route("/logout", post(session::logout))
        .route("/admin/api/dashboard", get(routes::dashboard))
        .route("/admin/api/attackers", get(routes::attackers))
        .route("/admin/api/attacks", get(routes::attacks))
        .route("/admin/api/stats", get(routes::stats))
        .route("/admin/api/map", get(routes::map))
        .route("/admin/api/database", get(routes::database))
        .route("/admin/api/export", get(routes::export_stats))
        .route("/admin/api/simulate", post(routes::simulate_attack))
        .route(
            "/admin/api/settings/password",
            post(session::change_password),
        )
        .route(
            "/admin/api/settings/notifications",
            post(session::update_notifications),
        )
        .route("/admin/api/settings/theme", post(session::toggle_theme))
        .route("/admin/api/settings/account", delete(session::delete_account));

    Router::new()
        .merge(capture_api)
        .merge(login_api)
        .merge(register_api)
        .merge(admin_api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: &Config, db: Database) -> Result<()> {
    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        sessions: session::SessionStore::new(),
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Admin API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) async fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            db: Database::open_in_memory().await.unwrap(),
            config: crate::config::test_config(),
            sessions: session::SessionStore::new(),
        })
    }

    pub(crate) fn test_app(state: Arc<AppState>) -> Router {
        build_router(state)
    }

    /// Seed an admin user and an open session for it
    pub(crate) async fn admin_token(state: &Arc<AppState>) -> String {
        let hash = session::hash_password("correct-horse").unwrap();
        let user_id = state
            .db
            .create_user("admin", None, &hash, true)
            .await
            .unwrap();
        state.sessions.create(user_id, 60).await
    }

    pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{body_json, test_app, test_state};
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, "127.0.0.1"), "203.0.113.9");
    }

    #[test]
    fn client_ip_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, "127.0.0.1"), "127.0.0.1");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "  ".parse::<axum::http::HeaderValue>().unwrap());
        assert_eq!(client_ip(&headers, "127.0.0.1"), "127.0.0.1");
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn register_login_logout_flow() {
        let state = test_state().await;
        let app = test_app(state.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/register",
                r#"{"username":"operator","email":"op@example.com","password":"swordfish"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Wrong password first
        let response = app
            .clone()
            .oneshot(post_json(
                "/login",
                r#"{"username":"operator","password":"wrong"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(post_json(
                "/login",
                r#"{"username":"operator","password":"swordfish"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["user"]["username"], "operator");
        assert_eq!(body["user"]["is_admin"], false);
        assert!(body["user"].get("password_hash").is_none());

        // The token opens the admin surface
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/api/stats")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Revoked token no longer resolves
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/api/stats")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let state = test_state().await;
        let app = test_app(state);

        let body = r#"{"username":"operator","password":"swordfish"}"#;
        let response = app.clone().oneshot(post_json("/register", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(post_json("/register", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn short_usernames_and_passwords_are_rejected() {
        let state = test_state().await;
        let app = test_app(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/register",
                r#"{"username":"ab","password":"swordfish"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_json(
                "/register",
                r#"{"username":"operator","password":"abc"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn settings_update_theme_and_password() {
        let state = test_state().await;
        let token = super::testutil::admin_token(&state).await;
        let app = test_app(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/admin/api/settings/theme")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"theme":"dark"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let user = state.db.find_user_by_username("admin").await.unwrap().unwrap();
        assert_eq!(user.theme_preference, "dark");

        // Password change requires the current password
        let request = Request::builder()
            .method("POST")
            .uri("/admin/api/settings/password")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"old_password":"wrong","new_password":"new-password"}"#,
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("POST")
            .uri("/admin/api/settings/password")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"old_password":"correct-horse","new_password":"new-password"}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let user = state.db.find_user_by_username("admin").await.unwrap().unwrap();
        assert!(session::verify_password("new-password", &user.password_hash));
    }

    #[tokio::test]
    async fn delete_account_removes_user_and_sessions() {
        let state = test_state().await;
        let token = super::testutil::admin_token(&state).await;
        let app = test_app(state.clone());

        let request = Request::builder()
            .method("DELETE")
            .uri("/admin/api/settings/account")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(state
            .db
            .find_user_by_username("admin")
            .await
            .unwrap()
            .is_none());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/api/stats")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
