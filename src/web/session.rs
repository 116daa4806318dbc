//! Admin sessions, accounts, and settings
//!
//! Bearer-token sessions for the admin API. This trust domain is entirely
//! separate from the capture endpoint's HMAC scheme: a session token never
//! authorizes a capture, and a capture secret never opens a session.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{extract::State, Json};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::AppState;
use crate::db::User;
use crate::error::ApiError;

#[derive(Clone)]
struct Session {
    user_id: i64,
    expires_at: DateTime<Utc>,
}

/// In-process session store: opaque token -> user id with expiry
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, user_id: i64, ttl_minutes: i64) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id,
            expires_at: Utc::now() + chrono::Duration::minutes(ttl_minutes),
        };
        self.inner.write().await.insert(token.clone(), session);
        token
    }

    /// Explicit token -> user lookup; expired tokens are dropped on access
    pub async fn resolve(&self, token: &str) -> Option<i64> {
        let mut sessions = self.inner.write().await;
        match sessions.get(token) {
            Some(session) if session.expires_at > Utc::now() => Some(session.user_id),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub async fn revoke(&self, token: &str) {
        self.inner.write().await.remove(token);
    }

    pub async fn revoke_user(&self, user_id: i64) {
        self.inner
            .write()
            .await
            .retain(|_, session| session.user_id != user_id);
    }
}

pub type BearerAuth = Option<TypedHeader<Authorization<Bearer>>>;

/// Resolve the request's bearer token to a user, or fail with 401.
/// Handlers receive the authenticated user as an explicit value; nothing
/// reads ambient request state.
pub async fn require_user(state: &AppState, auth: BearerAuth) -> Result<User, ApiError> {
    let TypedHeader(Authorization(bearer)) = auth.ok_or(ApiError::Unauthenticated)?;
    let user_id = state
        .sessions
        .resolve(bearer.token())
        .await
        .ok_or(ApiError::Unauthenticated)?;
    state
        .db
        .find_user_by_id(user_id)
        .await?
        .ok_or(ApiError::Unauthenticated)
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .db
        .find_user_by_username(&request.username)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }

    let token = state
        .sessions
        .create(user.id, state.config.auth.session_ttl_minutes)
        .await;
    tracing::info!(username = %user.username, "admin login");

    Ok(Json(LoginResponse { token, user }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let username = request.username.trim();
    if username.len() < 4 || username.len() > 20 {
        return Err(ApiError::BadRequest(
            "username must be 4-20 characters".to_string(),
        ));
    }
    if request.password.len() < 6 {
        return Err(ApiError::BadRequest(
            "password must be at least 6 characters".to_string(),
        ));
    }

    if state.db.find_user_by_username(username).await?.is_some() {
        return Err(ApiError::AlreadyRegistered);
    }
    if let Some(email) = request.email.as_deref() {
        if state.db.find_user_by_email(email).await?.is_some() {
            return Err(ApiError::AlreadyRegistered);
        }
    }

    let password_hash = hash_password(&request.password)?;
    // Self-registered accounts are never admins
    let user_id = state
        .db
        .create_user(username, request.email.as_deref(), &password_hash, false)
        .await?;

    Ok(Json(json!({ "status": "ok", "user_id": user_id })))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Json<Value>, ApiError> {
    let TypedHeader(Authorization(bearer)) = auth.ok_or(ApiError::Unauthenticated)?;
    state.sessions.revoke(bearer.token()).await;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, auth).await?;

    if !verify_password(&request.old_password, &user.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }
    if request.new_password.len() < 6 {
        return Err(ApiError::BadRequest(
            "password must be at least 6 characters".to_string(),
        ));
    }

    let password_hash = hash_password(&request.new_password)?;
    state.db.update_password(user.id, &password_hash).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct NotificationsRequest {
    pub email_notifications: bool,
}

pub async fn update_notifications(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    Json(request): Json<NotificationsRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, auth).await?;
    state
        .db
        .update_notifications(user.id, request.email_notifications)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct ThemeRequest {
    #[serde(default = "default_theme")]
    pub theme: String,
}

fn default_theme() -> String {
    "light".to_string()
}

pub async fn toggle_theme(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    Json(request): Json<ThemeRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, auth).await?;
    state.db.update_theme(user.id, &request.theme).await?;
    Ok(Json(json!({ "status": "ok", "theme": request.theme })))
}

pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&state, auth).await?;
    state.sessions.revoke_user(user.id).await;
    state.db.delete_user(user.id).await?;
    Ok(Json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2-but-longer").unwrap();
        assert!(verify_password("hunter2-but-longer", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn garbage_stored_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn session_create_resolve_revoke() {
        let store = SessionStore::new();
        let token = store.create(7, 60).await;

        assert_eq!(store.resolve(&token).await, Some(7));

        store.revoke(&token).await;
        assert_eq!(store.resolve(&token).await, None);
    }

    #[tokio::test]
    async fn expired_sessions_do_not_resolve() {
        let store = SessionStore::new();
        let token = store.create(7, -1).await;
        assert_eq!(store.resolve(&token).await, None);
    }

    #[tokio::test]
    async fn revoke_user_drops_every_session() {
        let store = SessionStore::new();
        let first = store.create(7, 60).await;
        let second = store.create(7, 60).await;
        let other = store.create(8, 60).await;

        store.revoke_user(7).await;

        assert_eq!(store.resolve(&first).await, None);
        assert_eq!(store.resolve(&second).await, None);
        assert_eq!(store.resolve(&other).await, Some(8));
    }
}
