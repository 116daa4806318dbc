//! Admin JSON API routes
//!
//! Read-only summaries over the event and profile tables, plus the
//! simulated-attack generator and the plain-text export. Every aggregate
//! is computed fresh per request and degrades to empty/zero when its
//! query fails, so a broken table never takes down the whole dashboard.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::session::{require_user, BearerAuth};
use super::AppState;
use crate::db::{AttackEvent, AttackerProfile, CountryStat, NewCapture, ServiceStat, SeverityStat};
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub total_attacks: i64,
    pub unique_attackers: i64,
    pub recent_attacks: Vec<AttackEvent>,
    pub attack_types: Vec<ServiceStat>,
    pub country_stats: Vec<CountryStat>,
    pub severity_stats: Vec<SeverityStat>,
    pub latest_update: Option<DateTime<Utc>>,
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Json<DashboardResponse>, ApiError> {
    require_user(&state, auth).await?;

    let (total_attacks, unique_attackers, recent_attacks, attack_types, country_stats, severity_stats, latest_update) = tokio::join!(
        state.db.total_events(),
        state.db.total_profiles(),
        state.db.recent_events(20),
        state.db.service_stats(),
        state.db.country_stats(),
        state.db.severity_stats(),
        state.db.latest_event_at(),
    );

    Ok(Json(DashboardResponse {
        total_attacks: total_attacks.unwrap_or(0),
        unique_attackers: unique_attackers.unwrap_or(0),
        recent_attacks: recent_attacks.unwrap_or_default(),
        attack_types: attack_types.unwrap_or_default(),
        country_stats: country_stats.unwrap_or_default(),
        severity_stats: severity_stats.unwrap_or_default(),
        latest_update: latest_update.ok().flatten(),
    }))
}

pub async fn attackers(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Json<Vec<AttackerProfile>>, ApiError> {
    require_user(&state, auth).await?;
    Ok(Json(state.db.list_profiles().await?))
}

#[derive(Debug, Deserialize)]
pub struct AttacksQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub method: String,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct AttacksResponse {
    pub events: Vec<AttackEvent>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

pub async fn attacks(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    Query(query): Query<AttacksQuery>,
) -> Result<Json<AttacksResponse>, ApiError> {
    require_user(&state, auth).await?;

    let (events, total) = state
        .db
        .events_page(&query.ip, &query.method, query.page, query.per_page)
        .await?;

    Ok(Json(AttacksResponse {
        events,
        total,
        page: query.page.max(1),
        per_page: query.per_page.clamp(1, 200),
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_events: i64,
    pub total_attackers: i64,
    pub latest_event: Option<AttackEvent>,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Json<StatsResponse>, ApiError> {
    require_user(&state, auth).await?;

    let (total_events, total_attackers, latest) = tokio::join!(
        state.db.total_events(),
        state.db.total_profiles(),
        state.db.recent_events(1),
    );

    Ok(Json(StatsResponse {
        total_events: total_events.unwrap_or(0),
        total_attackers: total_attackers.unwrap_or(0),
        latest_event: latest.unwrap_or_default().into_iter().next(),
    }))
}

pub async fn map(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Json<Value>, ApiError> {
    require_user(&state, auth).await?;
    let attacks_by_country = state.db.country_stats().await.unwrap_or_default();
    Ok(Json(json!({ "attacks_by_country": attacks_by_country })))
}

/// Table names and row counts; a table whose count failed reports "N/A"
pub async fn database(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Json<Value>, ApiError> {
    require_user(&state, auth).await?;

    let tables: Vec<Value> = state
        .db
        .table_stats()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|table| {
            json!({
                "name": table.name,
                "rows": table.rows.map(Value::from).unwrap_or_else(|| json!("N/A")),
            })
        })
        .collect();

    Ok(Json(json!({ "tables": tables })))
}

pub async fn export_stats(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
) -> Result<Response, ApiError> {
    require_user(&state, auth).await?;

    let (total_events, total_attackers, by_country) = tokio::join!(
        state.db.total_events(),
        state.db.total_profiles(),
        state.db.country_stats(),
    );

    let now = Utc::now();
    let mut lines = vec![
        format!("Export Time: {}", now.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Total Events: {}", total_events.unwrap_or(0)),
        format!("Total Attackers: {}", total_attackers.unwrap_or(0)),
        "By Country:".to_string(),
    ];
    for stat in by_country.unwrap_or_default() {
        lines.push(format!("  {}: {}", stat.country, stat.count));
    }
    let content = lines.join("\n");

    let filename = now.format("stats-%Y%m%d-%H%M%S.txt");
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        content,
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct SimulateRequest {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub severity: Option<String>,
}

const SIMULATED_COUNTRIES: &[&str] = &["CN", "US", "RU", "IN", "DE", "FR", "GB", "BR", "JP", "KR"];
const SIMULATED_SEVERITIES: &[&str] = &["low", "medium", "high"];

/// Generate one synthetic attack through the regular ingestion path
pub async fn simulate_attack(
    State(state): State<Arc<AppState>>,
    auth: BearerAuth,
    body: Option<Json<SimulateRequest>>,
) -> Result<Json<Value>, ApiError> {
    require_user(&state, auth).await?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let (ip, country, severity) = {
        let mut rng = rand::thread_rng();
        let ip = request.ip.filter(|ip| !ip.is_empty()).unwrap_or_else(|| {
            format!(
                "192.168.{}.{}",
                rng.gen_range(0..=255),
                rng.gen_range(1..=254)
            )
        });
        let country = request
            .country
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| {
                SIMULATED_COUNTRIES
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or("US")
                    .to_string()
            });
        let severity = request
            .severity
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                SIMULATED_SEVERITIES
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or("low")
                    .to_string()
            });
        (ip, country, severity)
    };
    let user_agent = request
        .user_agent
        .filter(|ua| !ua.is_empty())
        .unwrap_or_else(|| "Mozilla/5.0 (Simulation)".to_string());

    let capture = NewCapture {
        ip_address: ip,
        user_agent: Some(user_agent.clone()),
        method: "GET".to_string(),
        path: "/honeypot".to_string(),
        headers: json!({ "User-Agent": user_agent }),
        payload: json!({ "simulated": true }),
        honeypot_service: "web".to_string(),
        signature: Some("sim-test".to_string()),
        severity,
    };

    let event_id = state.db.record_simulated(&capture, &country).await?;
    Ok(Json(json!({ "status": "ok", "event_id": event_id })))
}
