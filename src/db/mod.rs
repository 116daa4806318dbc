//! Database module
//!
//! Explicit repository functions over three tables: users,
//! attacker_profiles, attack_events. Timestamps are stored as epoch
//! milliseconds; header maps, payloads, and tags as JSON text.

mod schema;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite, SqliteConnection, SqlitePool};

use crate::config::DatabaseConfig;

/// Aggregated metadata about one source IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackerProfile {
    pub id: i64,
    pub ip_address: String,
    pub user_agent: String,
    pub asn: Option<String>,
    pub isp: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub tags: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// One captured attack, append-only once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackEvent {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub method: String,
    pub path: String,
    pub headers: serde_json::Value,
    pub payload: serde_json::Value,
    pub honeypot_service: String,
    pub signature: Option<String>,
    pub severity: String,
    pub attacker_id: i64,
}

/// Administrator account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub email_notifications: bool,
    pub theme_preference: String,
    pub created_at: DateTime<Utc>,
}

/// A validated capture request, ready to be persisted
#[derive(Debug, Clone)]
pub struct NewCapture {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub headers: serde_json::Value,
    pub payload: serde_json::Value,
    pub honeypot_service: String,
    pub signature: Option<String>,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStat {
    pub service: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeverityStat {
    pub severity: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryStat {
    pub country: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStat {
    pub name: String,
    /// None when the count query failed; rendered as "N/A"
    pub rows: Option<i64>,
}

fn ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

fn parse_json(text: Option<String>) -> serde_json::Value {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or(serde_json::Value::Null)
}

type ProfileRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

const PROFILE_COLUMNS: &str =
    "id, ip_address, user_agent, asn, isp, country, city, tags, first_seen, last_seen";

impl From<ProfileRow> for AttackerProfile {
    fn from(
        (id, ip_address, user_agent, asn, isp, country, city, tags, first_seen, last_seen): ProfileRow,
    ) -> Self {
        AttackerProfile {
            id,
            ip_address,
            user_agent,
            asn,
            isp,
            country,
            city,
            tags: tags
                .and_then(|t| serde_json::from_str(&t).ok())
                .unwrap_or_default(),
            first_seen: ts(first_seen),
            last_seen: ts(last_seen),
        }
    }
}

type EventRow = (
    i64,
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
    i64,
);

const EVENT_COLUMNS: &str = "id, timestamp, ip_address, method, path, headers, payload, \
                             honeypot_service, signature, severity, attacker_id";

impl From<EventRow> for AttackEvent {
    fn from(
        (id, timestamp, ip_address, method, path, headers, payload, honeypot_service, signature, severity, attacker_id): EventRow,
    ) -> Self {
        AttackEvent {
            id: Some(id),
            timestamp: ts(timestamp),
            ip_address,
            method,
            path,
            headers: parse_json(headers),
            payload: parse_json(payload),
            honeypot_service,
            signature,
            severity,
            attacker_id,
        }
    }
}

type UserRow = (
    i64,
    String,
    Option<String>,
    String,
    bool,
    bool,
    String,
    i64,
);

const USER_COLUMNS: &str = "id, username, email, password_hash, is_admin, email_notifications, \
                            theme_preference, created_at";

impl From<UserRow> for User {
    fn from(
        (id, username, email, password_hash, is_admin, email_notifications, theme_preference, created_at): UserRow,
    ) -> Self {
        User {
            id,
            username,
            email,
            password_hash,
            is_admin,
            email_notifications,
            theme_preference,
            created_at: ts(created_at),
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.url)).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self> {
        // A pooled ":memory:" database is a fresh database per connection;
        // cap the pool at one so every query sees the same data.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // WAL for concurrent readers while the writer commits
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        for statement in [
            schema::CREATE_USERS_TABLE,
            schema::CREATE_PROFILES_TABLE,
            schema::CREATE_EVENTS_TABLE,
            schema::CREATE_INDEX_PROFILE_IP,
            schema::CREATE_INDEX_PROFILE_LAST_SEEN,
            schema::CREATE_INDEX_EVENT_TIMESTAMP,
            schema::CREATE_INDEX_EVENT_IP,
            schema::CREATE_INDEX_EVENT_ATTACKER,
            schema::CREATE_INDEX_EVENT_SERVICE,
            schema::CREATE_INDEX_EVENT_SEVERITY,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // === Ingestion ===

    /// Persist one validated capture: profile upsert plus event insert in a
    /// single transaction. Returns the new event id.
    pub async fn record_capture(&self, capture: &NewCapture) -> Result<i64> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let attacker_id = resolve_profile(
            &mut tx,
            &capture.ip_address,
            capture.user_agent.as_deref(),
            now_ms,
        )
        .await?;
        let event_id = insert_event(&mut tx, capture, attacker_id, now_ms).await?;
        tx.commit().await?;
        Ok(event_id)
    }

    /// Same atomic shape as `record_capture`, but also stamps the profile
    /// country. Used by the simulated-attack generator.
    pub async fn record_simulated(&self, capture: &NewCapture, country: &str) -> Result<i64> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let attacker_id = resolve_profile(
            &mut tx,
            &capture.ip_address,
            capture.user_agent.as_deref(),
            now_ms,
        )
        .await?;
        sqlx::query("UPDATE attacker_profiles SET country = ? WHERE id = ?")
            .bind(country)
            .bind(attacker_id)
            .execute(&mut *tx)
            .await?;
        let event_id = insert_event(&mut tx, capture, attacker_id, now_ms).await?;
        tx.commit().await?;
        Ok(event_id)
    }

    // === Attacker profiles ===

    pub async fn find_profile_by_ip(&self, ip: &str) -> Result<Option<AttackerProfile>> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM attacker_profiles WHERE ip_address = ?"
        ))
        .bind(ip)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AttackerProfile::from))
    }

    pub async fn list_profiles(&self) -> Result<Vec<AttackerProfile>> {
        let rows: Vec<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {PROFILE_COLUMNS} FROM attacker_profiles ORDER BY last_seen DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AttackerProfile::from).collect())
    }

    pub async fn total_profiles(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attacker_profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    // === Attack events ===

    pub async fn total_events(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attack_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn count_events_for_ip(&self, ip: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attack_events WHERE ip_address = ?")
            .bind(ip)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn recent_events(&self, limit: i64) -> Result<Vec<AttackEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM attack_events ORDER BY timestamp DESC, id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AttackEvent::from).collect())
    }

    /// Descending-timestamp page of events with optional ip-substring and
    /// exact-method filters. Returns the page plus the filtered total.
    pub async fn events_page(
        &self,
        ip_filter: &str,
        method_filter: &str,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<AttackEvent>, i64)> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 200);
        let offset = (page - 1) * per_page;

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM attack_events \
             WHERE (? = '' OR ip_address LIKE '%' || ? || '%') \
               AND (? = '' OR method = ?) \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(ip_filter)
        .bind(ip_filter)
        .bind(method_filter)
        .bind(method_filter)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM attack_events \
             WHERE (? = '' OR ip_address LIKE '%' || ? || '%') \
               AND (? = '' OR method = ?)",
        )
        .bind(ip_filter)
        .bind(ip_filter)
        .bind(method_filter)
        .bind(method_filter)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows.into_iter().map(AttackEvent::from).collect(), total.0))
    }

    pub async fn latest_event_at(&self) -> Result<Option<DateTime<Utc>>> {
        // MAX over an empty table yields a single NULL row
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(timestamp) FROM attack_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.map(ts))
    }

    // === Aggregation ===

    pub async fn service_stats(&self) -> Result<Vec<ServiceStat>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT honeypot_service, COUNT(*) as count FROM attack_events \
             GROUP BY honeypot_service ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(service, count)| ServiceStat { service, count })
            .collect())
    }

    pub async fn severity_stats(&self) -> Result<Vec<SeverityStat>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) as count FROM attack_events \
             GROUP BY severity ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(severity, count)| SeverityStat { severity, count })
            .collect())
    }

    /// Event counts grouped by the owning profile's country
    pub async fn country_stats(&self) -> Result<Vec<CountryStat>> {
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT p.country, COUNT(e.id) as count \
             FROM attacker_profiles p \
             JOIN attack_events e ON p.id = e.attacker_id \
             GROUP BY p.country ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(country, count)| CountryStat {
                country: country.unwrap_or_else(|| "Unknown".to_string()),
                count,
            })
            .collect())
    }

    /// Table names and row counts for the database page. A table whose
    /// count query fails is reported with `rows: None` rather than failing
    /// the whole listing.
    pub async fn table_stats(&self) -> Result<Vec<TableStat>> {
        let names: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(names.len());
        for (name,) in names {
            let rows = sqlx::query_as::<_, (i64,)>(&format!("SELECT COUNT(*) FROM \"{name}\""))
                .fetch_one(&self.pool)
                .await
                .ok()
                .map(|(count,)| count);
            tables.push(TableStat { name, rows });
        }
        Ok(tables)
    }

    // === Retention ===

    /// Delete events older than the cutoff, then profiles that have no
    /// remaining events and were last seen before the cutoff. Events go
    /// first so no profile row is ever dangled.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let events = sqlx::query("DELETE FROM attack_events WHERE timestamp < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let profiles = sqlx::query(
            "DELETE FROM attacker_profiles WHERE last_seen < ? AND NOT EXISTS \
             (SELECT 1 FROM attack_events e WHERE e.attacker_id = attacker_profiles.id)",
        )
        .bind(cutoff_ms)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok((events, profiles))
    }

    pub async fn events_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM attack_events WHERE timestamp >= ? AND timestamp < ?")
                .bind(start.timestamp_millis())
                .bind(end.timestamp_millis())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn profiles_first_seen_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM attacker_profiles WHERE first_seen >= ? AND first_seen < ?",
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    // === Users ===

    pub async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_admin, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(is_admin)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    pub async fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    pub async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_notifications(&self, user_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE users SET email_notifications = ? WHERE id = ?")
            .bind(enabled)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_theme(&self, user_id: i64, theme: &str) -> Result<()> {
        sqlx::query("UPDATE users SET theme_preference = ? WHERE id = ?")
            .bind(theme)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Look up the profile for an IP, creating it on first sight. A lost
/// insert race (unique violation on ip_address) falls back to re-fetching
/// the row the winner created.
async fn resolve_profile(
    conn: &mut SqliteConnection,
    ip: &str,
    user_agent: Option<&str>,
    now_ms: i64,
) -> Result<i64, sqlx::Error> {
    if let Some(id) = find_profile_id(conn, ip).await? {
        touch_profile(conn, id, user_agent, now_ms).await?;
        return Ok(id);
    }

    match insert_profile(conn, ip, user_agent.unwrap_or(""), now_ms).await {
        Ok(id) => Ok(id),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            let id = find_profile_id(conn, ip)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
            touch_profile(conn, id, user_agent, now_ms).await?;
            Ok(id)
        }
        Err(e) => Err(e),
    }
}

async fn find_profile_id(conn: &mut SqliteConnection, ip: &str) -> Result<Option<i64>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM attacker_profiles WHERE ip_address = ?")
        .bind(ip)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|(id,)| id))
}

/// Advance last_seen; overwrite the stored user agent only when the new
/// request actually carried one.
async fn touch_profile(
    conn: &mut SqliteConnection,
    id: i64,
    user_agent: Option<&str>,
    now_ms: i64,
) -> Result<(), sqlx::Error> {
    match user_agent {
        Some(ua) if !ua.is_empty() => {
            sqlx::query("UPDATE attacker_profiles SET last_seen = ?, user_agent = ? WHERE id = ?")
                .bind(now_ms)
                .bind(ua)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
        _ => {
            sqlx::query("UPDATE attacker_profiles SET last_seen = ? WHERE id = ?")
                .bind(now_ms)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

async fn insert_profile(
    conn: &mut SqliteConnection,
    ip: &str,
    user_agent: &str,
    now_ms: i64,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO attacker_profiles (ip_address, user_agent, first_seen, last_seen) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(ip)
    .bind(user_agent)
    .bind(now_ms)
    .bind(now_ms)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_event(
    conn: &mut SqliteConnection,
    capture: &NewCapture,
    attacker_id: i64,
    now_ms: i64,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO attack_events \
         (timestamp, ip_address, method, path, headers, payload, honeypot_service, signature, severity, attacker_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(now_ms)
    .bind(&capture.ip_address)
    .bind(&capture.method)
    .bind(&capture.path)
    .bind(capture.headers.to_string())
    .bind(capture.payload.to_string())
    .bind(&capture.honeypot_service)
    .bind(&capture.signature)
    .bind(&capture.severity)
    .bind(attacker_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}
