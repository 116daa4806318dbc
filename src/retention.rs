//! Retention sweep
//!
//! A background task that periodically deletes attack events older than
//! the retention window, then attacker profiles that no longer own any
//! events. The sweep is idempotent; a missed run just means the next one
//! deletes more. Each sweep also logs a short report for the previous
//! day.

use chrono::{Duration, Utc};
use tracing::{error, info};

use crate::config::RetentionConfig;
use crate::db::Database;

/// Start the retention sweep background task
pub fn spawn(db: Database, config: RetentionConfig) {
    tokio::spawn(retention_task(db, config));
}

async fn retention_task(db: Database, config: RetentionConfig) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.sweep_interval_hours * 3600));

    info!(
        "Retention sweep started (window={}d, interval={}h)",
        config.days, config.sweep_interval_hours
    );

    loop {
        interval.tick().await;

        match sweep(&db, config.days).await {
            Ok((events, profiles)) => {
                info!(
                    "Retention sweep removed {} events and {} profiles",
                    events, profiles
                );
            }
            Err(e) => {
                error!("Retention sweep failed: {:#}", e);
            }
        }

        if let Err(e) = log_daily_report(&db).await {
            error!("Daily report failed: {:#}", e);
        }
    }
}

/// Delete data older than the retention window. Events go first so no
/// profile is left referencing a deleted row.
pub async fn sweep(db: &Database, days: i64) -> anyhow::Result<(u64, u64)> {
    let cutoff = Utc::now() - Duration::days(days);
    db.purge_before(cutoff).await
}

/// Log yesterday's event volume and newly-seen attackers
pub async fn log_daily_report(db: &Database) -> anyhow::Result<()> {
    let today = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();
    let yesterday = today - Duration::days(1);

    let events = db.events_between(yesterday, today).await?;
    let new_attackers = db.profiles_first_seen_between(yesterday, today).await?;

    info!(
        "Daily report for {}: {} events, {} new attackers",
        yesterday.format("%Y-%m-%d"),
        events,
        new_attackers
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewCapture;
    use serde_json::json;

    fn capture_from(ip: &str) -> NewCapture {
        NewCapture {
            ip_address: ip.to_string(),
            user_agent: None,
            method: "POST".to_string(),
            path: "/api/capture".to_string(),
            headers: json!({}),
            payload: json!({}),
            honeypot_service: "web".to_string(),
            signature: None,
            severity: "low".to_string(),
        }
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        db.record_capture(&capture_from("10.0.0.5")).await.unwrap();

        // Fresh data survives any positive retention window
        let (events, profiles) = sweep(&db, 30).await.unwrap();
        assert_eq!((events, profiles), (0, 0));
        let (events, profiles) = sweep(&db, 30).await.unwrap();
        assert_eq!((events, profiles), (0, 0));

        assert_eq!(db.total_events().await.unwrap(), 1);
        assert_eq!(db.total_profiles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn daily_report_counts_do_not_fail_on_empty_db() {
        let db = Database::open_in_memory().await.unwrap();
        log_daily_report(&db).await.unwrap();
    }
}
