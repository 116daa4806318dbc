//! Database schema definitions

pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT UNIQUE,
    password_hash TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    email_notifications INTEGER NOT NULL DEFAULT 1,
    theme_preference TEXT NOT NULL DEFAULT 'light',
    created_at BIGINT NOT NULL
)
"#;

pub const CREATE_PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS attacker_profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address TEXT NOT NULL,
    user_agent TEXT NOT NULL DEFAULT '',
    asn TEXT,
    isp TEXT,
    country TEXT,
    city TEXT,
    tags TEXT,
    first_seen BIGINT NOT NULL,
    last_seen BIGINT NOT NULL
)
"#;

pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS attack_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp BIGINT NOT NULL,
    ip_address TEXT NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    headers TEXT,
    payload TEXT,
    honeypot_service TEXT NOT NULL DEFAULT 'web',
    signature TEXT,
    severity TEXT NOT NULL DEFAULT 'low',
    attacker_id INTEGER NOT NULL REFERENCES attacker_profiles(id)
)
"#;

// One profile per IP; concurrent creation surfaces as a unique violation
// that ingestion resolves by re-fetching
pub const CREATE_INDEX_PROFILE_IP: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_ip ON attacker_profiles(ip_address)";

// For the attackers listing and retention cutoff scans
pub const CREATE_INDEX_PROFILE_LAST_SEEN: &str =
    "CREATE INDEX IF NOT EXISTS idx_profiles_last_seen ON attacker_profiles(last_seen)";

pub const CREATE_INDEX_EVENT_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON attack_events(timestamp)";

pub const CREATE_INDEX_EVENT_IP: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_ip ON attack_events(ip_address)";

// Profile -> events is always an explicit join on this column
pub const CREATE_INDEX_EVENT_ATTACKER: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_attacker ON attack_events(attacker_id)";

pub const CREATE_INDEX_EVENT_SERVICE: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_service ON attack_events(honeypot_service)";

pub const CREATE_INDEX_EVENT_SEVERITY: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_severity ON attack_events(severity)";
