//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating ledger schema v{}", SCHEMA_VERSION);
        conn.execute_batch(LEDGER_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(StoreError::Internal(format!(
            "database schema v{current_version} is newer than supported v{SCHEMA_VERSION}"
        )));
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Amounts are stored as decimal text; timestamps as RFC 3339 UTC with
/// microseconds so that text order equals time order.
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    referral_code TEXT NOT NULL UNIQUE,
    sponsor_id TEXT REFERENCES users(id),
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    monthly_rate TEXT NOT NULL,
    duration_months INTEGER NOT NULL,
    min_amount TEXT NOT NULL,
    max_amount TEXT
);

CREATE TABLE IF NOT EXISTS investments (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    plan_id TEXT NOT NULL REFERENCES plans(id),
    amount TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL,
    closed_at TEXT
);

CREATE TABLE IF NOT EXISTS commissions (
    id TEXT PRIMARY KEY,
    investment_id TEXT NOT NULL REFERENCES investments(id),
    beneficiary_id TEXT NOT NULL REFERENCES users(id),
    source_user_id TEXT NOT NULL REFERENCES users(id),
    level INTEGER NOT NULL,
    rate TEXT NOT NULL,
    amount TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (investment_id, beneficiary_id)
);

CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    kind TEXT NOT NULL,
    amount TEXT NOT NULL,
    provider TEXT,
    reference TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_sponsor ON users(sponsor_id, registered_at);
CREATE INDEX IF NOT EXISTS idx_investments_user ON investments(user_id);
CREATE INDEX IF NOT EXISTS idx_investments_due ON investments(status, end_date);
CREATE INDEX IF NOT EXISTS idx_commissions_beneficiary ON commissions(beneficiary_id);
CREATE INDEX IF NOT EXISTS idx_entries_user ON entries(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_provider_ref
    ON entries(provider, reference)
    WHERE provider IS NOT NULL AND reference IS NOT NULL;
"#;
