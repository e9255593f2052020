//! SQLite DDL definitions for the trialwatch store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the trialwatch database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Let dispatch sweeps read while a claim commits.
PRAGMA journal_mode = WAL;

PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY,
    email        TEXT NOT NULL,
    display_name TEXT,
    timezone     TEXT NOT NULL DEFAULT 'UTC'
);

CREATE TABLE IF NOT EXISTS trials (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL REFERENCES users(id),
    service_name TEXT NOT NULL,
    end_date     TEXT NOT NULL,      -- civil date, YYYY-MM-DD
    status       TEXT NOT NULL DEFAULT 'active',
    cancel_url   TEXT,
    created_at   INTEGER NOT NULL,
    canceled_at  INTEGER
);

CREATE INDEX IF NOT EXISTS idx_trials_user ON trials(user_id);

-- Reminders are never deleted; status only moves forward.
CREATE TABLE IF NOT EXISTS reminders (
    id         TEXT PRIMARY KEY,
    trial_id   TEXT NOT NULL REFERENCES trials(id),
    user_id    TEXT NOT NULL REFERENCES users(id),
    remind_at  INTEGER NOT NULL,     -- epoch seconds, UTC
    kind       TEXT NOT NULL,        -- snake_case ReminderKind
    status     TEXT NOT NULL DEFAULT 'pending',
    claimed_at INTEGER,
    claim_token TEXT,
    sent_at    INTEGER,
    message_id TEXT,
    last_error TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reminders_due   ON reminders(status, remind_at);
CREATE INDEX IF NOT EXISTS idx_reminders_trial ON reminders(trial_id);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version on a fresh
/// database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Read the schema version, `None` if it was never seeded.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
