//! SQLite-backed reminder store.
//!
//! A single database file holds users, trials and reminders. Claims are a
//! conditional `UPDATE ... WHERE status = 'pending'`, so two sweeps racing
//! over the same row see exactly one changed row between them, whether
//! they share this handle or open the same file from another process.
//!
//! rusqlite is blocking and a busy file can stall for up to
//! [`BUSY_TIMEOUT`], so every trait method runs on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::schema::{apply_schema, read_schema_version};
use super::{Claim, DeliveryOutcome, ReminderStore, StoreError};
use crate::types::{
    DueReminder, Reminder, ReminderId, ReminderKind, ReminderStatus, Trial, TrialId, TrialStatus,
    User, UserId,
};

/// How long a writer waits on another process's lock before failing.
const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

const REMINDER_COLUMNS: &str = "r.id, r.trial_id, r.user_id, r.remind_at, r.kind, r.status, \
     r.claimed_at, r.sent_at, r.message_id, r.last_error, r.created_at";
const REMINDER_WIDTH: usize = 11;

const TRIAL_COLUMNS: &str = "t.id, t.user_id, t.service_name, t.end_date, t.status, \
     t.cancel_url, t.created_at, t.canceled_at";
const TRIAL_WIDTH: usize = 8;

const USER_COLUMNS: &str = "u.id, u.email, u.display_name, u.timezone";

/// SQLite-backed [`ReminderStore`].
///
/// Thread-safe via an internal `Arc<Mutex<Connection>>`, shared with the
/// blocking tasks that run each query.
pub struct SqliteReminderStore {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReminderStore {
    /// Open (or create) the database at `path`, applying the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        apply_schema(&conn)?;
        debug!("opened reminder store at {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Load one reminder by id.
    pub fn reminder(&self, id: &ReminderId) -> Result<Option<Reminder>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders r WHERE r.id = ?1");
        let reminder = conn
            .query_row(&sql, params![id.as_str()], |row| reminder_from_row(row, 0))
            .optional()?;
        Ok(reminder)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ReminderStore for SqliteReminderStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let user = user.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, display_name, timezone) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(id) DO UPDATE SET email = excluded.email, \
                 display_name = excluded.display_name, timezone = excluded.timezone",
                params![
                    user.id.as_str(),
                    user.email,
                    user.display_name,
                    user.timezone
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
            let user = conn
                .query_row(&sql, params![id.as_str()], |row| user_from_row(row, 0))
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn insert_trial(&self, trial: &Trial, reminders: &[Reminder]) -> Result<(), StoreError> {
        let trial = trial.clone();
        let reminders = reminders.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT INTO trials \
                 (id, user_id, service_name, end_date, status, cancel_url, created_at, canceled_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    trial.id.as_str(),
                    trial.user_id.as_str(),
                    trial.service_name,
                    trial.end_date.format("%Y-%m-%d").to_string(),
                    trial.status.as_str(),
                    trial.cancel_url,
                    trial.created_at.timestamp(),
                    trial.canceled_at.map(|at| at.timestamp()),
                ],
            )?;
            insert_reminder_rows(&tx, &reminders)?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_trial(&self, id: &TrialId) -> Result<Option<Trial>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {TRIAL_COLUMNS} FROM trials t WHERE t.id = ?1");
            let trial = conn
                .query_row(&sql, params![id.as_str()], |row| trial_from_row(row, 0))
                .optional()?;
            Ok(trial)
        })
        .await
    }

    async fn reminders_for_trial(&self, trial_id: &TrialId) -> Result<Vec<Reminder>, StoreError> {
        let trial_id = trial_id.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {REMINDER_COLUMNS} FROM reminders r WHERE r.trial_id = ?1 \
                 ORDER BY r.remind_at ASC, r.created_at ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows =
                stmt.query_map(params![trial_id.as_str()], |row| reminder_from_row(row, 0))?;

            let mut reminders = Vec::new();
            for r in rows {
                reminders.push(r?);
            }
            Ok(reminders)
        })
        .await
    }

    async fn cancel_trial(
        &self,
        trial_id: &TrialId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let trial_id = trial_id.clone();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "UPDATE trials SET status = 'canceled', canceled_at = ?2 \
                 WHERE id = ?1 AND status = 'active'",
                params![trial_id.as_str(), at.timestamp()],
            )?;
            Ok(rows == 1)
        })
        .await
    }

    async fn replan(
        &self,
        trial_id: &TrialId,
        end_date: NaiveDate,
        reminders: &[Reminder],
    ) -> Result<Option<usize>, StoreError> {
        let trial_id = trial_id.clone();
        let reminders = reminders.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;

            // Writing first takes the database lock, so a cancel from
            // another process lands wholly before or after this block.
            let moved = tx.execute(
                "UPDATE trials SET end_date = ?2 WHERE id = ?1 AND status = 'active'",
                params![trial_id.as_str(), end_date.format("%Y-%m-%d").to_string()],
            )?;
            if moved == 0 {
                return Ok(None);
            }

            let skipped = tx.execute(
                "UPDATE reminders SET status = 'skipped' \
                 WHERE trial_id = ?1 AND status = 'pending'",
                params![trial_id.as_str()],
            )?;
            insert_reminder_rows(&tx, &reminders)?;

            tx.commit()?;
            Ok(Some(skipped))
        })
        .await
    }

    async fn skip_pending(&self, trial_id: &TrialId) -> Result<usize, StoreError> {
        let trial_id = trial_id.clone();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "UPDATE reminders SET status = 'skipped' \
                 WHERE trial_id = ?1 AND status = 'pending'",
                params![trial_id.as_str()],
            )?;
            Ok(rows)
        })
        .await
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueReminder>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {REMINDER_COLUMNS}, {TRIAL_COLUMNS}, {USER_COLUMNS} \
                 FROM reminders r \
                 JOIN trials t ON t.id = r.trial_id \
                 JOIN users u ON u.id = r.user_id \
                 WHERE r.status = 'pending' AND r.remind_at <= ?1 AND t.status = 'active' \
                 ORDER BY r.remind_at ASC \
                 LIMIT ?2"
            );
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![now.timestamp(), limit], |row| {
                Ok(DueReminder {
                    reminder: reminder_from_row(row, 0)?,
                    trial: trial_from_row(row, REMINDER_WIDTH)?,
                    user: user_from_row(row, REMINDER_WIDTH + TRIAL_WIDTH)?,
                })
            })?;

            let mut due = Vec::new();
            for r in rows {
                due.push(r?);
            }
            Ok(due)
        })
        .await
    }

    async fn claim(
        &self,
        reminder_id: &ReminderId,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, StoreError> {
        let reminder_id = reminder_id.clone();
        let token = uuid::Uuid::new_v4().to_string();
        self.with_conn(move |conn| {
            let rows = conn.execute(
                "UPDATE reminders SET status = 'claimed', claimed_at = ?2, claim_token = ?3 \
                 WHERE id = ?1 AND status = 'pending' \
                 AND EXISTS (SELECT 1 FROM trials t \
                             WHERE t.id = reminders.trial_id AND t.status = 'active')",
                params![reminder_id.as_str(), now.timestamp(), token],
            )?;

            if rows == 0 {
                return Ok(None);
            }
            Ok(Some(Claim::new(reminder_id, now, token)))
        })
        .await
    }

    async fn record_outcome(
        &self,
        claim: Claim,
        outcome: DeliveryOutcome,
    ) -> Result<(), StoreError> {
        let next = outcome.status();
        if !next.is_terminal() || !ReminderStatus::Claimed.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: claim.reminder_id().clone(),
                expected: ReminderStatus::Claimed.as_str(),
            });
        }

        self.with_conn(move |conn| {
            let id = claim.reminder_id().as_str();
            let claimed_at = claim.claimed_at().timestamp();
            let rows = match &outcome {
                DeliveryOutcome::Sent {
                    sent_at,
                    message_id,
                } => conn.execute(
                    "UPDATE reminders SET status = ?4, sent_at = ?5, message_id = ?6, \
                     last_error = NULL, claim_token = NULL \
                     WHERE id = ?1 AND status = 'claimed' AND claimed_at = ?2 \
                     AND claim_token = ?3",
                    params![
                        id,
                        claimed_at,
                        claim.token(),
                        next.as_str(),
                        sent_at.timestamp(),
                        message_id
                    ],
                )?,
                DeliveryOutcome::Failed { reason } => conn.execute(
                    "UPDATE reminders SET status = ?4, last_error = ?5, claim_token = NULL \
                     WHERE id = ?1 AND status = 'claimed' AND claimed_at = ?2 \
                     AND claim_token = ?3",
                    params![id, claimed_at, claim.token(), next.as_str(), reason],
                )?,
            };

            if rows == 0 {
                return Err(StoreError::InvalidTransition {
                    id: claim.reminder_id().clone(),
                    expected: ReminderStatus::Claimed.as_str(),
                });
            }
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn insert_reminder_rows(conn: &Connection, reminders: &[Reminder]) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO reminders \
         (id, trial_id, user_id, remind_at, kind, status, claimed_at, sent_at, message_id, \
          last_error, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for r in reminders {
        stmt.execute(params![
            r.id.as_str(),
            r.trial_id.as_str(),
            r.user_id.as_str(),
            r.remind_at.timestamp(),
            r.kind.as_str(),
            r.status.as_str(),
            r.claimed_at.map(|at| at.timestamp()),
            r.sent_at.map(|at| at.timestamp()),
            r.message_id,
            r.last_error,
            r.created_at.timestamp(),
        ])?;
    }
    Ok(())
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn timestamp_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp {secs} out of range")))
}

fn optional_timestamp_at(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let secs: Option<i64> = row.get(idx)?;
    secs.map(|secs| {
        DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            conversion_error(idx, Type::Integer, format!("timestamp {secs} out of range"))
        })
    })
    .transpose()
}

fn reminder_from_row(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Reminder> {
    let kind_str: String = row.get(base + 4)?;
    let status_str: String = row.get(base + 5)?;
    let id: String = row.get(base)?;
    let trial_id: String = row.get(base + 1)?;
    let user_id: String = row.get(base + 2)?;

    Ok(Reminder {
        id: ReminderId::from(id),
        trial_id: TrialId::from(trial_id),
        user_id: UserId::from(user_id),
        remind_at: timestamp_at(row, base + 3)?,
        kind: ReminderKind::parse(&kind_str).ok_or_else(|| {
            conversion_error(base + 4, Type::Text, format!("unknown reminder kind {kind_str:?}"))
        })?,
        status: ReminderStatus::parse(&status_str).ok_or_else(|| {
            conversion_error(
                base + 5,
                Type::Text,
                format!("unknown reminder status {status_str:?}"),
            )
        })?,
        claimed_at: optional_timestamp_at(row, base + 6)?,
        sent_at: optional_timestamp_at(row, base + 7)?,
        message_id: row.get(base + 8)?,
        last_error: row.get(base + 9)?,
        created_at: timestamp_at(row, base + 10)?,
    })
}

fn trial_from_row(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Trial> {
    let id: String = row.get(base)?;
    let user_id: String = row.get(base + 1)?;
    let end_date_str: String = row.get(base + 3)?;
    let status_str: String = row.get(base + 4)?;

    Ok(Trial {
        id: TrialId::from(id),
        user_id: UserId::from(user_id),
        service_name: row.get(base + 2)?,
        end_date: NaiveDate::parse_from_str(&end_date_str, "%Y-%m-%d").map_err(|e| {
            conversion_error(base + 3, Type::Text, format!("bad end date {end_date_str:?}: {e}"))
        })?,
        status: TrialStatus::parse(&status_str).ok_or_else(|| {
            conversion_error(base + 4, Type::Text, format!("unknown trial status {status_str:?}"))
        })?,
        cancel_url: row.get(base + 5)?,
        created_at: timestamp_at(row, base + 6)?,
        canceled_at: optional_timestamp_at(row, base + 7)?,
    })
}

fn user_from_row(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<User> {
    let id: String = row.get(base)?;
    Ok(User {
        id: UserId::from(id),
        email: row.get(base + 1)?,
        display_name: row.get(base + 2)?,
        timezone: row.get(base + 3)?,
    })
}
