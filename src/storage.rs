//! SQLite storage layer for onward.
//!
//! Provides the database shared by the API server and the CLI tooling.
//! Handles schema creation, CRUD operations for all entity types, and the
//! task-completion transaction that awards points atomically.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::progress::level_for_points;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    NotFound(String),
    AlreadyExists(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// True when the wrapped sqlite error is a UNIQUE constraint violation.
fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// User row stored in the database. Never hard-deleted; `is_active = false`
/// marks a deactivated account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: i64,
}

/// Catalog task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub points: i64,
    pub is_daily: bool,
    pub is_active: bool,
    pub created_at: i64,
}

/// Per-user, per-day completion record. Unique per (user, task, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletionRow {
    pub id: i64,
    pub user_id: i64,
    pub task_id: i64,
    pub completion_date: String,
    pub points_awarded: i64,
    pub completed_at: i64,
}

/// Recovery session row. At most one active session per (user, addiction
/// type); streak days are derived from `started_at`, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySessionRow {
    pub id: i64,
    pub user_id: i64,
    pub addiction_type: String,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub is_active: bool,
    pub relapse_notes: Option<String>,
}

/// One mood record per user per calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCheckinRow {
    pub id: i64,
    pub user_id: i64,
    pub checkin_date: String,
    pub mood: i64,
    pub energy: Option<i64>,
    pub stress: Option<i64>,
    pub notes: Option<String>,
    pub updated_at: i64,
}

/// Community post row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityPostRow {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub category: String,
    pub created_at: i64,
}

/// Community post joined with its author's username for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityPostView {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub category: String,
    pub created_at: i64,
}

/// Running point total and derived level for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPointsRow {
    pub user_id: i64,
    pub total_points: i64,
    pub level: i64,
    pub updated_at: i64,
}

/// Device push-token registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTokenRow {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub platform: Option<String>,
    pub created_at: i64,
}

/// Append-only dispatch log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub body: String,
    /// JSON-encoded structured payload, when the dispatch carried one.
    pub data: Option<String>,
    /// "sent" when every token succeeded, "failed" otherwise.
    pub status: String,
    pub created_at: i64,
}

/// Result of the task-completion transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub points_earned: i64,
    pub total_points: i64,
    pub level: i64,
    pub level_up: bool,
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database, used by tests and ephemeral tooling.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                email         TEXT NOT NULL UNIQUE,
                username      TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_active     INTEGER NOT NULL DEFAULT 1,
                created_at    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                title       TEXT NOT NULL,
                description TEXT,
                category    TEXT NOT NULL DEFAULT 'general',
                points      INTEGER NOT NULL DEFAULT 10,
                is_daily    INTEGER NOT NULL DEFAULT 1,
                is_active   INTEGER NOT NULL DEFAULT 1,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_completions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL REFERENCES users(id),
                task_id         INTEGER NOT NULL REFERENCES tasks(id),
                completion_date TEXT NOT NULL,
                points_awarded  INTEGER NOT NULL,
                completed_at    INTEGER NOT NULL,
                UNIQUE (user_id, task_id, completion_date)
            );

            CREATE INDEX IF NOT EXISTS idx_completions_user_date
                ON task_completions(user_id, completion_date);

            CREATE TABLE IF NOT EXISTS recovery_sessions (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        INTEGER NOT NULL REFERENCES users(id),
                addiction_type TEXT NOT NULL,
                started_at     INTEGER NOT NULL,
                ended_at       INTEGER,
                is_active      INTEGER NOT NULL DEFAULT 1
            );

            -- One active session per user per addiction type.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_recovery_active
                ON recovery_sessions(user_id, addiction_type)
                WHERE is_active = 1;

            CREATE TABLE IF NOT EXISTS daily_checkins (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id      INTEGER NOT NULL REFERENCES users(id),
                checkin_date TEXT NOT NULL,
                mood         INTEGER NOT NULL,
                energy       INTEGER,
                stress       INTEGER,
                notes        TEXT,
                updated_at   INTEGER NOT NULL,
                UNIQUE (user_id, checkin_date)
            );

            CREATE TABLE IF NOT EXISTS community_posts (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL REFERENCES users(id),
                content    TEXT NOT NULL,
                category   TEXT NOT NULL DEFAULT 'general',
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_created
                ON community_posts(created_at);
            CREATE INDEX IF NOT EXISTS idx_posts_category
                ON community_posts(category, created_at);

            CREATE TABLE IF NOT EXISTS user_points (
                user_id      INTEGER PRIMARY KEY REFERENCES users(id),
                total_points INTEGER NOT NULL DEFAULT 0,
                level        INTEGER NOT NULL DEFAULT 1,
                updated_at   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS push_tokens (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL REFERENCES users(id),
                token      TEXT NOT NULL UNIQUE,
                platform   TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_push_tokens_user
                ON push_tokens(user_id);

            CREATE TABLE IF NOT EXISTS notifications (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL REFERENCES users(id),
                title      TEXT NOT NULL,
                body       TEXT NOT NULL,
                data       TEXT,
                status     TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user
                ON notifications(user_id, created_at);
            ",
        )?;

        // Migration: add relapse_notes to recovery_sessions if not present
        // (databases created before relapse notes shipped won't have it).
        let has_notes_col: bool = self
            .conn
            .prepare("SELECT relapse_notes FROM recovery_sessions LIMIT 0")
            .is_ok();
        if !has_notes_col {
            self.conn
                .execute_batch("ALTER TABLE recovery_sessions ADD COLUMN relapse_notes TEXT;")?;
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users CRUD
    // -----------------------------------------------------------------------

    /// Insert a new user. Fails with `AlreadyExists` when the email or
    /// username is taken.
    pub fn insert_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
        now: i64,
    ) -> Result<UserRow, StorageError> {
        let inserted = self.conn.execute(
            "INSERT INTO users (email, username, password_hash, is_active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![email, username, password_hash, now],
        );
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StorageError::AlreadyExists(format!(
                    "user {email} / {username}"
                )));
            }
            return Err(e.into());
        }
        Ok(UserRow {
            id: self.conn.last_insert_rowid(),
            email: email.to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_active: true,
            created_at: now,
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>, StorageError> {
        self.query_user("SELECT id, email, username, password_hash, is_active, created_at
             FROM users WHERE id = ?1", params![id])
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>, StorageError> {
        self.query_user(
            "SELECT id, email, username, password_hash, is_active, created_at
             FROM users WHERE email = ?1",
            params![email],
        )
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, StorageError> {
        self.query_user(
            "SELECT id, email, username, password_hash, is_active, created_at
             FROM users WHERE username = ?1",
            params![username],
        )
    }

    fn query_user(
        &self,
        sql: &str,
        bind: impl rusqlite::Params,
    ) -> Result<Option<UserRow>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let row = stmt
            .query_row(bind, |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    username: row.get(2)?,
                    password_hash: row.get(3)?,
                    is_active: row.get::<_, i64>(4)? != 0,
                    created_at: row.get(5)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, username, password_hash, is_active, created_at
             FROM users ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                username: row.get(2)?,
                password_hash: row.get(3)?,
                is_active: row.get::<_, i64>(4)? != 0,
                created_at: row.get(5)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Tasks CRUD
    // -----------------------------------------------------------------------

    pub fn insert_task(
        &self,
        title: &str,
        description: Option<&str>,
        category: &str,
        points: i64,
        is_daily: bool,
        now: i64,
    ) -> Result<TaskRow, StorageError> {
        self.conn.execute(
            "INSERT INTO tasks (title, description, category, points, is_daily, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![title, description, category, points, is_daily as i64, now],
        )?;
        Ok(TaskRow {
            id: self.conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.map(|d| d.to_string()),
            category: category.to_string(),
            points,
            is_daily,
            is_active: true,
            created_at: now,
        })
    }

    pub fn get_task(&self, id: i64) -> Result<Option<TaskRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, category, points, is_daily, is_active, created_at
             FROM tasks WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok(TaskRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    category: row.get(3)?,
                    points: row.get(4)?,
                    is_daily: row.get::<_, i64>(5)? != 0,
                    is_active: row.get::<_, i64>(6)? != 0,
                    created_at: row.get(7)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// List active catalog tasks, optionally filtered by category.
    pub fn list_tasks(&self, category: Option<&str>) -> Result<Vec<TaskRow>, StorageError> {
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(TaskRow {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                category: row.get(3)?,
                points: row.get(4)?,
                is_daily: row.get::<_, i64>(5)? != 0,
                is_active: row.get::<_, i64>(6)? != 0,
                created_at: row.get(7)?,
            })
        };
        let mut result = Vec::new();
        match category {
            Some(category) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, title, description, category, points, is_daily, is_active, created_at
                     FROM tasks WHERE is_active = 1 AND category = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![category], map_row)?;
                for row in rows {
                    result.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, title, description, category, points, is_daily, is_active, created_at
                     FROM tasks WHERE is_active = 1 ORDER BY id",
                )?;
                let rows = stmt.query_map([], map_row)?;
                for row in rows {
                    result.push(row?);
                }
            }
        }
        Ok(result)
    }

    /// List active daily tasks (the catalog shown on the daily screen).
    pub fn list_daily_tasks(&self) -> Result<Vec<TaskRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, description, category, points, is_daily, is_active, created_at
             FROM tasks WHERE is_active = 1 AND is_daily = 1 ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TaskRow {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                category: row.get(3)?,
                points: row.get(4)?,
                is_daily: row.get::<_, i64>(5)? != 0,
                is_active: row.get::<_, i64>(6)? != 0,
                created_at: row.get(7)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Task completions
    // -----------------------------------------------------------------------

    pub fn get_completion(
        &self,
        user_id: i64,
        task_id: i64,
        completion_date: &str,
    ) -> Result<Option<TaskCompletionRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, task_id, completion_date, points_awarded, completed_at
             FROM task_completions
             WHERE user_id = ?1 AND task_id = ?2 AND completion_date = ?3",
        )?;
        let row = stmt
            .query_row(params![user_id, task_id, completion_date], |row| {
                Ok(TaskCompletionRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    task_id: row.get(2)?,
                    completion_date: row.get(3)?,
                    points_awarded: row.get(4)?,
                    completed_at: row.get(5)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Task ids the user has completed on the given date.
    pub fn completed_task_ids(
        &self,
        user_id: i64,
        completion_date: &str,
    ) -> Result<HashSet<i64>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_id FROM task_completions
             WHERE user_id = ?1 AND completion_date = ?2",
        )?;
        let rows = stmt.query_map(params![user_id, completion_date], |row| row.get(0))?;
        let mut result = HashSet::new();
        for row in rows {
            result.insert(row?);
        }
        Ok(result)
    }

    pub fn count_completions(&self, user_id: i64) -> Result<i64, StorageError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM task_completions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_completions_on(
        &self,
        user_id: i64,
        completion_date: &str,
    ) -> Result<i64, StorageError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM task_completions
             WHERE user_id = ?1 AND completion_date = ?2",
            params![user_id, completion_date],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Complete a task for a user on a date, awarding its points atomically.
    ///
    /// Inserts the completion record and upserts the user's point total with
    /// the level recomputed from the new total, in one transaction. Fails with
    /// `NotFound` when the task is missing or inactive and `AlreadyExists`
    /// when a completion for (user, task, date) is already recorded; the point
    /// total is untouched in both cases.
    pub fn complete_task(
        &self,
        user_id: i64,
        task_id: i64,
        completion_date: &str,
        now: i64,
    ) -> Result<CompletionOutcome, StorageError> {
        let tx = self.conn.unchecked_transaction()?;

        let task: Option<(i64, i64)> = tx
            .query_row(
                "SELECT points, is_active FROM tasks WHERE id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let points = match task {
            Some((points, 1)) => points,
            _ => return Err(StorageError::NotFound(format!("task {task_id}"))),
        };

        let inserted = tx.execute(
            "INSERT INTO task_completions
             (user_id, task_id, completion_date, points_awarded, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, task_id, completion_date, points, now],
        );
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StorageError::AlreadyExists(format!(
                    "task {task_id} already completed on {completion_date}"
                )));
            }
            return Err(e.into());
        }

        let previous: i64 = tx
            .query_row(
                "SELECT total_points FROM user_points WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let total = previous + points;
        let level = level_for_points(total);
        tx.execute(
            "INSERT INTO user_points (user_id, total_points, level, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 total_points = excluded.total_points,
                 level = excluded.level,
                 updated_at = excluded.updated_at",
            params![user_id, total, level, now],
        )?;

        tx.commit()?;
        Ok(CompletionOutcome {
            points_earned: points,
            total_points: total,
            level,
            level_up: level > level_for_points(previous),
        })
    }

    // -----------------------------------------------------------------------
    // Recovery sessions
    // -----------------------------------------------------------------------

    /// Start a recovery session. Fails with `AlreadyExists` when the user
    /// already has an active session for this addiction type.
    pub fn insert_recovery_session(
        &self,
        user_id: i64,
        addiction_type: &str,
        now: i64,
    ) -> Result<RecoverySessionRow, StorageError> {
        let inserted = self.conn.execute(
            "INSERT INTO recovery_sessions (user_id, addiction_type, started_at, is_active)
             VALUES (?1, ?2, ?3, 1)",
            params![user_id, addiction_type, now],
        );
        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StorageError::AlreadyExists(format!(
                    "active {addiction_type} session for user {user_id}"
                )));
            }
            return Err(e.into());
        }
        Ok(RecoverySessionRow {
            id: self.conn.last_insert_rowid(),
            user_id,
            addiction_type: addiction_type.to_string(),
            started_at: now,
            ended_at: None,
            is_active: true,
            relapse_notes: None,
        })
    }

    pub fn get_active_session(
        &self,
        user_id: i64,
        addiction_type: &str,
    ) -> Result<Option<RecoverySessionRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, addiction_type, started_at, ended_at, is_active, relapse_notes
             FROM recovery_sessions
             WHERE user_id = ?1 AND addiction_type = ?2 AND is_active = 1",
        )?;
        let row = stmt
            .query_row(params![user_id, addiction_type], map_session_row)
            .optional()?;
        Ok(row)
    }

    pub fn list_active_sessions(
        &self,
        user_id: i64,
    ) -> Result<Vec<RecoverySessionRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, addiction_type, started_at, ended_at, is_active, relapse_notes
             FROM recovery_sessions
             WHERE user_id = ?1 AND is_active = 1 ORDER BY started_at",
        )?;
        let rows = stmt.query_map(params![user_id], map_session_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// All sessions for a user, newest first. Ended sessions included, for
    /// best-streak and relapse-count derivation.
    pub fn list_sessions(&self, user_id: i64) -> Result<Vec<RecoverySessionRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, addiction_type, started_at, ended_at, is_active, relapse_notes
             FROM recovery_sessions
             WHERE user_id = ?1 ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], map_session_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Close a session, recording the relapse time and optional notes.
    pub fn end_recovery_session(
        &self,
        id: i64,
        ended_at: i64,
        relapse_notes: Option<&str>,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE recovery_sessions
             SET is_active = 0, ended_at = ?1, relapse_notes = ?2
             WHERE id = ?3 AND is_active = 1",
            params![ended_at, relapse_notes, id],
        )?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Daily check-ins
    // -----------------------------------------------------------------------

    /// Insert or update the check-in for (user, date). Returns the stored row
    /// and whether it was newly created (false = same-day update).
    pub fn upsert_checkin(
        &self,
        user_id: i64,
        checkin_date: &str,
        mood: i64,
        energy: Option<i64>,
        stress: Option<i64>,
        notes: Option<&str>,
        now: i64,
    ) -> Result<(DailyCheckinRow, bool), StorageError> {
        let existing = self.get_checkin(user_id, checkin_date)?;
        self.conn.execute(
            "INSERT INTO daily_checkins
             (user_id, checkin_date, mood, energy, stress, notes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, checkin_date) DO UPDATE SET
                 mood = excluded.mood,
                 energy = excluded.energy,
                 stress = excluded.stress,
                 notes = excluded.notes,
                 updated_at = excluded.updated_at",
            params![user_id, checkin_date, mood, energy, stress, notes, now],
        )?;
        let stored = self
            .get_checkin(user_id, checkin_date)?
            .ok_or_else(|| StorageError::NotFound(format!("checkin {checkin_date}")))?;
        Ok((stored, existing.is_none()))
    }

    pub fn get_checkin(
        &self,
        user_id: i64,
        checkin_date: &str,
    ) -> Result<Option<DailyCheckinRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, checkin_date, mood, energy, stress, notes, updated_at
             FROM daily_checkins WHERE user_id = ?1 AND checkin_date = ?2",
        )?;
        let row = stmt
            .query_row(params![user_id, checkin_date], |row| {
                Ok(DailyCheckinRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    checkin_date: row.get(2)?,
                    mood: row.get(3)?,
                    energy: row.get(4)?,
                    stress: row.get(5)?,
                    notes: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn count_checkins(&self, user_id: i64) -> Result<i64, StorageError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM daily_checkins WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Community posts
    // -----------------------------------------------------------------------

    pub fn insert_post(
        &self,
        user_id: i64,
        content: &str,
        category: &str,
        now: i64,
    ) -> Result<CommunityPostRow, StorageError> {
        self.conn.execute(
            "INSERT INTO community_posts (user_id, content, category, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, content, category, now],
        )?;
        Ok(CommunityPostRow {
            id: self.conn.last_insert_rowid(),
            user_id,
            content: content.to_string(),
            category: category.to_string(),
            created_at: now,
        })
    }

    /// Recent posts joined with author usernames, newest first.
    pub fn list_posts(
        &self,
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<CommunityPostView>, StorageError> {
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(CommunityPostView {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                content: row.get(3)?,
                category: row.get(4)?,
                created_at: row.get(5)?,
            })
        };
        let mut result = Vec::new();
        match category {
            Some(category) => {
                let mut stmt = self.conn.prepare(
                    "SELECT p.id, p.user_id, u.username, p.content, p.category, p.created_at
                     FROM community_posts p JOIN users u ON u.id = p.user_id
                     WHERE p.category = ?1
                     ORDER BY p.created_at DESC, p.id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![category, limit as i64], map_row)?;
                for row in rows {
                    result.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT p.id, p.user_id, u.username, p.content, p.category, p.created_at
                     FROM community_posts p JOIN users u ON u.id = p.user_id
                     ORDER BY p.created_at DESC, p.id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], map_row)?;
                for row in rows {
                    result.push(row?);
                }
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Points
    // -----------------------------------------------------------------------

    pub fn get_points(&self, user_id: i64) -> Result<Option<UserPointsRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, total_points, level, updated_at
             FROM user_points WHERE user_id = ?1",
        )?;
        let row = stmt
            .query_row(params![user_id], |row| {
                Ok(UserPointsRow {
                    user_id: row.get(0)?,
                    total_points: row.get(1)?,
                    level: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Push tokens
    // -----------------------------------------------------------------------

    /// Register a device token. Re-registering an existing token reassigns it
    /// to the given user (a device changed accounts).
    pub fn upsert_push_token(
        &self,
        user_id: i64,
        token: &str,
        platform: Option<&str>,
        now: i64,
    ) -> Result<PushTokenRow, StorageError> {
        self.conn.execute(
            "INSERT INTO push_tokens (user_id, token, platform, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(token) DO UPDATE SET
                 user_id = excluded.user_id,
                 platform = excluded.platform",
            params![user_id, token, platform, now],
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, token, platform, created_at
             FROM push_tokens WHERE token = ?1",
        )?;
        let row = stmt.query_row(params![token], |row| {
            Ok(PushTokenRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                token: row.get(2)?,
                platform: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(row)
    }

    pub fn list_push_tokens(&self, user_id: i64) -> Result<Vec<PushTokenRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, token, platform, created_at
             FROM push_tokens WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(PushTokenRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                token: row.get(2)?,
                platform: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Drop a token the gateway reported as no longer registered.
    pub fn delete_push_token(&self, token: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM push_tokens WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Notification log
    // -----------------------------------------------------------------------

    pub fn insert_notification(
        &self,
        user_id: i64,
        title: &str,
        body: &str,
        data: Option<&str>,
        status: &str,
        now: i64,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO notifications (user_id, title, body, data, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user_id, title, body, data, status, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_notifications(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, body, data, status, created_at
             FROM notifications WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok(NotificationRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                title: row.get(2)?,
                body: row.get(3)?,
                data: row.get(4)?,
                status: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecoverySessionRow> {
    Ok(RecoverySessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        addiction_type: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        relapse_notes: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> Storage {
        Storage::open_in_memory().unwrap()
    }

    fn seed_user(storage: &Storage, email: &str, username: &str) -> UserRow {
        storage
            .insert_user(email, username, "salt:key", 1_000)
            .unwrap()
    }

    #[test]
    fn test_user_crud() {
        let storage = test_storage();

        assert!(storage.get_user_by_email("a@b.c").unwrap().is_none());

        let user = seed_user(&storage, "a@b.c", "alice");
        assert_eq!(user.id, 1);
        assert!(user.is_active);

        let loaded = storage.get_user(user.id).unwrap().unwrap();
        assert_eq!(loaded.email, "a@b.c");
        assert_eq!(loaded.username, "alice");

        let by_name = storage.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);

        // Duplicate email rejected
        let dup = storage.insert_user("a@b.c", "other", "salt:key", 1_001);
        assert!(matches!(dup, Err(StorageError::AlreadyExists(_))));

        // Deactivation flips the flag, row stays
        assert!(storage.set_user_active(user.id, false).unwrap());
        let loaded = storage.get_user(user.id).unwrap().unwrap();
        assert!(!loaded.is_active);
        assert_eq!(storage.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_complete_task_awards_points_atomically() {
        let storage = test_storage();
        let user = seed_user(&storage, "a@b.c", "alice");
        let task = storage
            .insert_task("Walk", None, "exercise", 20, true, 1_000)
            .unwrap();

        let outcome = storage
            .complete_task(user.id, task.id, "2026-08-21", 2_000)
            .unwrap();
        assert_eq!(outcome.points_earned, 20);
        assert_eq!(outcome.total_points, 20);
        assert_eq!(outcome.level, 1);
        assert!(!outcome.level_up);

        let points = storage.get_points(user.id).unwrap().unwrap();
        assert_eq!(points.total_points, 20);
        assert_eq!(points.level, 1);
        assert_eq!(storage.count_completions(user.id).unwrap(), 1);
    }

    #[test]
    fn test_double_completion_conflicts_and_leaves_points_alone() {
        let storage = test_storage();
        let user = seed_user(&storage, "a@b.c", "alice");
        let task = storage
            .insert_task("Walk", None, "exercise", 20, true, 1_000)
            .unwrap();

        storage
            .complete_task(user.id, task.id, "2026-08-21", 2_000)
            .unwrap();
        let second = storage.complete_task(user.id, task.id, "2026-08-21", 2_100);
        assert!(matches!(second, Err(StorageError::AlreadyExists(_))));

        let points = storage.get_points(user.id).unwrap().unwrap();
        assert_eq!(points.total_points, 20);
        assert_eq!(storage.count_completions(user.id).unwrap(), 1);

        // A different date is a fresh completion
        storage
            .complete_task(user.id, task.id, "2026-08-22", 3_000)
            .unwrap();
        assert_eq!(storage.count_completions(user.id).unwrap(), 2);
    }

    #[test]
    fn test_completion_crosses_level_threshold() {
        let storage = test_storage();
        let user = seed_user(&storage, "a@b.c", "alice");
        let filler = storage
            .insert_task("Filler", None, "general", 480, false, 1_000)
            .unwrap();
        let task = storage
            .insert_task("Walk", None, "exercise", 20, true, 1_000)
            .unwrap();

        storage
            .complete_task(user.id, filler.id, "2026-08-20", 1_500)
            .unwrap();
        let outcome = storage
            .complete_task(user.id, task.id, "2026-08-21", 2_000)
            .unwrap();
        assert_eq!(outcome.points_earned, 20);
        assert_eq!(outcome.total_points, 500);
        assert_eq!(outcome.level, 5);
        assert!(outcome.level_up);

        let points = storage.get_points(user.id).unwrap().unwrap();
        assert_eq!(points.level, 5);
    }

    #[test]
    fn test_completing_missing_or_inactive_task_is_not_found() {
        let storage = test_storage();
        let user = seed_user(&storage, "a@b.c", "alice");

        let missing = storage.complete_task(user.id, 99, "2026-08-21", 2_000);
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
        assert!(storage.get_points(user.id).unwrap().is_none());
    }

    #[test]
    fn test_checkin_upsert_same_day() {
        let storage = test_storage();
        let user = seed_user(&storage, "a@b.c", "alice");

        let (first, created) = storage
            .upsert_checkin(user.id, "2026-08-21", 4, Some(6), None, Some("rough"), 2_000)
            .unwrap();
        assert!(created);
        assert_eq!(first.mood, 4);

        let (second, created) = storage
            .upsert_checkin(user.id, "2026-08-21", 7, None, Some(3), None, 2_500)
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.mood, 7);
        assert_eq!(second.energy, None);
        assert_eq!(second.stress, Some(3));
        assert_eq!(storage.count_checkins(user.id).unwrap(), 1);

        // A different day is a new row
        let (_, created) = storage
            .upsert_checkin(user.id, "2026-08-22", 8, None, None, None, 3_000)
            .unwrap();
        assert!(created);
        assert_eq!(storage.count_checkins(user.id).unwrap(), 2);
    }

    #[test]
    fn test_one_active_recovery_session_per_type() {
        let storage = test_storage();
        let user = seed_user(&storage, "a@b.c", "alice");

        let session = storage
            .insert_recovery_session(user.id, "alcohol", 1_000)
            .unwrap();
        let dup = storage.insert_recovery_session(user.id, "alcohol", 1_100);
        assert!(matches!(dup, Err(StorageError::AlreadyExists(_))));

        // A different type can run in parallel
        storage
            .insert_recovery_session(user.id, "nicotine", 1_200)
            .unwrap();
        assert_eq!(storage.list_active_sessions(user.id).unwrap().len(), 2);

        // Ending the session frees the slot
        assert!(storage
            .end_recovery_session(session.id, 2_000, Some("slipped"))
            .unwrap());
        assert!(storage
            .get_active_session(user.id, "alcohol")
            .unwrap()
            .is_none());
        storage
            .insert_recovery_session(user.id, "alcohol", 2_500)
            .unwrap();

        let all = storage.list_sessions(user.id).unwrap();
        assert_eq!(all.len(), 3);
        let ended: Vec<_> = all.iter().filter(|s| !s.is_active).collect();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].relapse_notes.as_deref(), Some("slipped"));
    }

    #[test]
    fn test_posts_join_author_and_filter() {
        let storage = test_storage();
        let alice = seed_user(&storage, "a@b.c", "alice");
        let bob = seed_user(&storage, "b@b.c", "bob");

        storage
            .insert_post(alice.id, "one day at a time", "general", 1_000)
            .unwrap();
        storage
            .insert_post(bob.id, "day 30 today", "milestone", 2_000)
            .unwrap();

        let all = storage.list_posts(None, 50).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].username, "bob"); // newest first
        assert_eq!(all[1].username, "alice");

        let milestones = storage.list_posts(Some("milestone"), 50).unwrap();
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].content, "day 30 today");
    }

    #[test]
    fn test_push_token_reassignment() {
        let storage = test_storage();
        let alice = seed_user(&storage, "a@b.c", "alice");
        let bob = seed_user(&storage, "b@b.c", "bob");

        let token = "ExponentPushToken[abc123]";
        storage
            .upsert_push_token(alice.id, token, Some("ios"), 1_000)
            .unwrap();
        assert_eq!(storage.list_push_tokens(alice.id).unwrap().len(), 1);

        // Same device logs into another account
        storage
            .upsert_push_token(bob.id, token, Some("ios"), 2_000)
            .unwrap();
        assert!(storage.list_push_tokens(alice.id).unwrap().is_empty());
        assert_eq!(storage.list_push_tokens(bob.id).unwrap().len(), 1);

        assert!(storage.delete_push_token(token).unwrap());
        assert!(storage.list_push_tokens(bob.id).unwrap().is_empty());
    }

    #[test]
    fn test_notification_log() {
        let storage = test_storage();
        let user = seed_user(&storage, "a@b.c", "alice");

        storage
            .insert_notification(user.id, "Reminder", "Time to check in", None, "sent", 1_000)
            .unwrap();
        storage
            .insert_notification(
                user.id,
                "Milestone",
                "7 days",
                Some("{\"days\":7}"),
                "failed",
                2_000,
            )
            .unwrap();

        let log = storage.list_notifications(user.id, 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].title, "Milestone");
        assert_eq!(log[0].status, "failed");
        assert_eq!(log[1].status, "sent");
    }
}
