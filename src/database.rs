use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use crate::models::{Completion, NewTask, Tag, Task, TaskStatus, TaskTag, TaskType};
use crate::storage::LocalStorage;
use chrono::Utc;
use rusqlite::Error::InvalidParameterName;

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation: caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[DB] {}: Disk full. Free space on drive or check data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn task_from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Task> {
    let status: String = row.get(4)?;
    let task_type: String = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Todo),
        task_type: TaskType::parse(&task_type).unwrap_or(TaskType::Simple),
        total_items: row.get(6)?,
        correct_items: row.get(7)?,
        duration_seconds: row.get::<_, i64>(8)?.max(0) as u64,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

const TASK_COLUMNS: &str = "id, user_id, title, description, status, type, total_items, \
     correct_items, duration_seconds, created_at, updated_at, completed_at";

/// Local SQLite database: durable timer snapshots plus the task tables
pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Lock the connection; a poisoned mutex surfaces as an error instead of a panic
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Database mutex poisoned: {}. A panic occurred while holding the lock. \
                 Please restart the application to recover.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup: detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Database corruption detected: {}",
                integrity
            )));
        }

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| {
                warn!("[DB] Failed to enable foreign keys: {}. Continuing.", e);
            })
            .ok();

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 2;

    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS local_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
                [],
            )?;
        }

        // Migration 2: task store tables
        if current < 2 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'todo',
                type TEXT NOT NULL DEFAULT 'simple',
                total_items INTEGER,
                correct_items INTEGER,
                duration_seconds INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER
            )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT '#000000',
                created_at INTEGER NOT NULL
            )",
                [],
            )?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS task_tags (
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (task_id, tag_id)
            )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id)",
                [],
            )?;
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    // ============================================
    // LOCAL STORAGE (timer snapshots)
    // ============================================

    pub fn get_item(&self, key: &str) -> SqliteResult<Option<String>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT value FROM local_storage WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn set_item(&self, key: &str, value: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, now_ms()],
        )
        .map_err(|e| {
            log_io_error_if_any("set_item", &e);
            e
        })?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM local_storage WHERE key = ?1", params![key])
            .map_err(|e| {
                log_io_error_if_any("remove_item", &e);
                e
            })?;
        Ok(())
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> SqliteResult<Vec<String>> {
        let conn = self.lock_conn()?;
        // substr вместо LIKE: ключи могут содержать '%' и '_'
        let mut stmt = conn.prepare(
            "SELECT key FROM local_storage WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    // ============================================
    // TASKS
    // ============================================

    pub fn insert_task(&self, user_id: &str, task: &NewTask) -> SqliteResult<String> {
        let mut conn = self.lock_conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();

        // Задача и её теги в одной транзакции
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO tasks (id, user_id, title, description, status, type, total_items,
                                duration_seconds, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'todo', ?5, ?6, 0, ?7, ?7)",
            params![
                id,
                user_id,
                task.title,
                task.description,
                task.task_type.as_str(),
                task.total_items,
                now
            ],
        )?;
        for tag_id in &task.tag_ids {
            tx.execute(
                "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
                params![id, tag_id],
            )?;
        }
        tx.commit().map_err(|e| {
            log_io_error_if_any("insert_task commit", &e);
            e
        })?;
        Ok(id)
    }

    pub fn get_task(&self, task_id: &str) -> SqliteResult<Option<Task>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            params![task_id],
            task_from_row,
        )
        .optional()
    }

    pub fn list_tasks(&self, user_id: &str) -> SqliteResult<Vec<Task>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], task_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Returns the number of rows touched (0 when the task is not owned by `user_id`)
    pub fn update_task_status(
        &self,
        user_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> SqliteResult<usize> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
            params![status.as_str(), now_ms(), task_id, user_id],
        )
    }

    /// Marks the task done; completion time is taken from the store clock
    pub fn complete_task(
        &self,
        user_id: &str,
        task_id: &str,
        completion: &Completion,
    ) -> SqliteResult<usize> {
        let conn = self.lock_conn()?;
        let now = now_ms();
        let duration = i64::try_from(completion.duration_seconds).unwrap_or(i64::MAX);
        conn.execute(
            "UPDATE tasks
             SET status = 'done', completed_at = ?1, updated_at = ?1,
                 duration_seconds = ?2, correct_items = ?3
             WHERE id = ?4 AND user_id = ?5",
            params![now, duration, completion.correct_items, task_id, user_id],
        )
        .map_err(|e| {
            log_io_error_if_any("complete_task", &e);
            e
        })
    }

    pub fn delete_task(&self, user_id: &str, task_id: &str) -> SqliteResult<usize> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, user_id],
        )
    }

    // ============================================
    // TAGS
    // ============================================

    pub fn insert_tag(&self, user_id: &str, name: &str, color: &str) -> SqliteResult<Tag> {
        let conn = self.lock_conn()?;
        let tag = Tag {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            created_at: now_ms(),
        };
        conn.execute(
            "INSERT INTO tags (id, user_id, name, color, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tag.id, tag.user_id, tag.name, tag.color, tag.created_at],
        )?;
        Ok(tag)
    }

    pub fn list_tags(&self, user_id: &str) -> SqliteResult<Vec<Tag>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, color, created_at FROM tags
             WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(Tag {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                color: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn tags_for_tasks(&self, task_ids: &[String]) -> SqliteResult<Vec<TaskTag>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = vec!["?"; task_ids.len()].join(", ");
        let sql = format!(
            "SELECT tt.task_id, tt.tag_id, t.name, t.color
             FROM task_tags tt INNER JOIN tags t ON tt.tag_id = t.id
             WHERE tt.task_id IN ({})
             ORDER BY tt.task_id, t.name",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(task_ids.iter()), |row| {
            Ok(TaskTag {
                task_id: row.get(0)?,
                tag_id: row.get(1)?,
                name: row.get(2)?,
                color: row.get(3)?,
            })
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

impl LocalStorage for Database {
    fn get_item(&self, key: &str) -> Result<Option<String>, String> {
        Database::get_item(self, key).map_err(|e| format!("Failed to read {}: {}", key, e))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), String> {
        Database::set_item(self, key, value).map_err(|e| format!("Failed to write {}: {}", key, e))
    }

    fn remove_item(&self, key: &str) -> Result<(), String> {
        Database::remove_item(self, key).map_err(|e| format!("Failed to remove {}: {}", key, e))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, String> {
        Database::keys_with_prefix(self, prefix)
            .map_err(|e| format!("Failed to scan keys {}*: {}", prefix, e))
    }
}
