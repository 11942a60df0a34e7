//! Task Store: CRUD and completion for task records.
//! Every operation needs an authenticated session and only touches the
//! caller's own rows.

use crate::database::Database;
use crate::engine::CompletionHandler;
use crate::models::{Completion, NewTask, Session, Tag, Task, TaskStatus, TaskTag, TaskType};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("DB: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

/// Операции, которые потребляют координатор (через completion) и UI
pub trait TaskStore: Send + Sync {
    fn create(&self, session: Option<&Session>, task: NewTask) -> TaskStoreResult<String>;
    fn set_status(
        &self,
        session: Option<&Session>,
        task_id: &str,
        status: TaskStatus,
    ) -> TaskStoreResult<()>;
    fn complete(
        &self,
        session: Option<&Session>,
        task_id: &str,
        completion: Completion,
    ) -> TaskStoreResult<()>;
    fn delete(&self, session: Option<&Session>, task_id: &str) -> TaskStoreResult<()>;
}

fn require_session(session: Option<&Session>) -> TaskStoreResult<&Session> {
    session.ok_or(TaskStoreError::Unauthorized)
}

/// Проверка результата до завершения таймера: после complete запись уже удалена
/// question_set требует число правильных ответов в пределах total_items
pub fn validate_completion(task: &Task, correct_items: Option<i64>) -> TaskStoreResult<()> {
    if let Some(correct) = correct_items {
        if correct < 0 {
            return Err(TaskStoreError::InvalidInput(
                "correct items cannot be negative".to_string(),
            ));
        }
    }
    if task.task_type != TaskType::QuestionSet {
        return Ok(());
    }
    let Some(correct) = correct_items else {
        return Err(TaskStoreError::InvalidInput(
            "question set needs the number of correct items".to_string(),
        ));
    };
    let total = task.total_items.unwrap_or(0);
    if correct > total {
        return Err(TaskStoreError::InvalidInput(format!(
            "correct items ({}) exceed total items ({})",
            correct, total
        )));
    }
    Ok(())
}

/// Task store backed by the local SQLite database
#[derive(Clone)]
pub struct SqliteTaskStore {
    db: Arc<Database>,
}

impl SqliteTaskStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 0 затронутых строк: задачи нет (NotFound) или она чужая (Unauthorized)
    fn ensure_touched(&self, touched: usize, task_id: &str) -> TaskStoreResult<()> {
        if touched > 0 {
            return Ok(());
        }
        match self.db.get_task(task_id)? {
            Some(_) => Err(TaskStoreError::Unauthorized),
            None => Err(TaskStoreError::NotFound(task_id.to_string())),
        }
    }

    pub fn get(&self, session: Option<&Session>, task_id: &str) -> TaskStoreResult<Task> {
        let session = require_session(session)?;
        match self.db.get_task(task_id)? {
            Some(task) if task.user_id == session.user_id => Ok(task),
            Some(_) => Err(TaskStoreError::Unauthorized),
            None => Err(TaskStoreError::NotFound(task_id.to_string())),
        }
    }

    /// Задачи пользователя, новые первыми
    pub fn list(&self, session: Option<&Session>) -> TaskStoreResult<Vec<Task>> {
        let session = require_session(session)?;
        Ok(self.db.list_tasks(&session.user_id)?)
    }

    pub fn create_tag(
        &self,
        session: Option<&Session>,
        name: &str,
        color: &str,
    ) -> TaskStoreResult<Tag> {
        let session = require_session(session)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TaskStoreError::InvalidInput("tag name is empty".to_string()));
        }
        Ok(self.db.insert_tag(&session.user_id, name, color)?)
    }

    pub fn list_tags(&self, session: Option<&Session>) -> TaskStoreResult<Vec<Tag>> {
        let session = require_session(session)?;
        Ok(self.db.list_tags(&session.user_id)?)
    }

    pub fn task_tags(&self, task_ids: &[String]) -> TaskStoreResult<Vec<TaskTag>> {
        Ok(self.db.tags_for_tasks(task_ids)?)
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, session: Option<&Session>, task: NewTask) -> TaskStoreResult<String> {
        let session = require_session(session)?;
        if task.title.trim().is_empty() {
            return Err(TaskStoreError::InvalidInput("title is empty".to_string()));
        }
        if task.task_type == TaskType::QuestionSet && task.total_items <= 0 {
            return Err(TaskStoreError::InvalidInput(
                "question set needs at least one item".to_string(),
            ));
        }
        let id = self.db.insert_task(&session.user_id, &task)?;
        info!("[TASKS] Created {} ({})", id, task.task_type.as_str());
        Ok(id)
    }

    fn set_status(
        &self,
        session: Option<&Session>,
        task_id: &str,
        status: TaskStatus,
    ) -> TaskStoreResult<()> {
        let session = require_session(session)?;
        let touched = self
            .db
            .update_task_status(&session.user_id, task_id, status)?;
        self.ensure_touched(touched, task_id)
    }

    fn complete(
        &self,
        session: Option<&Session>,
        task_id: &str,
        completion: Completion,
    ) -> TaskStoreResult<()> {
        let session = require_session(session)?;
        let task = self.get(Some(session), task_id)?;
        validate_completion(&task, completion.correct_items)?;
        let touched = self
            .db
            .complete_task(&session.user_id, task_id, &completion)?;
        self.ensure_touched(touched, task_id)?;
        info!(
            "[TASKS] Completed {} in {}s",
            task_id, completion.duration_seconds
        );
        Ok(())
    }

    fn delete(&self, session: Option<&Session>, task_id: &str) -> TaskStoreResult<()> {
        let session = require_session(session)?;
        let touched = self.db.delete_task(&session.user_id, task_id)?;
        self.ensure_touched(touched, task_id)
    }
}

/// Обработчик завершения таймера: пересылает elapsed в Task Store
/// Ошибка пересылки только логируется - таймер уже удалён и не воскрешается
pub fn completion_forwarder(
    store: Arc<dyn TaskStore>,
    session: Option<Session>,
    correct_items: Option<i64>,
) -> CompletionHandler {
    Box::new(move |task_id: &str, elapsed_seconds: u64| {
        let completion = Completion {
            duration_seconds: elapsed_seconds,
            correct_items,
        };
        if let Err(e) = store.complete(session.as_ref(), task_id, completion) {
            error!("[TASKS] Failed to complete task {}: {}", task_id, e);
        }
    })
}
