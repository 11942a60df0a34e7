use serde::{Deserialize, Serialize};

/// Статус задачи
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

/// Тип задачи: простая, набор вопросов (с оценкой точности) или другое
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Simple,
    QuestionSet,
    Other,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Simple => "simple",
            TaskType::QuestionSet => "question_set",
            TaskType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "simple" => Some(TaskType::Simple),
            "question_set" => Some(TaskType::QuestionSet),
            "other" => Some(TaskType::Other),
            _ => None,
        }
    }
}

/// Задача пользователя
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub task_type: TaskType,
    pub total_items: Option<i64>,
    pub correct_items: Option<i64>,
    pub duration_seconds: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Task {
    /// Точность в процентах, округлённая до целого (только для question_set с известным total)
    pub fn accuracy(&self) -> Option<f64> {
        if self.task_type != TaskType::QuestionSet {
            return None;
        }
        match (self.correct_items, self.total_items) {
            (Some(correct), Some(total)) if total > 0 => {
                Some((correct as f64 * 100.0 / total as f64).round())
            }
            _ => None,
        }
    }
}

/// Данные для создания задачи
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub total_items: i64,
    pub tag_ids: Vec<String>,
}

/// Результат завершения задачи
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Completion {
    pub duration_seconds: u64,
    pub correct_items: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub created_at: i64,
}

/// Тег, привязанный к задаче (результат join task_tags + tags)
#[derive(Debug, Clone, Serialize)]
pub struct TaskTag {
    pub task_id: String,
    pub tag_id: String,
    pub name: String,
    pub color: String,
}

/// Аутентифицированная сессия (валидируется внешним auth сервисом)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}
