//! Text command surface over the coordinator and the task store.
//! Each command registers the task's timer before controlling it, the same
//! way a task card registers on every mount.

use crate::engine::{TimerCoordinator, TimerHandle, TimerView};
use crate::format::format_elapsed;
use crate::models::{NewTask, Session, Task, TaskStatus, TaskTag, TaskType};
use crate::tasks::{completion_forwarder, validate_completion, SqliteTaskStore, TaskStore};
use std::sync::Arc;
use tracing::warn;

const DEFAULT_TAG_COLOR: &str = "#000000";

pub const HELP: &str = "\
commands:
  add <title> [#tag..] [-- description]
                              create a simple task
  add-qs <total> <title> [#tag..] [-- description]
                              create a question set with <total> items
  tasks                       list tasks
  delete <id>                 delete the task and drop its timer
  tag <name> [color]          create a tag (default color #000000)
  tags                        list tags
  start <id>                  start the task timer (pauses any other)
  pause <id>                  pause the task timer
  reset <id>                  reset the task timer
  complete <id> [correct]     complete the task with the timer's elapsed time
  status [id]                 show the active (or given) timer
  toggle                      pause/resume the active timer
  reset-active                reset the active timer
  complete-active [correct]   complete the active timer
  help                        show this help
  quit                        save and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(TaskDraft),
    AddQuestionSet { total: i64, draft: TaskDraft },
    Tasks,
    Delete(String),
    Tag { name: String, color: Option<String> },
    Tags,
    Start(String),
    Pause(String),
    Reset(String),
    Complete { id: String, correct: Option<i64> },
    Status(Option<String>),
    Toggle,
    ResetActive,
    CompleteActive { correct: Option<i64> },
    Help,
    Quit,
}

/// Заголовок, имена тегов (`#name`) и описание после `--`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl TaskDraft {
    fn parse(text: &str) -> Option<Self> {
        let (head, description) = match text.split_once(" -- ") {
            Some((head, description)) => (head, description.trim()),
            None => (text.strip_suffix(" --").unwrap_or(text), ""),
        };
        let mut title = Vec::new();
        let mut tags = Vec::new();
        for word in head.split_whitespace() {
            match word.strip_prefix('#') {
                Some(tag) if !tag.is_empty() => tags.push(tag.to_string()),
                _ => title.push(word),
            }
        }
        if title.is_empty() {
            return None;
        }
        Some(Self {
            title: title.join(" "),
            description: description.to_string(),
            tags,
        })
    }
}

fn parse_number(value: &str, what: &str) -> Result<i64, String> {
    value
        .parse::<i64>()
        .map_err(|_| format!("{} must be a number, got '{}'", what, value))
}

fn parse_correct(value: Option<&str>) -> Result<Option<i64>, String> {
    value.map(|v| parse_number(v, "correct")).transpose()
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();

        let require_id = |id: Option<&str>| -> Result<String, String> {
            id.map(str::to_string)
                .ok_or_else(|| format!("usage: {} <id>", name))
        };

        match name {
            "add" => TaskDraft::parse(rest)
                .map(Command::Add)
                .ok_or_else(|| "usage: add <title> [#tag..] [-- description]".to_string()),
            "add-qs" => {
                let usage = "usage: add-qs <total> <title> [#tag..] [-- description]";
                let (total, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if total.is_empty() {
                    return Err(usage.to_string());
                }
                let total = parse_number(total, "total")?;
                let draft = TaskDraft::parse(text.trim()).ok_or_else(|| usage.to_string())?;
                Ok(Command::AddQuestionSet { total, draft })
            }
            "tasks" | "ls" => Ok(Command::Tasks),
            "delete" | "rm" => Ok(Command::Delete(require_id(args.next())?)),
            "tag" => {
                let tag_name = args
                    .next()
                    .ok_or_else(|| "usage: tag <name> [color]".to_string())?;
                Ok(Command::Tag {
                    name: tag_name.to_string(),
                    color: args.next().map(str::to_string),
                })
            }
            "tags" => Ok(Command::Tags),
            "start" => Ok(Command::Start(require_id(args.next())?)),
            "pause" => Ok(Command::Pause(require_id(args.next())?)),
            "reset" => Ok(Command::Reset(require_id(args.next())?)),
            "complete" | "done" => {
                let id = require_id(args.next())?;
                let correct = parse_correct(args.next())?;
                Ok(Command::Complete { id, correct })
            }
            "status" => Ok(Command::Status(args.next().map(str::to_string))),
            "toggle" => Ok(Command::Toggle),
            "reset-active" => Ok(Command::ResetActive),
            "complete-active" => Ok(Command::CompleteActive {
                correct: parse_correct(args.next())?,
            }),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

/// Presentation-layer state: coordinator, task store and the current session
pub struct CommandContext {
    pub coordinator: TimerCoordinator,
    pub store: Arc<SqliteTaskStore>,
    pub session: Option<Session>,
}

fn describe_view(view: &TimerView) -> String {
    format!(
        "{} {} [{}] {}",
        if view.is_running { "▶" } else { "⏸" },
        format_elapsed(view.elapsed_seconds),
        view.task_id,
        view.task_title
    )
}

impl CommandContext {
    pub fn new(
        coordinator: TimerCoordinator,
        store: Arc<SqliteTaskStore>,
        session: Option<Session>,
    ) -> Self {
        Self {
            coordinator,
            store,
            session,
        }
    }

    /// Full id or a unique prefix of one of the user's tasks
    fn resolve_task(&self, id_or_prefix: &str) -> Result<Task, String> {
        let tasks = self
            .store
            .list(self.session.as_ref())
            .map_err(|e| e.to_string())?;
        if let Some(task) = tasks.iter().find(|t| t.id == id_or_prefix) {
            return Ok(task.clone());
        }
        let mut matches = tasks.into_iter().filter(|t| t.id.starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task),
            (Some(_), Some(_)) => Err(format!("ambiguous task id '{}'", id_or_prefix)),
            (None, _) => Err(format!("no task '{}'", id_or_prefix)),
        }
    }

    /// Регистрация при каждом обращении (идемпотентно), как карточка задачи при mount
    fn register(&self, task: &Task, correct_items: Option<i64>) -> TimerHandle {
        let store: Arc<dyn TaskStore> = self.store.clone();
        self.coordinator.register(
            &task.id,
            &task.title,
            task.duration_seconds,
            Some(completion_forwarder(
                store,
                self.session.clone(),
                correct_items,
            )),
        )
    }

    fn short_id(id: &str) -> &str {
        id.get(..8).unwrap_or(id)
    }

    pub fn execute(&self, command: Command) -> Result<String, String> {
        match command {
            Command::Add(draft) => self.create(draft, TaskType::Simple, 0),
            Command::AddQuestionSet { total, draft } => {
                self.create(draft, TaskType::QuestionSet, total)
            }
            Command::Tasks => self.list_tasks(),
            Command::Delete(id) => {
                let task = self.resolve_task(&id)?;
                self.store
                    .delete(self.session.as_ref(), &task.id)
                    .map_err(|e| e.to_string())?;
                // Без обработчика: завершать в Task Store уже нечего, снапшот удаляется
                self.coordinator
                    .register(&task.id, &task.title, task.duration_seconds, None)
                    .complete();
                Ok(format!("deleted {}", task.title))
            }
            Command::Tag { name, color } => {
                let tag = self
                    .store
                    .create_tag(
                        self.session.as_ref(),
                        &name,
                        color.as_deref().unwrap_or(DEFAULT_TAG_COLOR),
                    )
                    .map_err(|e| e.to_string())?;
                Ok(format!("created tag {} ({})", tag.name, tag.color))
            }
            Command::Tags => {
                let tags = self
                    .store
                    .list_tags(self.session.as_ref())
                    .map_err(|e| e.to_string())?;
                if tags.is_empty() {
                    return Ok("no tags".to_string());
                }
                Ok(tags
                    .iter()
                    .map(|t| format!("#{} {}", t.name, t.color))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Command::Start(id) => {
                let task = self.resolve_task(&id)?;
                let handle = self.register(&task, None);
                handle.start();
                if task.status != TaskStatus::InProgress {
                    if let Err(e) = self.store.set_status(
                        self.session.as_ref(),
                        &task.id,
                        TaskStatus::InProgress,
                    ) {
                        warn!("[TASKS] Failed to mark {} in progress: {}", task.id, e);
                    }
                }
                Ok(format!("started {}", task.title))
            }
            Command::Pause(id) => {
                let task = self.resolve_task(&id)?;
                let handle = self.register(&task, None);
                handle.pause();
                Ok(format!(
                    "paused {} at {}",
                    task.title,
                    format_elapsed(handle.elapsed_seconds())
                ))
            }
            Command::Reset(id) => {
                let task = self.resolve_task(&id)?;
                let handle = self.register(&task, None);
                handle.reset();
                Ok(format!(
                    "reset {} to {}",
                    task.title,
                    format_elapsed(handle.elapsed_seconds())
                ))
            }
            Command::Complete { id, correct } => {
                let task = self.resolve_task(&id)?;
                validate_completion(&task, correct).map_err(|e| e.to_string())?;
                let handle = self.register(&task, correct);
                let elapsed = handle.complete().unwrap_or(task.duration_seconds);
                Ok(format!(
                    "completed {} in {}",
                    task.title,
                    format_elapsed(elapsed)
                ))
            }
            Command::Status(Some(id)) => {
                let task = self.resolve_task(&id)?;
                Ok(match self.coordinator.get_timer_state(&task.id) {
                    Some(view) => describe_view(&view),
                    None => format!("no timer for {}", task.title),
                })
            }
            Command::Status(None) => Ok(match self.coordinator.get_active_timer_state() {
                Some(view) => describe_view(&view),
                None => "no active timer".to_string(),
            }),
            Command::Toggle => {
                self.coordinator.toggle_active_timer();
                self.execute(Command::Status(None))
            }
            Command::ResetActive => {
                self.coordinator.reset_active_timer();
                Ok("active timer reset".to_string())
            }
            Command::CompleteActive { correct } => {
                let Some(active) = self.coordinator.active_timer_id() else {
                    return Ok("no active timer".to_string());
                };
                // Восстановленные после перезагрузки таймеры не имеют обработчика
                if let Ok(task) = self.resolve_task(&active) {
                    validate_completion(&task, correct).map_err(|e| e.to_string())?;
                    self.register(&task, correct);
                }
                match self.coordinator.complete_active_timer() {
                    Some(elapsed) => Ok(format!("completed in {}", format_elapsed(elapsed))),
                    None => Ok("no active timer".to_string()),
                }
            }
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok("bye".to_string()),
        }
    }

    fn create(&self, draft: TaskDraft, task_type: TaskType, total: i64) -> Result<String, String> {
        let tag_ids = if draft.tags.is_empty() {
            Vec::new()
        } else {
            let known = self
                .store
                .list_tags(self.session.as_ref())
                .map_err(|e| e.to_string())?;
            draft
                .tags
                .iter()
                .map(|name| {
                    known
                        .iter()
                        .find(|t| t.name.eq_ignore_ascii_case(name))
                        .map(|t| t.id.clone())
                        .ok_or_else(|| format!("no tag '{}', create it with 'tag {}'", name, name))
                })
                .collect::<Result<Vec<_>, String>>()?
        };
        let id = self
            .store
            .create(
                self.session.as_ref(),
                NewTask {
                    title: draft.title,
                    description: draft.description,
                    task_type,
                    total_items: total,
                    tag_ids,
                },
            )
            .map_err(|e| e.to_string())?;
        Ok(format!("created {}", id))
    }

    fn list_tasks(&self) -> Result<String, String> {
        let tasks = self
            .store
            .list(self.session.as_ref())
            .map_err(|e| e.to_string())?;
        if tasks.is_empty() {
            return Ok("no tasks".to_string());
        }
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let task_tags: Vec<TaskTag> = self.store.task_tags(&ids).map_err(|e| e.to_string())?;
        let lines: Vec<String> = tasks
            .iter()
            .map(|task| {
                let timer = self
                    .coordinator
                    .get_timer_state(&task.id)
                    .map(|v| format!(" timer={}", format_elapsed(v.elapsed_seconds)))
                    .unwrap_or_default();
                let accuracy = task
                    .accuracy()
                    .map(|a| format!(" accuracy={:.0}%", a))
                    .unwrap_or_default();
                let tags: String = task_tags
                    .iter()
                    .filter(|t| t.task_id == task.id)
                    .map(|t| format!(" #{}", t.name))
                    .collect();
                format!(
                    "{}  {:<11} {:<12} {}{} duration={}{}{}",
                    Self::short_id(&task.id),
                    task.status.as_str(),
                    task.task_type.as_str(),
                    task.title,
                    tags,
                    format_elapsed(task.duration_seconds),
                    timer,
                    accuracy
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}
