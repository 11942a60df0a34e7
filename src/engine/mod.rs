use crate::clock::{whole_seconds_between, Clock};
use crate::storage::LocalStorage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;
mod core;
mod db;
mod poll;

pub use poll::spawn_active_timer_poller;

/// Префикс ключей снапшотов в durable storage
pub const STORAGE_KEY_PREFIX: &str = "task-timer-";
/// Ключ указателя на последний активный таймер
pub const LAST_ACTIVE_KEY: &str = "last-active-timer";
/// Снапшоты старше окна удержания (1 час) считаются устаревшими
pub const RETENTION_WINDOW_MS: i64 = 60 * 60 * 1000;
/// Заголовок для восстановленного снапшота без title
pub const DEFAULT_TASK_TITLE: &str = "Task";

/// Одноразовый обработчик завершения: (task_id, elapsed_seconds)
/// Повторная регистрация заменяет обработчик, а не добавляет второй
pub type CompletionHandler = Box<dyn FnOnce(&str, u64) + Send>;

/// Timer Coordinator - реестр таймеров задач
/// Инвариант: не более одной записи с `started_at != None` в любой момент
/// Все операции синхронные и атомарны через один Mutex
#[derive(Clone)]
pub struct TimerCoordinator {
    pub(crate) registry: Arc<Mutex<Registry>>,
    /// Durable storage (best-effort, память - источник истины до перезагрузки)
    pub(crate) storage: Arc<dyn LocalStorage>,
    pub(crate) clock: Arc<dyn Clock>,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) timers: HashMap<String, TimerRecord>,
    /// Последний запущенный таймер; очищается при pause/reset/complete этого таймера
    pub(crate) active_timer_id: Option<String>,
}

pub(crate) struct TimerRecord {
    /// Снимок заголовка на момент регистрации
    pub(crate) task_title: String,
    /// Сумма завершённых интервалов
    pub(crate) accumulated_seconds: u64,
    /// Unix ms начала текущего интервала; None = пауза
    pub(crate) started_at: Option<i64>,
    pub(crate) last_updated: i64,
    pub(crate) initial_seconds: u64,
    pub(crate) on_complete: Option<CompletionHandler>,
}

impl TimerRecord {
    pub(crate) fn new(task_title: String, accumulated_seconds: u64, now_ms: i64) -> Self {
        Self {
            task_title,
            accumulated_seconds,
            started_at: None,
            last_updated: now_ms,
            initial_seconds: 0,
            on_complete: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Elapsed всегда выводится из wall-clock, никогда не хранится во время работы
    pub(crate) fn elapsed_seconds(&self, now_ms: i64) -> u64 {
        match self.started_at {
            Some(started_at) => self
                .accumulated_seconds
                .saturating_add(whole_seconds_between(started_at, now_ms)),
            None => self.accumulated_seconds,
        }
    }

    /// Fold: живой интервал переносится в accumulated, таймер становится на паузу
    pub(crate) fn fold(&mut self, now_ms: i64) -> u64 {
        let elapsed = self.elapsed_seconds(now_ms);
        self.accumulated_seconds = elapsed;
        self.started_at = None;
        self.last_updated = now_ms;
        elapsed
    }

    pub(crate) fn view(&self, task_id: &str, now_ms: i64) -> TimerView {
        TimerView {
            task_id: task_id.to_string(),
            task_title: self.task_title.clone(),
            elapsed_seconds: self.elapsed_seconds(now_ms),
            is_running: self.is_running(),
            last_updated: self.last_updated,
        }
    }
}

/// Снимок состояния таймера для чтения (UI, poller)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub task_id: String,
    pub task_title: String,
    pub elapsed_seconds: u64,
    pub is_running: bool,
    pub last_updated: i64,
}

/// Снапшот в durable storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredSnapshot {
    pub(crate) elapsed_seconds: u64,
    #[serde(default)]
    pub(crate) task_title: Option<String>,
    /// Unix ms момента записи
    pub(crate) timestamp: i64,
}

/// Управление одним таймером, привязанное к task_id
/// Не даёт прямого доступа к записи - только операции координатора
#[derive(Clone)]
pub struct TimerHandle {
    coordinator: TimerCoordinator,
    task_id: String,
    initial_seconds: u64,
}

impl TimerHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_running(&self) -> bool {
        self.state().map(|s| s.is_running).unwrap_or(false)
    }

    /// Для удалённой (completed) записи возвращает 0
    pub fn elapsed_seconds(&self) -> u64 {
        self.state().map(|s| s.elapsed_seconds).unwrap_or(0)
    }

    pub fn state(&self) -> Option<TimerView> {
        self.coordinator.get_timer_state(&self.task_id)
    }

    pub fn start(&self) {
        self.coordinator.start(&self.task_id);
    }

    pub fn pause(&self) {
        self.coordinator.pause(&self.task_id);
    }

    /// Сброс к initial_seconds, переданному при регистрации этого handle
    pub fn reset(&self) {
        self.coordinator
            .reset_to(&self.task_id, Some(self.initial_seconds));
    }

    pub fn complete(&self) -> Option<u64> {
        self.coordinator.complete(&self.task_id)
    }

    pub fn update_elapsed(&self, seconds: u64) {
        self.coordinator.update_elapsed(&self.task_id, seconds);
    }
}

impl TimerCoordinator {
    /// Создать координатор и восстановить снапшоты из storage (всегда на паузе)
    pub fn new(storage: Arc<dyn LocalStorage>, clock: Arc<dyn Clock>) -> Self {
        let coordinator = Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            storage,
            clock,
        };
        coordinator.restore_state();
        coordinator
    }

    /// GUARD: poisoned mutex не должен останавливать таймеры - восстанавливаем guard
    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| {
            error!("[TIMER] Registry mutex poisoned, recovering inner state");
            poisoned.into_inner()
        })
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn handle(&self, task_id: &str, initial_seconds: u64) -> TimerHandle {
        TimerHandle {
            coordinator: self.clone(),
            task_id: task_id.to_string(),
            initial_seconds,
        }
    }
}
