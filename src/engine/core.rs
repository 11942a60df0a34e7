use crate::engine::{CompletionHandler, TimerCoordinator, TimerHandle, TimerRecord, TimerView};
use tracing::{debug, info};

impl TimerCoordinator {
    /// Зарегистрировать таймер задачи (идемпотентно)
    /// Новая запись: accumulated = снапшот из storage (если свежий) или initial_seconds
    /// Существующая запись: заменяется только обработчик завершения (и initial для reset)
    /// Ничего не пишет в storage
    pub fn register(
        &self,
        task_id: &str,
        task_title: &str,
        initial_seconds: u64,
        on_complete: Option<CompletionHandler>,
    ) -> TimerHandle {
        let exists = self.lock_registry().timers.contains_key(task_id);
        let restored = if exists {
            None
        } else {
            self.load_snapshot(task_id, self.now_ms())
        };

        let now = self.now_ms();
        let mut registry = self.lock_registry();
        match registry.timers.get_mut(task_id) {
            Some(record) => {
                record.on_complete = on_complete;
                record.initial_seconds = initial_seconds;
            }
            None => {
                let start_seconds = restored.unwrap_or(initial_seconds);
                let mut record = TimerRecord::new(task_title.to_string(), start_seconds, now);
                record.initial_seconds = initial_seconds;
                record.on_complete = on_complete;
                registry.timers.insert(task_id.to_string(), record);
                debug!(
                    "[TIMER] Registered {} ({}s, restored={})",
                    task_id,
                    start_seconds,
                    restored.is_some()
                );
            }
        }
        drop(registry);

        self.handle(task_id, initial_seconds)
    }

    /// Переход: Paused → Running
    /// Сначала ставит на паузу все остальные работающие таймеры (fold + persist)
    /// Повторный start работающего таймера - no-op
    pub fn start(&self, task_id: &str) {
        let now = self.now_ms();
        let mut registry = self.lock_registry();

        if !registry.timers.contains_key(task_id) {
            debug!("[TIMER] start({}) ignored: timer not registered", task_id);
            return;
        }

        // Single-active-timer: fold всех остальных до запуска целевого
        let mut folded = Vec::new();
        for (other_id, record) in registry.timers.iter_mut() {
            if other_id != task_id && record.is_running() {
                let elapsed = record.fold(now);
                folded.push((other_id.clone(), elapsed, record.task_title.clone()));
            }
        }

        let mut started = false;
        if let Some(record) = registry.timers.get_mut(task_id) {
            if !record.is_running() {
                record.started_at = Some(now);
                record.last_updated = now;
                started = true;
            }
        }
        if started {
            registry.active_timer_id = Some(task_id.to_string());
        }

        // Снапшоты пишутся под lock реестра
        for (other_id, elapsed, title) in &folded {
            self.save_snapshot(other_id, *elapsed, title, now);
        }
        drop(registry);

        for (other_id, elapsed, _) in &folded {
            info!(
                "[TIMER] Paused {} at {}s because {} started",
                other_id, elapsed, task_id
            );
        }
        if started {
            info!("[TIMER] Started {}", task_id);
        }
    }

    /// Переход: Running → Paused
    /// Fold живого интервала, запись снапшота и указателя last-active
    pub fn pause(&self, task_id: &str) {
        self.pause_internal(task_id, false);
    }

    /// keep_active = true: глобальный toggle оставляет таймер активным,
    /// чтобы его можно было возобновить одним действием
    pub(crate) fn pause_internal(&self, task_id: &str, keep_active: bool) {
        let now = self.now_ms();
        let mut registry = self.lock_registry();

        let (elapsed, title) = match registry.timers.get_mut(task_id) {
            Some(record) if record.is_running() => {
                let elapsed = record.fold(now);
                (elapsed, record.task_title.clone())
            }
            Some(_) => {
                debug!("[TIMER] pause({}) ignored: already paused", task_id);
                return;
            }
            None => {
                debug!("[TIMER] pause({}) ignored: timer not registered", task_id);
                return;
            }
        };

        if !keep_active && registry.active_timer_id.as_deref() == Some(task_id) {
            registry.active_timer_id = None;
        }
        self.save_snapshot(task_id, elapsed, &title, now);
        self.write_last_active(task_id);
        drop(registry);

        info!("[TIMER] Paused {} at {}s", task_id, elapsed);
    }

    /// Сброс к initial_seconds последней регистрации
    pub fn reset(&self, task_id: &str) {
        self.reset_to(task_id, None);
    }

    /// Безусловный сброс: accumulated = initial, пауза, снапшот удаляется
    /// Обработчик завершения НЕ вызывается
    pub(crate) fn reset_to(&self, task_id: &str, initial_seconds: Option<u64>) {
        let now = self.now_ms();
        let mut registry = self.lock_registry();

        let Some(record) = registry.timers.get_mut(task_id) else {
            debug!("[TIMER] reset({}) ignored: timer not registered", task_id);
            return;
        };
        let seconds = initial_seconds.unwrap_or(record.initial_seconds);
        record.accumulated_seconds = seconds;
        record.started_at = None;
        record.last_updated = now;

        if registry.active_timer_id.as_deref() == Some(task_id) {
            registry.active_timer_id = None;
        }
        self.clear_snapshot(task_id);
        drop(registry);

        info!("[TIMER] Reset {} to {}s", task_id, seconds);
    }

    /// Завершение: запись удаляется из памяти и storage ДО вызова обработчика,
    /// затем обработчик получает финальный elapsed (ровно один раз)
    /// Возвращает финальный elapsed, None если таймер не зарегистрирован
    pub fn complete(&self, task_id: &str) -> Option<u64> {
        let now = self.now_ms();
        let mut registry = self.lock_registry();

        let Some(record) = registry.timers.remove(task_id) else {
            debug!("[TIMER] complete({}) ignored: timer not registered", task_id);
            return None;
        };
        let elapsed = record.elapsed_seconds(now);
        if registry.active_timer_id.as_deref() == Some(task_id) {
            registry.active_timer_id = None;
        }
        self.clear_snapshot(task_id);
        drop(registry); // Обработчик может снова обратиться к координатору

        info!("[TIMER] Completed {} with {}s", task_id, elapsed);

        if let Some(on_complete) = record.on_complete {
            on_complete(task_id, elapsed);
        }
        Some(elapsed)
    }

    /// Прямая установка elapsed (неявная пауза)
    /// Не пишет в storage и не трогает active timer id
    pub fn update_elapsed(&self, task_id: &str, seconds: u64) {
        let now = self.now_ms();
        let mut registry = self.lock_registry();
        match registry.timers.get_mut(task_id) {
            Some(record) => {
                record.accumulated_seconds = seconds;
                record.started_at = None;
                record.last_updated = now;
            }
            None => debug!(
                "[TIMER] update_elapsed({}) ignored: timer not registered",
                task_id
            ),
        }
    }

    /// Текущее состояние любого зарегистрированного таймера (только чтение)
    pub fn get_timer_state(&self, task_id: &str) -> Option<TimerView> {
        let now = self.now_ms();
        let registry = self.lock_registry();
        registry
            .timers
            .get(task_id)
            .map(|record| record.view(task_id, now))
    }

    /// Все зарегистрированные таймеры, отсортированные по task_id
    pub fn timers(&self) -> Vec<TimerView> {
        let now = self.now_ms();
        let registry = self.lock_registry();
        let mut views: Vec<TimerView> = registry
            .timers
            .iter()
            .map(|(task_id, record)| record.view(task_id, now))
            .collect();
        views.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        views
    }

    pub fn running_count(&self) -> usize {
        self.lock_registry()
            .timers
            .values()
            .filter(|record| record.is_running())
            .count()
    }

    // ============================================
    // ACTIVE TIMER (глобальная панель управления)
    // ============================================

    pub fn active_timer_id(&self) -> Option<String> {
        self.lock_registry().active_timer_id.clone()
    }

    pub fn has_active_timer(&self) -> bool {
        self.lock_registry().active_timer_id.is_some()
    }

    pub fn get_active_timer_state(&self) -> Option<TimerView> {
        let active = self.active_timer_id()?;
        self.get_timer_state(&active)
    }

    /// Pause если работает, иначе start; no-op без активного таймера
    pub fn toggle_active_timer(&self) {
        let Some(active) = self.active_timer_id() else {
            debug!("[TIMER] toggle ignored: no active timer");
            return;
        };
        match self.get_timer_state(&active) {
            Some(view) if view.is_running => self.pause_internal(&active, true),
            Some(_) => self.start(&active),
            None => debug!("[TIMER] toggle ignored: active timer {} is gone", active),
        }
    }

    pub fn reset_active_timer(&self) {
        if let Some(active) = self.active_timer_id() {
            self.reset(&active);
        }
    }

    pub fn complete_active_timer(&self) -> Option<u64> {
        let active = self.active_timer_id()?;
        self.complete(&active)
    }
}
