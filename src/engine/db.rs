use crate::engine::{
    Registry, StoredSnapshot, TimerCoordinator, TimerRecord, DEFAULT_TASK_TITLE, LAST_ACTIVE_KEY,
    RETENTION_WINDOW_MS, STORAGE_KEY_PREFIX,
};
use std::sync::TryLockError;
use tracing::{debug, error, info, warn};

pub(crate) fn snapshot_key(task_id: &str) -> String {
    format!("{}{}", STORAGE_KEY_PREFIX, task_id)
}

/// Возраст >= окна удержания - снапшот устарел
/// Отрицательный возраст (часы переведены назад) считается свежим
pub(crate) fn is_expired(snapshot: &StoredSnapshot, now_ms: i64) -> bool {
    let age = now_ms.saturating_sub(snapshot.timestamp);
    if age < 0 {
        warn!(
            "[STORAGE] Clock skew detected: snapshot timestamp {} is ahead of now {}",
            snapshot.timestamp, now_ms
        );
        return false;
    }
    age >= RETENTION_WINDOW_MS
}

impl TimerCoordinator {
    /// Записать снапшот таймера (best-effort: ошибка логируется и проглатывается)
    pub(crate) fn save_snapshot(&self, task_id: &str, elapsed_seconds: u64, title: &str, now_ms: i64) {
        self.try_save_snapshot(task_id, elapsed_seconds, title, now_ms)
            .unwrap_or_else(|e| error!("[STORAGE] Failed to save snapshot {}: {}", task_id, e));
    }

    fn try_save_snapshot(
        &self,
        task_id: &str,
        elapsed_seconds: u64,
        title: &str,
        now_ms: i64,
    ) -> Result<(), String> {
        let snapshot = StoredSnapshot {
            elapsed_seconds,
            task_title: Some(title.to_string()),
            timestamp: now_ms,
        };
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| format!("Failed to serialize snapshot: {}", e))?;
        self.storage.set_item(&snapshot_key(task_id), &json)
    }

    pub(crate) fn write_last_active(&self, task_id: &str) {
        if let Err(e) = self.storage.set_item(LAST_ACTIVE_KEY, task_id) {
            error!("[STORAGE] Failed to save last active timer {}: {}", task_id, e);
        }
    }

    /// Удалить снапшот и указатель last-active (если он указывает на этот таймер)
    pub(crate) fn clear_snapshot(&self, task_id: &str) {
        if let Err(e) = self.storage.remove_item(&snapshot_key(task_id)) {
            error!("[STORAGE] Failed to remove snapshot {}: {}", task_id, e);
        }
        match self.storage.get_item(LAST_ACTIVE_KEY) {
            Ok(Some(last)) if last == task_id => {
                if let Err(e) = self.storage.remove_item(LAST_ACTIVE_KEY) {
                    error!("[STORAGE] Failed to clear last active timer: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => error!("[STORAGE] Failed to read last active timer: {}", e),
        }
    }

    /// Прочитать снапшот задачи; устаревший или повреждённый удаляется
    /// Возвращает сохранённый elapsed только для свежего снапшота
    pub(crate) fn load_snapshot(&self, task_id: &str, now_ms: i64) -> Option<u64> {
        let key = snapshot_key(task_id);
        let raw = match self.storage.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                error!("[STORAGE] Failed to load snapshot {}: {}", task_id, e);
                return None;
            }
        };

        match serde_json::from_str::<StoredSnapshot>(&raw) {
            Ok(snapshot) if !is_expired(&snapshot, now_ms) => Some(snapshot.elapsed_seconds),
            Ok(_) => {
                debug!("[STORAGE] Discarding stale snapshot {}", task_id);
                self.remove_key(&key);
                None
            }
            Err(e) => {
                warn!("[STORAGE] Discarding unreadable snapshot {}: {}", task_id, e);
                self.remove_key(&key);
                None
            }
        }
    }

    fn remove_key(&self, key: &str) {
        if let Err(e) = self.storage.remove_item(key) {
            error!("[STORAGE] Failed to remove {}: {}", key, e);
        }
    }

    /// Восстановление при старте процесса
    /// GUARD: НИКОГДА не падать на ошибке восстановления
    /// Все таймеры восстанавливаются на паузе, даже если были running
    pub(crate) fn restore_state(&self) {
        let now = self.now_ms();
        let keys = match self.storage.keys_with_prefix(STORAGE_KEY_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                error!(
                    "[RECOVERY] Failed to scan storage: {}. Starting with no timers.",
                    e
                );
                return;
            }
        };

        let mut restored = Vec::new();
        for key in keys {
            let Some(task_id) = key.strip_prefix(STORAGE_KEY_PREFIX) else {
                continue;
            };
            let raw = match self.storage.get_item(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    error!("[RECOVERY] Failed to read {}: {}", key, e);
                    continue;
                }
            };
            match serde_json::from_str::<StoredSnapshot>(&raw) {
                Ok(snapshot) if !is_expired(&snapshot, now) => {
                    restored.push((task_id.to_string(), snapshot));
                }
                Ok(_) => {
                    debug!("[RECOVERY] Discarding stale snapshot {}", task_id);
                    self.remove_key(&key);
                }
                Err(e) => {
                    warn!("[RECOVERY] Discarding unreadable snapshot {}: {}", task_id, e);
                    self.remove_key(&key);
                }
            }
        }

        let last_active = match self.storage.get_item(LAST_ACTIVE_KEY) {
            Ok(value) => value,
            Err(e) => {
                error!("[RECOVERY] Failed to read last active timer: {}", e);
                None
            }
        };

        let mut registry = self.lock_registry();
        let count = restored.len();
        for (task_id, snapshot) in restored {
            let title = snapshot
                .task_title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TASK_TITLE.to_string());
            registry.timers.insert(
                task_id,
                TimerRecord::new(title, snapshot.elapsed_seconds, now),
            );
        }

        let mut dangling_pointer = false;
        if let Some(last) = last_active {
            if registry.timers.contains_key(&last) {
                // Активный, но на паузе: глобальная панель возобновит его одним действием
                registry.active_timer_id = Some(last);
            } else {
                dangling_pointer = true;
            }
        }
        let active = registry.active_timer_id.clone();
        drop(registry);

        if dangling_pointer {
            debug!("[RECOVERY] Last active pointer refers to no snapshot, removing");
            self.remove_key(LAST_ACTIVE_KEY);
        }

        info!(
            "[RECOVERY] Restored {} timer(s), active={:?}",
            count, active
        );
    }

    /// Сохранить running таймеры в storage (периодически, при выходе)
    /// Живой elapsed пишется только в снапшот - состояние в памяти не меняется
    pub fn save_state(&self) -> Result<(), String> {
        let registry = self.lock_registry();
        self.save_running(&registry)
    }

    /// Вариант для panic hook: не ждёт lock, который мог остаться у паникующего потока
    pub fn try_save_state(&self) -> Result<(), String> {
        match self.registry.try_lock() {
            Ok(registry) => self.save_running(&registry),
            Err(TryLockError::Poisoned(poisoned)) => self.save_running(&poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                Err("Timer registry is locked, skipping save".to_string())
            }
        }
    }

    /// Снапшоты пишутся под lock реестра, storage никогда не вызывает координатор
    fn save_running(&self, registry: &Registry) -> Result<(), String> {
        let now = self.now_ms();
        let running: Vec<(String, u64, String)> = registry
            .timers
            .iter()
            .filter(|(_, record)| record.is_running())
            .map(|(task_id, record)| {
                (
                    task_id.clone(),
                    record.elapsed_seconds(now),
                    record.task_title.clone(),
                )
            })
            .collect();

        let mut errors = Vec::new();
        for (task_id, elapsed, title) in &running {
            if let Err(e) = self.try_save_snapshot(task_id, *elapsed, title, now) {
                errors.push(format!("{}: {}", task_id, e));
                continue;
            }
            if let Err(e) = self.storage.set_item(LAST_ACTIVE_KEY, task_id) {
                errors.push(format!("last active: {}", e));
            }
        }

        if errors.is_empty() {
            debug!("[TIMER] State saved ({} running)", running.len());
            Ok(())
        } else {
            Err(format!("Failed to save timer state: {}", errors.join("; ")))
        }
    }
}
