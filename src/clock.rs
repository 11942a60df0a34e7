use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Источник wall-clock времени (Unix epoch, миллисекунды)
/// Elapsed всегда пересчитывается от этого значения, никогда не считается тиками
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Системные часы
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Часы с ручным управлением для детерминированных сценариев
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs.saturating_mul(1000));
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Целые секунды между двумя отметками (floor), 0 если часы ушли назад
pub fn whole_seconds_between(from_ms: i64, to_ms: i64) -> u64 {
    let delta = to_ms.saturating_sub(from_ms);
    if delta <= 0 {
        0
    } else {
        (delta / 1000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance_secs(5);
        assert_eq!(clock.now_ms(), 6_000);
        clock.advance_ms(250);
        assert_eq!(clock.now_ms(), 6_250);
        clock.set_ms(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn test_whole_seconds_between_floors() {
        assert_eq!(whole_seconds_between(0, 999), 0);
        assert_eq!(whole_seconds_between(0, 1_000), 1);
        assert_eq!(whole_seconds_between(0, 5_999), 5);
    }

    #[test]
    fn test_whole_seconds_between_backwards_clock_is_zero() {
        assert_eq!(whole_seconds_between(10_000, 2_000), 0);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
