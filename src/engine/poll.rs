use crate::engine::{TimerCoordinator, TimerView};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Периодически читает состояние активного таймера и публикует его в watch-канал
/// Только чтение: poller никогда не мутирует координатор, elapsed берётся из wall-clock
/// Задача завершается, когда все receivers закрыты
pub fn spawn_active_timer_poller(
    coordinator: TimerCoordinator,
    interval: Duration,
) -> (JoinHandle<()>, watch::Receiver<Option<TimerView>>) {
    let (tx, rx) = watch::channel(coordinator.get_active_timer_state());

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Пропускаем тики при лагах: количество тиков не влияет на elapsed
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                debug!("[POLL] All receivers dropped, stopping poller");
                break;
            }
            let view = coordinator.get_active_timer_state();
            tx.send_if_modified(|current| {
                if *current != view {
                    *current = view;
                    true
                } else {
                    false
                }
            });
        }
    });

    (handle, rx)
}
