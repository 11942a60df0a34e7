use std::io::{BufRead, Write};
use std::panic;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};
pub mod clock;
pub mod commands;
pub mod config;
mod database;
pub mod engine;
pub mod format;
pub mod models;
pub mod storage;
pub mod tasks;
use crate::clock::SystemClock;
use crate::commands::{Command, CommandContext};
pub use crate::config::Config;
pub use crate::engine::{TimerCoordinator, TimerHandle, TimerView};
use crate::format::format_elapsed;
use crate::models::Session;
use crate::tasks::SqliteTaskStore;
pub use database::Database;

/// Panic recovery: persist running timers when a panic occurs.
static PANIC_COORDINATOR: OnceLock<TimerCoordinator> = OnceLock::new();


/// Логирование: RUST_LOG имеет приоритет, иначе фильтр из конфигурации
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Открыть БД; при повреждении - backup файла и новая БД (одна попытка)
pub fn open_database(db_path: &Path) -> Result<Arc<Database>, String> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            let msg = match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    "Permission denied. Check data directory is writable."
                }
                _ => "Failed to create data directory.",
            };
            format!("{} Path: {} ({})", msg, parent.display(), e)
        })?;
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| format!("Database path contains invalid UTF-8: {}", db_path.display()))?;

    match Database::new(db_path_str) {
        Ok(db) => Ok(Arc::new(db)),
        Err(e) => {
            let err_str = e.to_string();
            let is_corruption = err_str.contains("corruption")
                || err_str.contains("integrity")
                || err_str.contains("not a database");
            if !is_corruption || !db_path.exists() {
                return Err(format!("Failed to initialize database: {}", e));
            }
            let backup_path = db_path.with_extension(format!(
                "db.corrupted.{}",
                chrono::Utc::now().timestamp()
            ));
            std::fs::rename(db_path, &backup_path).map_err(|rename_e| {
                warn!(
                    "[DB] Failed to rename corrupted DB to {:?}: {}",
                    backup_path, rename_e
                );
                format!("Database corrupted and could not backup: {}", e)
            })?;
            info!(
                "[DB] Corrupted DB backed up to {:?}, starting fresh",
                backup_path
            );
            Database::new(db_path_str)
                .map(Arc::new)
                .map_err(|e2| format!("Failed to create fresh database: {}", e2))
        }
    }
}

/// Panic hook: попытка сохранить running таймеры до раскрутки стека
fn install_panic_hook(coordinator: TimerCoordinator) {
    let _ = PANIC_COORDINATOR.set(coordinator);
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if let Some(coordinator) = PANIC_COORDINATOR.get() {
            // try_lock: паника могла случиться, пока этот поток держал реестр
            match coordinator.try_save_state() {
                Ok(()) => eprintln!("[PANIC_RECOVERY] Timer state persisted before panic"),
                Err(e) => eprintln!("[PANIC_RECOVERY] Failed to persist timer state: {}", e),
            }
        }
        default_hook(info);
    }));
}

fn prompt(active: &Option<TimerView>) -> String {
    match active {
        Some(view) => format!(
            "[{} {} {}] > ",
            if view.is_running { "▶" } else { "⏸" },
            format_elapsed(view.elapsed_seconds),
            view.task_title
        ),
        None => "> ".to_string(),
    }
}

pub fn run(config: Config) -> Result<(), String> {
    init_tracing(config.log_filter());

    let db = open_database(&config.db_path)?;
    // Восстановление снапшотов происходит внутри new() (все на паузе)
    let coordinator = TimerCoordinator::new(db.clone(), Arc::new(SystemClock));
    install_panic_hook(coordinator.clone());

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;
    let _guard = runtime.enter();

    // Периодическое сохранение: crash теряет не больше одного интервала
    let coordinator_for_periodic = coordinator.clone();
    let persist_interval = config.persist_interval();
    runtime.spawn(async move {
        let mut interval = tokio::time::interval(persist_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = coordinator_for_periodic.save_state() {
                warn!("[TIMER] Failed to save state periodically: {}", e);
            } else {
                debug!("[TIMER] State saved periodically");
            }
        }
    });

    let (_poller, active_rx) =
        engine::spawn_active_timer_poller(coordinator.clone(), config.poll_interval());

    let store = Arc::new(SqliteTaskStore::new(db));
    let context = CommandContext::new(
        coordinator.clone(),
        store,
        Some(Session::new(config.user.clone())),
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut lines = stdin.lock().lines();
    loop {
        let _ = write!(stdout, "{}", prompt(&active_rx.borrow()));
        let _ = stdout.flush();
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.map_err(|e| format!("Failed to read input: {}", e))?;
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => match context.execute(command) {
                Ok(output) => {
                    let _ = writeln!(stdout, "{}", output);
                }
                Err(e) => {
                    let _ = writeln!(stdout, "error: {}", e);
                }
            },
            Err(e) => {
                let _ = writeln!(stdout, "{}", e);
            }
        }
    }

    // Graceful shutdown: persist running timers on exit
    if let Err(e) = coordinator.save_state() {
        error!("[SHUTDOWN] Failed to save timer state on exit: {}", e);
    } else {
        info!("[SHUTDOWN] Timer state saved successfully on exit");
    }
    drop(_guard);
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
    Ok(())
}
