//! Runtime configuration and CLI arguments

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "studytime")]
#[command(about = "Study task tracker with a persistent single-active timer")]
#[command(version)]
pub struct Config {
    /// SQLite database file (timer snapshots and tasks)
    #[arg(long, default_value = "studytime.db")]
    pub db_path: PathBuf,

    /// User id of the authenticated session
    #[arg(long, default_value = "local")]
    pub user: String,

    /// Active timer polling interval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Interval between periodic saves of running timers, in seconds
    #[arg(long, default_value_t = 30)]
    pub persist_interval_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs.max(1))
    }

    /// Default filter when RUST_LOG is not set
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::parse_from(["studytime"]);
        assert_eq!(config.db_path, PathBuf::from("studytime.db"));
        assert_eq!(config.user, "local");
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.persist_interval(), Duration::from_secs(30));
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn test_config_flags() {
        let config = Config::parse_from([
            "studytime",
            "--db-path",
            "/tmp/x.db",
            "--user",
            "ana",
            "--poll-interval-ms",
            "0",
            "-v",
        ]);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.user, "ana");
        // 0 недопустим для tokio interval
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.log_filter(), "debug");
    }
}
