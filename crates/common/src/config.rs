use std::path::PathBuf;
use std::time::Duration;

use crate::DataSource;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    pub telegram_allowed_user_ids: Vec<i64>,
    /// Chat that receives signal alerts and heartbeats.
    pub signal_chat_id: i64,

    // Dashboard
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Market data
    pub data_source: DataSource,
    pub data_range_days: u32,
    pub data_interval_minutes: u32,
    pub data_timezone: String,
    pub fetch_timeout: Duration,

    // Scheduling
    pub loop_interval: Duration,
    pub heartbeat_interval: Duration,

    // Persistence
    pub data_dir: PathBuf,

    // Indicator config file path
    pub indicator_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let data_source = match optional_env("DATA_SOURCE")
            .unwrap_or_else(|| "yahoo".to_string())
            .to_lowercase()
            .as_str()
        {
            "yahoo" => DataSource::Yahoo,
            "sim" => DataSource::Sim,
            other => panic!("ERROR: DATA_SOURCE must be 'yahoo' or 'sim', got: '{other}'"),
        };

        let telegram_allowed_user_ids = required_env("TELEGRAM_ALLOWED_USER_IDS")
            .split(',')
            .map(|s| {
                s.trim().parse::<i64>().unwrap_or_else(|_| {
                    panic!(
                        "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{}'",
                        s.trim()
                    )
                })
            })
            .collect();

        let signal_chat_id = required_env("SIGNAL_CHAT_ID")
            .trim()
            .parse::<i64>()
            .unwrap_or_else(|_| panic!("SIGNAL_CHAT_ID must be a numeric chat ID"));

        let data_timezone =
            optional_env("DATA_TIMEZONE").unwrap_or_else(|| "America/New_York".to_string());
        if let Err(e) = crate::parse_zone(data_timezone.trim()) {
            panic!("DATA_TIMEZONE: {e}");
        }
        let data_timezone = data_timezone.trim().to_string();

        Config {
            telegram_token: required_env("TELEGRAM_TOKEN"),
            telegram_allowed_user_ids,
            signal_chat_id,
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: parsed_env("DASHBOARD_PORT").unwrap_or(8080),
            data_source,
            data_range_days: parsed_env("DATA_RANGE_DAYS").unwrap_or(10),
            data_interval_minutes: parsed_env("DATA_INTERVAL_MINUTES").unwrap_or(5),
            data_timezone,
            fetch_timeout: Duration::from_secs(parsed_env("FETCH_TIMEOUT_SECONDS").unwrap_or(30)),
            loop_interval: Duration::from_secs(parsed_env("LOOP_INTERVAL_SECONDS").unwrap_or(300)),
            heartbeat_interval: Duration::from_secs(
                parsed_env("HEARTBEAT_INTERVAL_SECONDS").unwrap_or(3600),
            ),
            data_dir: PathBuf::from(
                optional_env("DATA_DIR").unwrap_or_else(|| ".data".to_string()),
            ),
            indicator_config_path: optional_env("INDICATOR_CONFIG_PATH")
                .unwrap_or_else(|| "config/indicators.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    optional_env(key).and_then(|v| v.trim().parse().ok())
}
