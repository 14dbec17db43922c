//! Configuration module for the relay.
//!
//! All configuration is loaded from environment variables (optionally seeded from a
//! `.env` file) with sensible defaults. A source is only enabled when both its
//! credentials and its scope are present.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Token used when `RELAY_TOKEN` is not set.
pub const DEFAULT_TOKEN: &str = "local-dev-token";

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_READWISE_API_URL: &str = "https://readwise.io/api/v3";

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Issue tracker source settings.
#[derive(Clone)]
pub struct GitHubConfig {
    pub token: String,
    pub repos: Vec<String>,
    pub api_url: String,
    pub interval: Duration,
}

/// Calendar source settings.
#[derive(Clone)]
pub struct CalendarConfig {
    pub calendars: Vec<String>,
    /// Token file written by the external consent flow.
    pub token_path: PathBuf,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub api_url: String,
    pub token_url: String,
    pub interval: Duration,
}

/// Highlight service source settings.
#[derive(Clone)]
pub struct ReadwiseConfig {
    pub token: String,
    pub api_url: String,
    pub interval: Duration,
    /// Delay before the first run so the server is up before the slow source starts.
    pub initial_delay: Duration,
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Token required on every authenticated endpoint
    pub api_token: String,
    /// Path to the SQLite state store
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Optional cap on queued items; the oldest item is evicted past it
    pub queue_max_items: Option<usize>,
    pub stream_poll_interval: Duration,
    pub stream_window: Duration,
    pub fetch_timeout: Duration,
    pub store_lock_timeout: Duration,
    pub github: Option<GitHubConfig>,
    pub calendar: Option<CalendarConfig>,
    pub readwise: Option<ReadwiseConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_token", &"[REDACTED]")
            .field("db_path", &self.db_path)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("queue_max_items", &self.queue_max_items)
            .field("stream_poll_interval", &self.stream_poll_interval)
            .field("stream_window", &self.stream_window)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("github", &self.github.as_ref().map(|g| &g.repos))
            .field("calendar", &self.calendar.as_ref().map(|c| &c.calendars))
            .field("readwise", &self.readwise.is_some())
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_token: DEFAULT_TOKEN.to_string(),
            db_path: PathBuf::from("./data/relay.sqlite"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 19501)),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            queue_max_items: None,
            stream_poll_interval: Duration::from_secs(2),
            stream_window: Duration::from_secs(25),
            fetch_timeout: Duration::from_secs(30),
            store_lock_timeout: Duration::from_secs(1),
            github: None,
            calendar: None,
            readwise: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let api_token = non_empty_var("RELAY_TOKEN").unwrap_or(defaults.api_token);

        let db_path = non_empty_var("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let bind_addr = match non_empty_var("RELAY_BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|_| {
                AppError::Validation(format!("Invalid RELAY_BIND_ADDR format: {}", raw))
            })?,
            None => defaults.bind_addr,
        };

        let log_level = non_empty_var("RELAY_LOG_LEVEL").unwrap_or(defaults.log_level);

        let log_format = non_empty_var("RELAY_LOG_FORMAT")
            .and_then(|raw| match raw.parse() {
                Ok(format) => Some(format),
                Err(e) => {
                    eprintln!("Ignoring RELAY_LOG_FORMAT: {}", e);
                    None
                }
            })
            .unwrap_or(defaults.log_format);

        let queue_max_items = parse_var::<usize>("RELAY_QUEUE_MAX_ITEMS").filter(|n| *n > 0);

        let stream_poll_interval = millis_var("RELAY_STREAM_POLL_MS")
            .unwrap_or(defaults.stream_poll_interval);
        let stream_window = secs_var("RELAY_STREAM_WINDOW_SECS").unwrap_or(defaults.stream_window);
        let fetch_timeout = secs_var("RELAY_FETCH_TIMEOUT_SECS").unwrap_or(defaults.fetch_timeout);
        let store_lock_timeout = millis_var("RELAY_STORE_LOCK_TIMEOUT_MS")
            .unwrap_or(defaults.store_lock_timeout);

        let github = match (non_empty_var("GITHUB_TOKEN"), non_empty_var("GITHUB_REPOS")) {
            (Some(token), Some(repos)) => Some(GitHubConfig {
                token,
                repos: parse_list(&repos),
                api_url: non_empty_var("GITHUB_API_URL")
                    .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
                interval: secs_var("GITHUB_SYNC_INTERVAL_SECS")
                    .unwrap_or(Duration::from_secs(60)),
            }),
            _ => None,
        }
        .filter(|g| !g.repos.is_empty());

        let calendar = non_empty_var("GOOGLE_CALENDARS")
            .map(|raw| parse_list(&raw))
            .filter(|calendars| !calendars.is_empty())
            .map(|calendars| CalendarConfig {
                calendars,
                token_path: non_empty_var("GOOGLE_TOKEN_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_token_path),
                client_id: non_empty_var("GOOGLE_CLIENT_ID"),
                client_secret: non_empty_var("GOOGLE_CLIENT_SECRET"),
                api_url: non_empty_var("GOOGLE_CALENDAR_API_URL")
                    .unwrap_or_else(|| DEFAULT_CALENDAR_API_URL.to_string()),
                token_url: non_empty_var("GOOGLE_TOKEN_URL")
                    .unwrap_or_else(|| DEFAULT_GOOGLE_TOKEN_URL.to_string()),
                interval: secs_var("CALENDAR_SYNC_INTERVAL_SECS")
                    .unwrap_or(Duration::from_secs(300)),
            });

        let readwise = non_empty_var("READWISE_TOKEN").map(|token| ReadwiseConfig {
            token,
            api_url: non_empty_var("READWISE_API_URL")
                .unwrap_or_else(|| DEFAULT_READWISE_API_URL.to_string()),
            interval: secs_var("READWISE_SYNC_INTERVAL_SECS").unwrap_or(Duration::from_secs(3600)),
            initial_delay: Duration::from_secs(5),
        });

        Ok(Self {
            api_token,
            db_path,
            bind_addr,
            log_level,
            log_format,
            queue_max_items,
            stream_poll_interval,
            stream_window,
            fetch_timeout,
            store_lock_timeout,
            github,
            calendar,
            readwise,
        })
    }

    /// Whether the API token is the built-in development default.
    pub fn uses_default_token(&self) -> bool {
        self.api_token == DEFAULT_TOKEN
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = non_empty_var(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            eprintln!("Ignoring invalid value for {}: {}", key, raw);
            None
        }
    }
}

fn secs_var(key: &str) -> Option<Duration> {
    parse_var::<u64>(key)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn millis_var(key: &str) -> Option<Duration> {
    parse_var::<u64>(key)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn default_token_path() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("delta-relay")
        .join("google.json")
}
