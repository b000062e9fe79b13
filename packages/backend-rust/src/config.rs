use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PLANNER_MODEL: &str = "gemini-2.5-pro";
const DEFAULT_AI_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_SESSION_SIZE: usize = 10;
const MAX_SESSION_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub planner: PlannerConfig,
    pub session_size: usize,
}

/// Remote planner settings
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl PlannerConfig {
    /// Enabled and pointed at an endpoint
    pub fn is_available(&self) -> bool {
        self.enabled && self.base_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            model: DEFAULT_PLANNER_MODEL.to_string(),
            timeout: Duration::from_millis(DEFAULT_AI_TIMEOUT_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_string("PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = env_string("HOST")
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let log_level = env_string("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let data_dir = env_string("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let planner = PlannerConfig {
            enabled: env_bool("AI_ENABLED").unwrap_or(false),
            base_url: env_string("AI_API_BASE_URL"),
            model: env_string("AI_PLANNER_MODEL").unwrap_or_else(|| DEFAULT_PLANNER_MODEL.to_string()),
            timeout: Duration::from_millis(env_u64("AI_TIMEOUT_MS").unwrap_or(DEFAULT_AI_TIMEOUT_MS)),
        };

        let session_size = env_u64("PLAN_SESSION_SIZE")
            .map(|value| (value as usize).clamp(1, MAX_SESSION_SIZE))
            .unwrap_or(DEFAULT_SESSION_SIZE);

        Self {
            host,
            port,
            log_level,
            data_dir,
            planner,
            session_size,
        }
    }

    /// Local-only configuration rooted at `data_dir`
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            log_level: "info".to_string(),
            data_dir: data_dir.into(),
            planner: PlannerConfig::default(),
            session_size: DEFAULT_SESSION_SIZE,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.trim().parse().ok()
}

fn env_bool(key: &str) -> Option<bool> {
    let value = env_string(key)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
