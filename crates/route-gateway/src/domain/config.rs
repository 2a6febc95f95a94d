//! Gateway configuration with validation.
//!
//! Every section defaults sensibly, so a TOML file only needs the fields it
//! changes. Durations are written as `"10s"`, `"250ms"` or `"2m"`.

use crate::domain::types::RouteType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP front door
    pub http: HttpConfig,
    /// Backend channel (socket deployment)
    pub backend: BackendConfig,
    /// Process adapter (process deployment)
    pub process: ProcessConfig,
    /// Request deadlines and shutdown grace
    pub timeouts: TimeoutConfig,
    /// Route operation options
    pub routing: RoutingConfig,
    /// Map-update push listeners
    pub push: PushConfig,
    /// CORS configuration
    pub cors: CorsConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.max_body_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "http.max_body_size cannot be 0".into(),
            ));
        }

        if self.timeouts.request.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "request timeout cannot be 0".into(),
            ));
        }

        match self.backend.mode {
            BackendMode::Socket => {
                if self.backend.queue_capacity == 0 {
                    return Err(ConfigError::InvalidLimit(
                        "backend.queue_capacity cannot be 0".into(),
                    ));
                }
                if self.backend.max_frame_len == 0 {
                    return Err(ConfigError::InvalidLimit(
                        "backend.max_frame_len cannot be 0".into(),
                    ));
                }
                if self.backend.connect_timeout.is_zero() {
                    return Err(ConfigError::InvalidTimeout(
                        "connect timeout cannot be 0".into(),
                    ));
                }
                self.backend.backoff.validate()?;
            }
            BackendMode::Process => {
                if self.process.program.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "process.program is required in process mode".into(),
                    ));
                }
            }
        }

        if self.push.enabled && self.push.listener_buffer == 0 {
            return Err(ConfigError::InvalidLimit(
                "push.listener_buffer cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 3000)
    pub port: u16,
    /// Directory served under `/static` (disabled when unset)
    pub static_dir: Option<PathBuf>,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3000,
            static_dir: None,
            max_body_size: 64 * 1024,
        }
    }
}

/// Which backend adapter serves queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Persistent duplex channel to a long-lived engine
    #[default]
    Socket,
    /// One-shot engine process per request
    Process,
}

/// How replies on the shared channel are matched to requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationDiscipline {
    /// Every request carries an `id` the engine echoes back
    #[default]
    Tagged,
    /// The engine does not echo ids: at most one request in flight, FIFO
    Sequential,
}

/// Engine socket address: `tcp://host:port`, `host:port` or `unix:/path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for BackendAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            let path = path.trim_start_matches("//");
            if path.is_empty() {
                return Err(ConfigError::InvalidAddress(s.to_string()));
            }
            return Ok(BackendAddress::Unix(PathBuf::from(path)));
        }
        let authority = s.strip_prefix("tcp://").unwrap_or(s);
        match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(BackendAddress::Tcp(authority.to_string()))
            }
            _ => Err(ConfigError::InvalidAddress(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackendAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendAddress> for String {
    fn from(address: BackendAddress) -> Self {
        address.to_string()
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendAddress::Tcp(authority) => write!(f, "tcp://{}", authority),
            BackendAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Backend channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Socket or process deployment
    pub mode: BackendMode,
    /// Engine address (socket mode)
    pub address: BackendAddress,
    /// Time allowed for one connection attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Reply matching discipline
    pub discipline: CorrelationDiscipline,
    /// Submissions buffered ahead of the channel
    pub queue_capacity: usize,
    /// Longest accepted inbound line in bytes
    pub max_frame_len: usize,
    /// Reconnect backoff
    pub backoff: BackoffConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Socket,
            address: BackendAddress::Tcp("127.0.0.1:7878".to_string()),
            connect_timeout: Duration::from_secs(3),
            discipline: CorrelationDiscipline::Tagged,
            queue_capacity: 1024,
            max_frame_len: 16 * 1024 * 1024,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Capped, jittered exponential reconnect backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry delay
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    /// Upper bound for any delay
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    /// Fraction of each delay randomised away (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial.is_zero() || self.initial > self.max {
            return Err(ConfigError::InvalidTimeout(
                "backoff.initial must be non-zero and not exceed backoff.max".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid(
                "backoff.jitter must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Where the engine process leaves its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputMode {
    /// One well-known file shared by all invocations (serialized)
    Shared { path: PathBuf },
    /// A file per request, named by correlation id, passed as the last argument
    PerRequest { dir: PathBuf },
    /// The result is written to the child's stdout
    Stdout,
}

/// Process adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Engine executable
    pub program: PathBuf,
    /// Leading arguments placed before the query arguments
    pub args: Vec<String>,
    /// Working directory for the child
    pub working_dir: Option<PathBuf>,
    /// Result handoff
    pub output: OutputMode,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            args: Vec::new(),
            working_dir: None,
            output: OutputMode::Stdout,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one backend request, queueing included
    #[serde(with = "humantime_serde")]
    pub request: Duration,
    /// How long in-flight requests may finish during shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Route operation options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Mode used when `/calculate-path` omits `type`; unset rejects the request
    pub default_route_type: Option<RouteType>,
}

/// Map-update push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Expose `/map-updates` and broadcast computed routes
    pub enabled: bool,
    /// Updates buffered per listener before new ones are dropped
    pub listener_buffer: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listener_buffer: 16,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins ("*" for all)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Max age for preflight cache
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            allowed_headers: vec!["Content-Type".to_string()],
            max_age: 86400, // 24 hours
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read configuration: {0}")]
    Read(String),
    /// Config file is not valid TOML for this schema
    #[error("cannot parse configuration: {0}")]
    Parse(String),
    /// Backend address is not `tcp://host:port` or `unix:/path`
    #[error("invalid backend address: {0}")]
    InvalidAddress(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Human-readable Duration (de)serialization
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or("invalid minutes")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
