//! Command line and environment overrides.
//!
//! Precedence: built-in defaults, then the TOML file, then `ROUTE_GATEWAY_*`
//! environment variables and flags.

use clap::{Parser, ValueEnum};
use route_gateway::domain::config::humantime_serde::parse_duration;
use route_gateway::{
    BackendAddress, BackendMode, ConfigError, CorrelationDiscipline, GatewayConfig,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "route-gateway",
    version,
    about = "Request-multiplexing gateway for a routing and location-search engine"
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "ROUTE_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long, env = "ROUTE_GATEWAY_HOST")]
    pub host: Option<IpAddr>,

    /// HTTP port
    #[arg(short, long, env = "ROUTE_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Backend adapter
    #[arg(long, env = "ROUTE_GATEWAY_MODE", value_enum)]
    pub mode: Option<ModeArg>,

    /// Engine socket: tcp://host:port or unix:/path
    #[arg(long, env = "ROUTE_GATEWAY_BACKEND")]
    pub backend: Option<BackendAddress>,

    /// Reply matching on the engine socket
    #[arg(long, env = "ROUTE_GATEWAY_DISCIPLINE", value_enum)]
    pub discipline: Option<DisciplineArg>,

    /// Engine executable (process mode)
    #[arg(long, env = "ROUTE_GATEWAY_ENGINE")]
    pub engine: Option<PathBuf>,

    /// Directory served under /static
    #[arg(long, env = "ROUTE_GATEWAY_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Per-request deadline, e.g. "10s" or "750ms"
    #[arg(long, env = "ROUTE_GATEWAY_REQUEST_TIMEOUT", value_parser = duration_arg)]
    pub request_timeout: Option<Duration>,

    /// Disable the /map-updates push endpoint
    #[arg(long, env = "ROUTE_GATEWAY_NO_PUSH")]
    pub no_push: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "ROUTE_GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "ROUTE_GATEWAY_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Socket,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DisciplineArg {
    Tagged,
    Sequential,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| format!("{}: {:?}", e, s))
}

impl Cli {
    /// Build the effective configuration and validate it.
    pub fn load_config(&self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_file(path)?,
            None => GatewayConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.http.host = host;
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(mode) = self.mode {
            config.backend.mode = match mode {
                ModeArg::Socket => BackendMode::Socket,
                ModeArg::Process => BackendMode::Process,
            };
        }
        if let Some(address) = &self.backend {
            config.backend.address = address.clone();
        }
        if let Some(discipline) = self.discipline {
            config.backend.discipline = match discipline {
                DisciplineArg::Tagged => CorrelationDiscipline::Tagged,
                DisciplineArg::Sequential => CorrelationDiscipline::Sequential,
            };
        }
        if let Some(engine) = &self.engine {
            config.process.program = engine.clone();
        }
        if let Some(dir) = &self.static_dir {
            config.http.static_dir = Some(dir.clone());
        }
        if let Some(timeout) = self.request_timeout {
            config.timeouts.request = timeout;
        }
        if self.no_push {
            config.push.enabled = false;
        }
    }
}
