//! Configuration module for the simple stream server
//!
//! This module handles CLI argument parsing with environment variable support.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::core::SECRET_LEN;
use crate::logger::LogLevel;
use crate::utils;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// Default listen address
const DEFAULT_LISTEN: &str = "0.0.0.0:9999";

/// CLI arguments for the simple stream server
///
/// Supports environment variables with SIMPLESTREAM_ prefix
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Simple stream tunnel server")]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// Listen address (e.g., "0.0.0.0:9999")
    #[arg(long, env = "SIMPLESTREAM_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Password; the handshake secret is its SHA-256 digest
    #[arg(long, env = "SIMPLESTREAM_PASSWORD", conflicts_with = "secret_hex")]
    pub password: Option<String>,

    /// Handshake secret given directly as 64 hex characters
    #[arg(long, env = "SIMPLESTREAM_SECRET_HEX")]
    pub secret_hex: Option<String>,

    /// Idle timeout for stream sessions and the handshake, 0 disables it (default: 0s)
    #[arg(long, env = "SIMPLESTREAM_TCP_TIMEOUT", default_value = "0s", value_parser = parse_duration)]
    pub tcp_timeout: Duration,

    /// Idle timeout for datagram sessions (default: 60s)
    #[arg(long, env = "SIMPLESTREAM_UDP_TIMEOUT", default_value = "60s", value_parser = parse_duration)]
    pub udp_timeout: Duration,

    /// Log mode: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "SIMPLESTREAM_LOG_MODE", default_value = "info")]
    pub log_mode: String,

    /// Refuse destinations in private/loopback ranges (SSRF protection)
    #[arg(long, env = "SIMPLESTREAM_BLOCK_PRIVATE_IP", default_value_t = false)]
    pub block_private_ip: bool,

    // ==================== Performance Tuning ====================
    /// TCP connect timeout to the destination (default: 5s)
    #[arg(long, env = "SIMPLESTREAM_CONNECT_TIMEOUT", default_value = "5s", value_parser = parse_duration, help_heading = "Performance")]
    pub connect_timeout: Duration,

    /// TCP listen backlog for pending connections (default: 1024)
    #[arg(
        long,
        env = "SIMPLESTREAM_TCP_BACKLOG",
        default_value_t = 1024,
        help_heading = "Performance"
    )]
    pub tcp_backlog: i32,

    /// Enable TCP_NODELAY for lower latency (default: true)
    #[arg(
        long,
        env = "SIMPLESTREAM_TCP_NODELAY",
        default_value_t = true,
        help_heading = "Performance"
    )]
    pub tcp_nodelay: bool,

    /// Maximum concurrent connections, 0 = unlimited (default: 0)
    #[arg(
        long,
        env = "SIMPLESTREAM_MAX_CONNECTIONS",
        default_value_t = 0,
        help_heading = "Performance"
    )]
    pub max_connections: usize,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the CLI arguments
    pub fn validate(&self) -> Result<()> {
        self.listen
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("Invalid listen address '{}': {}", self.listen, e))?;

        match (&self.password, &self.secret_hex) {
            (None, None) => {
                return Err(anyhow!("Either --password or --secret_hex is required"));
            }
            (Some(p), _) if p.is_empty() => {
                return Err(anyhow!("Password must not be empty"));
            }
            (_, Some(hex)) => {
                utils::secret_from_hex(hex)?;
            }
            _ => {}
        }

        if LogLevel::from_str(&self.log_mode).is_none() {
            return Err(anyhow!(
                "Invalid log mode '{}': expected trace, debug, info, warn or error",
                self.log_mode
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(anyhow!("connect_timeout must be greater than 0"));
        }
        if self.tcp_backlog <= 0 {
            return Err(anyhow!("tcp_backlog must be greater than 0"));
        }

        Ok(())
    }
}

/// Connection performance configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnConfig {
    /// Stream session idle timeout, also bounds the handshake
    pub tcp_timeout: Duration,
    /// Datagram session idle timeout
    pub udp_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// TCP listen backlog
    pub tcp_backlog: i32,
    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
    /// Connection limit, 0 = unlimited
    pub max_connections: usize,
}

impl ConnConfig {
    /// Create from CLI args
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            tcp_timeout: cli.tcp_timeout,
            udp_timeout: cli.udp_timeout,
            connect_timeout: cli.connect_timeout,
            tcp_backlog: cli.tcp_backlog,
            tcp_nodelay: cli.tcp_nodelay,
            max_connections: cli.max_connections,
        }
    }

    /// Stream idle timeout in whole seconds (0 = disabled)
    pub fn tcp_timeout_secs(&self) -> u64 {
        self.tcp_timeout.as_secs()
    }

    /// Datagram idle timeout in whole seconds (0 = disabled)
    pub fn udp_timeout_secs(&self) -> u64 {
        self.udp_timeout.as_secs()
    }
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            tcp_timeout: Duration::ZERO,
            udp_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            tcp_backlog: 1024,
            tcp_nodelay: true,
            max_connections: 0,
        }
    }
}

/// Runtime server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub listen: SocketAddr,
    /// Handshake secret
    pub secret: [u8; SECRET_LEN],
    /// Refuse private destinations
    pub block_private_ip: bool,
}

impl ServerConfig {
    /// Build from validated CLI args
    pub fn from_cli(cli: &CliArgs) -> Result<Self> {
        let listen = cli.listen.parse()?;
        let secret = match (&cli.secret_hex, &cli.password) {
            (Some(hex), _) => utils::secret_from_hex(hex)?,
            (None, Some(password)) => utils::password_to_secret(password),
            (None, None) => return Err(anyhow!("no password configured")),
        };
        Ok(Self {
            listen,
            secret,
            block_private_ip: cli.block_private_ip,
        })
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("block_private_ip", &self.block_private_ip)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cli_args() -> CliArgs {
        CliArgs {
            listen: DEFAULT_LISTEN.to_string(),
            password: Some("password".to_string()),
            secret_hex: None,
            tcp_timeout: Duration::ZERO,
            udp_timeout: Duration::from_secs(60),
            log_mode: "info".to_string(),
            block_private_ip: false,
            connect_timeout: Duration::from_secs(5),
            tcp_backlog: 1024,
            tcp_nodelay: true,
            max_connections: 0,
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_validate_ok() {
        assert!(create_test_cli_args().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_secret() {
        let mut cli = create_test_cli_args();
        cli.password = None;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_password() {
        let mut cli = create_test_cli_args();
        cli.password = Some(String::new());
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_secret_hex() {
        let mut cli = create_test_cli_args();
        cli.password = None;
        cli.secret_hex = Some("abcd".to_string());
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_listen() {
        let mut cli = create_test_cli_args();
        cli.listen = "not-an-address".to_string();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_mode() {
        let mut cli = create_test_cli_args();
        cli.log_mode = "verbose".to_string();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_conn_config_from_cli() {
        let mut cli = create_test_cli_args();
        cli.tcp_timeout = Duration::from_secs(30);
        let config = ConnConfig::from_cli(&cli);
        assert_eq!(config.tcp_timeout_secs(), 30);
        assert_eq!(config.udp_timeout_secs(), 60);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_server_config_derives_secret() {
        let cli = create_test_cli_args();
        let config = ServerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.secret, utils::password_to_secret("password"));
        assert_eq!(config.listen.port(), 9999);
    }

    #[test]
    fn test_server_config_prefers_secret_hex() {
        let mut cli = create_test_cli_args();
        let secret = [0x11u8; SECRET_LEN];
        cli.password = None;
        cli.secret_hex = Some(utils::secret_to_hex(&secret));
        let config = ServerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.secret, secret);
    }

    #[test]
    fn test_cli_parse_from_args() {
        let cli = CliArgs::try_parse_from([
            "simplestream-server",
            "--password",
            "pw",
            "--udp_timeout",
            "2m",
            "--block_private_ip",
        ])
        .unwrap();
        assert_eq!(cli.udp_timeout, Duration::from_secs(120));
        assert!(cli.block_private_ip);
        assert_eq!(cli.listen, DEFAULT_LISTEN);
    }
}
