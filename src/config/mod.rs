use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default delay before a dropped student is declared offline
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 60;

/// Default interval between exam lifecycle sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

pub struct Config {
    pub server: ServerConfig,
    pub monitor: MonitorConfig,
    pub ice: IceConfig,
    pub logging: LoggingConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

pub struct MonitorConfig {
    pub grace_period: Duration,
    pub sweep_interval: Duration,
    /// Optional JSON file used to seed the in-memory exam store
    pub seed_file: Option<PathBuf>,
}

/// STUN/TURN servers advertised to clients and used by the proctor client
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

#[derive(Debug, Clone)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

pub struct LoggingConfig {
    pub json: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            seed_file: None,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: vec![],
        }
    }
}

impl IceConfig {
    pub fn from_env() -> Self {
        let stun_server =
            env::var("STUN_SERVER_URL").unwrap_or_else(|_| DEFAULT_STUN_SERVER.to_string());

        let mut turn_servers = vec![];

        if let (Ok(turn_url), Ok(username), Ok(credential)) = (
            env::var("TURN_SERVER_URL"),
            env::var("TURN_USERNAME"),
            env::var("TURN_CREDENTIAL"),
        ) {
            turn_servers.push(TurnServer {
                urls: vec![turn_url],
                username,
                credential,
            });
        }

        Self {
            stun_servers: vec![stun_server],
            turn_servers,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("SERVER_PORT", 8080),
            },
            monitor: MonitorConfig {
                grace_period: parse_secs_env("GRACE_PERIOD_SECS", DEFAULT_GRACE_PERIOD_SECS),
                sweep_interval: parse_secs_env(
                    "SWEEP_INTERVAL_SECS",
                    DEFAULT_SWEEP_INTERVAL_SECS,
                ),
                seed_file: env::var("EXAM_SEED_FILE")
                    .ok()
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from),
            },
            ice: IceConfig::from_env(),
            logging: LoggingConfig {
                json: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
        }
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

/// Reads a positive number of seconds; zero falls back to `default` like any other bad value
fn parse_secs_env(name: &str, default: u64) -> Duration {
    let secs = match parse_env(name, default) {
        0 => {
            tracing::warn!(
                variable = name,
                default,
                "Duration must be greater than zero, using default"
            );
            default
        }
        secs => secs,
    };
    Duration::from_secs(secs)
}

/// Reads `name` from the environment, falling back to `default` when unset or unparsable
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    variable = name,
                    value = %raw,
                    default = %default,
                    "Invalid value in environment, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_host(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
            },
            monitor: MonitorConfig::default(),
            ice: IceConfig::default(),
            logging: LoggingConfig { json: false },
        }
    }

    #[test]
    fn test_parse_localhost() {
        let config = config_with_host("localhost", 8080);
        assert_eq!(config.bind_address(), ([127, 0, 0, 1], 8080));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let config = config_with_host("192.168.1.1", 3000);
        assert_eq!(config.bind_address(), ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_empty_host() {
        let config = config_with_host("", 8080);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 8080));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let config = config_with_host("invalid-hostname", 9000);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 9000));
    }

    #[test]
    fn test_monitor_defaults() {
        let monitor = MonitorConfig::default();
        assert_eq!(monitor.grace_period, Duration::from_secs(60));
        assert_eq!(monitor.sweep_interval, Duration::from_secs(60));
        assert!(monitor.seed_file.is_none());
    }

    #[test]
    fn test_parse_env_falls_back_on_garbage() {
        env::set_var("EXAM_MONITOR_TEST_GRACE", "soon");
        assert_eq!(parse_env("EXAM_MONITOR_TEST_GRACE", 60u64), 60);

        env::set_var("EXAM_MONITOR_TEST_GRACE", " 15 ");
        assert_eq!(parse_env("EXAM_MONITOR_TEST_GRACE", 60u64), 15);

        env::remove_var("EXAM_MONITOR_TEST_GRACE");
        assert_eq!(parse_env("EXAM_MONITOR_TEST_GRACE", 60u64), 60);
    }

    #[test]
    fn test_zero_durations_fall_back_to_default() {
        env::set_var("EXAM_MONITOR_TEST_SWEEP", "0");
        assert_eq!(
            parse_secs_env("EXAM_MONITOR_TEST_SWEEP", DEFAULT_SWEEP_INTERVAL_SECS),
            Duration::from_secs(60)
        );

        env::set_var("EXAM_MONITOR_TEST_SWEEP", "45");
        assert_eq!(
            parse_secs_env("EXAM_MONITOR_TEST_SWEEP", DEFAULT_SWEEP_INTERVAL_SECS),
            Duration::from_secs(45)
        );
        env::remove_var("EXAM_MONITOR_TEST_SWEEP");

        env::set_var("EXAM_MONITOR_TEST_GRACE_ZERO", " 0 ");
        assert_eq!(
            parse_secs_env("EXAM_MONITOR_TEST_GRACE_ZERO", DEFAULT_GRACE_PERIOD_SECS),
            Duration::from_secs(60)
        );
        env::remove_var("EXAM_MONITOR_TEST_GRACE_ZERO");
    }
}
