//! CLI configuration, parsed with `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

use crate::error::ServerError;
use crate::poller::Interest;

/// Trigger mode for the listener and accepted connections: LT/LT, LT/ET, ET/LT, ET/ET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrigMode {
    ListenLevelConnLevel,
    ListenLevelConnEdge,
    ListenEdgeConnLevel,
    ListenEdgeConnEdge,
}

impl TrigMode {
    fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::ListenLevelConnLevel,
            1 => Self::ListenLevelConnEdge,
            2 => Self::ListenEdgeConnLevel,
            3 => Self::ListenEdgeConnEdge,
            _ => return None,
        })
    }

    pub fn listener_interest(self) -> Interest {
        match self {
            Self::ListenEdgeConnLevel | Self::ListenEdgeConnEdge => Interest::EDGE,
            _ => Interest::empty(),
        }
    }

    pub fn connection_interest(self) -> Interest {
        match self {
            Self::ListenLevelConnEdge | Self::ListenEdgeConnEdge => Interest::EDGE,
            _ => Interest::empty(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "reactord", about = "Single-process epoll reactor HTTP server")]
pub struct Cli {
    #[arg(long, default_value_t = 1316)]
    pub port: u16,

    /// 0 = LT listener / LT conn, 1 = LT / ET, 2 = ET / LT, 3 = ET / ET.
    #[arg(long = "trig-mode", default_value_t = 3)]
    pub trig_mode: u8,

    #[arg(long = "timeout-ms", default_value_t = 60_000)]
    pub timeout_ms: u64,

    #[arg(long = "opt-linger", default_value_t = false)]
    pub opt_linger: bool,

    #[arg(long = "sql-host", default_value = "localhost")]
    pub sql_host: String,

    #[arg(long = "sql-port", default_value_t = 3306)]
    pub sql_port: u16,

    #[arg(long = "sql-user", default_value = "root")]
    pub sql_user: String,

    #[arg(long = "sql-pwd", default_value = "")]
    pub sql_pwd: String,

    #[arg(long = "sql-db", default_value = "reactord")]
    pub sql_db: String,

    #[arg(long = "conn-pool-num", default_value_t = 8)]
    pub conn_pool_num: usize,

    #[arg(long = "thread-num", default_value_t = 8)]
    pub thread_num: usize,

    #[arg(long = "open-log", default_value_t = true, action = clap::ArgAction::Set)]
    pub open_log: bool,

    #[arg(long = "log-level", default_value_t = 1)]
    pub log_level: u8,

    #[arg(long = "log-queue-size", default_value_t = 1024)]
    pub log_queue_size: usize,

    #[arg(long = "resource-dir")]
    pub resource_dir: Option<PathBuf>,

    /// Matches the source's `MAX_FD` client-capacity cap: past this many live connections, new
    /// accepts are sent a literal "Server busy!" and dropped without being registered.
    #[arg(long = "max-connections", default_value_t = 65_536)]
    pub max_connections: usize,
}

/// Validated configuration ready to hand to [`crate::server::Server`].
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub trig_mode: TrigMode,
    pub idle_timeout_ms: u64,
    pub opt_linger: bool,
    pub sql_host: String,
    pub sql_port: u16,
    pub sql_user: String,
    pub sql_pwd: String,
    pub sql_db: String,
    pub conn_pool_num: usize,
    pub thread_num: usize,
    pub open_log: bool,
    pub log_level: u8,
    pub log_queue_size: usize,
    pub resource_dir: PathBuf,
    pub max_connections: usize,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ServerError> {
        if !(1024..=65535).contains(&cli.port) {
            return Err(ServerError::InvalidConfig(format!(
                "port {} out of range 1024-65535",
                cli.port
            )));
        }
        let trig_mode = TrigMode::from_raw(cli.trig_mode).ok_or_else(|| {
            ServerError::InvalidConfig(format!("trig-mode {} must be 0-3", cli.trig_mode))
        })?;
        if cli.conn_pool_num == 0 {
            return Err(ServerError::InvalidConfig(
                "conn-pool-num must be positive".into(),
            ));
        }
        if cli.thread_num == 0 {
            return Err(ServerError::InvalidConfig(
                "thread-num must be positive".into(),
            ));
        }
        if cli.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max-connections must be positive".into(),
            ));
        }

        let resource_dir = cli.resource_dir.unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("resources")
        });

        Ok(Self {
            port: cli.port,
            trig_mode,
            idle_timeout_ms: cli.timeout_ms,
            opt_linger: cli.opt_linger,
            sql_host: cli.sql_host,
            sql_port: cli.sql_port,
            sql_user: cli.sql_user,
            sql_pwd: cli.sql_pwd,
            sql_db: cli.sql_db,
            conn_pool_num: cli.conn_pool_num,
            thread_num: cli.thread_num,
            open_log: cli.open_log,
            log_level: cli.log_level,
            log_queue_size: cli.log_queue_size,
            resource_dir,
            max_connections: cli.max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("reactord").chain(args.iter().copied()))
    }

    #[test]
    fn rejects_out_of_range_port() {
        let cli = parse(&["--port", "80"]);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_invalid_trig_mode() {
        let cli = parse(&["--trig-mode", "9"]);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_zero_thread_count() {
        let cli = parse(&["--thread-num", "0"]);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_zero_max_connections() {
        let cli = parse(&["--max-connections", "0"]);
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let cli = parse(&[]);
        assert!(Config::from_cli(cli).is_ok());
    }
}
