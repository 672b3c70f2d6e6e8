//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! command-line flags and their environment variables.
//!
//! ```bash
//! pollserve 8080 --num-conns 4
//! POLLSERVE_POLL_TIMEOUT_MS=5000 pollserve --config server.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted `num_conns`.
pub const MAX_CONNS: usize = 65_536;

/// Largest accepted `read_chunk_size` and `max_request_line`, in bytes.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Immutable settings for one server run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Host name or address to bind.
    pub host: String,
    /// TCP port to bind; `0` picks an ephemeral port.
    pub port: u16,
    /// Pending-connection queue depth passed to `listen(2)`.
    pub backlog: u32,
    /// Upper bound on one readiness wait, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Maximum simultaneously open client connections.
    pub num_conns: usize,
    /// Bytes requested from the socket per read.
    pub read_chunk_size: usize,
    /// Bytes buffered per connection while waiting for a request line's CRLF.
    pub max_request_line: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            backlog: 10,
            poll_timeout_ms: 30_000,
            num_conns: 10,
            read_chunk_size: 1000,
            max_request_line: 8192,
        }
    }
}

impl Config {
    /// Loads a config file, filling omitted fields with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_owned(),
            source,
        })
    }

    /// The readiness-wait timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &'static str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        };
        if self.host.is_empty() {
            return invalid("host", "must not be empty");
        }
        if self.backlog == 0 {
            return invalid("backlog", "must be at least 1");
        }
        if self.num_conns == 0 {
            return invalid("num_conns", "must be at least 1");
        }
        if self.num_conns > MAX_CONNS {
            return invalid("num_conns", "must be at most 65536");
        }
        if self.read_chunk_size == 0 {
            return invalid("read_chunk_size", "must be at least 1");
        }
        if self.read_chunk_size > MAX_BUFFER_SIZE {
            return invalid("read_chunk_size", "must be at most 16 MiB");
        }
        if self.max_request_line == 0 {
            return invalid("max_request_line", "must be at least 1");
        }
        if self.max_request_line > MAX_BUFFER_SIZE {
            return invalid("max_request_line", "must be at most 16 MiB");
        }
        Ok(())
    }
}

/// Command-line interface. Every flag can also come from the environment.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "pollserve", version, about = "Readiness-polling HTTP request-line listener")]
pub struct Cli {
    /// Port to listen on
    #[arg(env = "POLLSERVE_PORT")]
    pub port: Option<u16>,

    /// Host or address to bind
    #[arg(long, env = "POLLSERVE_HOST")]
    pub host: Option<String>,

    /// listen(2) backlog
    #[arg(long, env = "POLLSERVE_BACKLOG")]
    pub backlog: Option<u32>,

    /// Readiness-wait timeout in milliseconds
    #[arg(long, env = "POLLSERVE_POLL_TIMEOUT_MS")]
    pub poll_timeout_ms: Option<u64>,

    /// Maximum simultaneous client connections
    #[arg(long, env = "POLLSERVE_NUM_CONNS")]
    pub num_conns: Option<usize>,

    /// Bytes read from a socket per call
    #[arg(long, env = "POLLSERVE_READ_CHUNK_SIZE")]
    pub read_chunk_size: Option<usize>,

    /// Bytes buffered per connection before an unterminated request line is dropped
    #[arg(long, env = "POLLSERVE_MAX_REQUEST_LINE")]
    pub max_request_line: Option<usize>,

    /// JSON config file; flags override its values
    #[arg(long, env = "POLLSERVE_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Resolves defaults, the optional file and the flags into a validated [`Config`].
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(ms) = self.poll_timeout_ms {
            config.poll_timeout_ms = ms;
        }
        if let Some(n) = self.num_conns {
            config.num_conns = n;
        }
        if let Some(n) = self.read_chunk_size {
            config.read_chunk_size = n;
        }
        if let Some(n) = self.max_request_line {
            config.max_request_line = n;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "pollserve-{}-{name}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backlog, 10);
        assert_eq!(config.poll_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli {
            port: Some(9000),
            num_conns: Some(3),
            host: Some("127.0.0.1".to_owned()),
            ..Cli::default()
        };
        let config = cli.into_config().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.num_conns, 3);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.backlog, Config::default().backlog);
    }

    #[test]
    fn cli_flags_map_onto_fields() {
        let cli = Cli::try_parse_from([
            "pollserve",
            "9000",
            "--num-conns",
            "3",
            "--host",
            "127.0.0.1",
        ])
        .unwrap();
        // Positional and long flags land in the matching fields; env fallbacks
        // only fill fields left unset on the command line.
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.num_conns, Some(3));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn file_fills_gaps_and_flags_win() {
        let path = temp_config("layered", r#"{ "port": 7000, "num_conns": 2, "backlog": 4 }"#);
        let cli = Cli {
            num_conns: Some(5),
            config: Some(path.clone()),
            ..Cli::default()
        };
        let config = cli.into_config().unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.backlog, 4);
        assert_eq!(config.num_conns, 5);
        assert_eq!(config.read_chunk_size, 1000);
    }

    #[test]
    fn unknown_file_fields_are_rejected() {
        let path = temp_config("unknown", r#"{ "workers": 4 }"#);
        let err = Config::from_file(&path).unwrap_err();
        std::fs::remove_file(path).unwrap();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/pollserve.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn zero_connections_is_invalid() {
        let cli = Cli {
            num_conns: Some(0),
            ..Cli::default()
        };
        assert!(matches!(
            cli.into_config(),
            Err(ConfigError::Invalid { field: "num_conns", .. })
        ));
    }

    #[test]
    fn out_of_range_sizes_are_invalid() {
        for (field, config) in [
            ("backlog", Config { backlog: 0, ..Config::default() }),
            ("read_chunk_size", Config { read_chunk_size: 0, ..Config::default() }),
            ("max_request_line", Config { max_request_line: 0, ..Config::default() }),
            ("host", Config { host: String::new(), ..Config::default() }),
            ("num_conns", Config { num_conns: MAX_CONNS + 1, ..Config::default() }),
            ("num_conns", Config { num_conns: usize::MAX, ..Config::default() }),
            ("read_chunk_size", Config { read_chunk_size: MAX_BUFFER_SIZE + 1, ..Config::default() }),
            ("max_request_line", Config { max_request_line: usize::MAX, ..Config::default() }),
        ] {
            match config.validate() {
                Err(ConfigError::Invalid { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected {field} to be invalid, got {other:?}"),
            }
        }
    }
}
