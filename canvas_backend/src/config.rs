use std::{env, net::SocketAddr, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Server settings, read once from the environment at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Notifications queued per listener before it counts as too slow and
    /// is dropped.
    pub listener_buffer: usize,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Listen on all interfaces so the server is reachable from
            // other hosts and containers.
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            listener_buffer: 256,
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let bind_addr = parse(&lookup, "CANVAS_BIND_ADDR")?.unwrap_or(defaults.bind_addr);
        let listener_buffer =
            parse(&lookup, "CANVAS_LISTENER_BUFFER")?.unwrap_or(defaults.listener_buffer);
        if listener_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "CANVAS_LISTENER_BUFFER",
                value: "0".to_string(),
            });
        }
        let keep_alive = parse(&lookup, "CANVAS_KEEP_ALIVE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.keep_alive);

        Ok(Config {
            bind_addr,
            listener_buffer,
            keep_alive,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
