//! Runtime configuration from environment variables.
//!
//! | Variable                          | Default                         |
//! |-----------------------------------|---------------------------------|
//! | `CANVAS_BRIDGE_SOCKET`            | [`default_socket_path`]         |
//! | `CANVAS_BRIDGE_ADDR`              | `127.0.0.1:3055`                |
//! | `CANVAS_BRIDGE_URL`               | `http://<CANVAS_BRIDGE_ADDR>`   |
//! | `CANVAS_BRIDGE_LIGHT_TIMEOUT_MS`  | `10000`                         |
//! | `CANVAS_BRIDGE_HEAVY_TIMEOUT_MS`  | `120000`                        |
//!
//! Command-line flags override these.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::bridge::{TimeoutPolicy, HEAVY_TIMEOUT, LIGHT_TIMEOUT};
use crate::ipc::default_socket_path;

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3055";

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Unix socket the execution target connects to.
    pub socket_path: PathBuf,
    /// Address the HTTP front door listens on.
    pub http_addr: SocketAddr,
    /// Base URL clients use to reach the host.
    pub bridge_url: String,
    pub light_timeout: Duration,
    pub heavy_timeout: Duration,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let socket_path = var("CANVAS_BRIDGE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(default_socket_path);

        let http_addr = var("CANVAS_BRIDGE_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("CANVAS_BRIDGE_ADDR must be a valid host:port")?;

        let bridge_url = var("CANVAS_BRIDGE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{}", http_addr));

        let light_timeout = millis(var("CANVAS_BRIDGE_LIGHT_TIMEOUT_MS"), LIGHT_TIMEOUT)
            .context("CANVAS_BRIDGE_LIGHT_TIMEOUT_MS must be a number of milliseconds")?;
        let heavy_timeout = millis(var("CANVAS_BRIDGE_HEAVY_TIMEOUT_MS"), HEAVY_TIMEOUT)
            .context("CANVAS_BRIDGE_HEAVY_TIMEOUT_MS must be a number of milliseconds")?;

        Ok(Self {
            socket_path,
            http_addr,
            bridge_url,
            light_timeout,
            heavy_timeout,
        })
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::with_budgets(self.light_timeout, self.heavy_timeout)
    }
}

fn millis(value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(raw) => Ok(Duration::from_millis(raw.trim().parse::<u64>()?)),
        None => Ok(default),
    }
}
