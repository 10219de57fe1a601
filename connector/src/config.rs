//! Configuration file parser for the Crank connector
//!
//! Supports crank.yml with the origin base URL, the router sockets to keep
//! open, and origin client settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Origin base URL that request paths are resolved against
    pub target: String,

    /// Router socket URLs (ws:// or wss://)
    #[serde(default)]
    pub routers: Vec<String>,

    /// Idle sockets kept open to each router
    #[serde(default = "default_sockets")]
    pub sockets_per_router: usize,

    /// Delay before redialling a router after a failure
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// Origin HTTP client settings
    #[serde(default)]
    pub origin: OriginConfig,
}

/// Origin HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout; unlimited when absent
    pub request_timeout_secs: Option<u64>,

    /// Follow origin redirects instead of relaying them
    #[serde(default)]
    pub follow_redirects: bool,

    /// Send HTTP/1 header names in Title-Case
    #[serde(default)]
    pub title_case_headers: bool,

    /// Honour HTTP_PROXY and friends when calling the origin
    #[serde(default)]
    pub use_system_proxy: bool,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: None,
            follow_redirects: false,
            title_case_headers: false,
            use_system_proxy: false,
        }
    }
}

fn default_sockets() -> usize {
    2
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

impl ConnectorConfig {
    /// Configuration assembled from command-line flags alone
    pub fn new(target: String, routers: Vec<String>) -> Self {
        Self {
            target,
            routers,
            sockets_per_router: default_sockets(),
            reconnect_secs: default_reconnect_secs(),
            origin: OriginConfig::default(),
        }
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse without validating, so command-line flags can still fill gaps
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.target_url()?;

        if self.routers.is_empty() {
            anyhow::bail!("No routers defined in configuration");
        }
        for router in &self.routers {
            let url = Url::parse(router).with_context(|| format!("Invalid router URL '{}'", router))?;
            match url.scheme() {
                "ws" | "wss" => {}
                other => anyhow::bail!("Invalid scheme '{}' for router '{}'", other, router),
            }
        }
        if self.sockets_per_router == 0 {
            anyhow::bail!("sockets_per_router must be at least 1");
        }

        Ok(())
    }

    /// Parsed origin base URL
    pub fn target_url(&self) -> Result<Url> {
        let url = Url::parse(&self.target)
            .with_context(|| format!("Invalid target URL '{}'", self.target))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => anyhow::bail!("Invalid scheme '{}' for target '{}'", other, self.target),
        }
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<PathBuf> {
        let candidates = ["crank.yml", "crank.yaml", ".crank.yml", ".crank.yaml"];

        // Check current directory
        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }
}
