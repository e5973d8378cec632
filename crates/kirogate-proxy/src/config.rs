//! Gateway configuration.
//!
//! Loaded from a JSON file (camelCase keys). Most fields have defaults; only
//! `apiKey` is required. `upstreamBaseUrl` / `authBaseUrl` exist so tests
//! and unusual deployments can point the gateway at alternative endpoints;
//! normally both derive from `region`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Key clients must present via `x-api-key` or `Authorization: Bearer`.
    pub api_key: String,

    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_kiro_version")]
    pub kiro_version: String,
    /// Optional 64-hex machine-id override; otherwise derived from the
    /// credentials.
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default = "default_system_version")]
    pub system_version: String,
    #[serde(default = "default_node_version")]
    pub node_version: String,

    #[serde(default)]
    pub upstream_base_url: Option<String>,
    #[serde(default)]
    pub auth_base_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_kiro_version() -> String {
    "0.2.13".to_string()
}

fn default_system_version() -> String {
    "darwin#24.6.0".to_string()
}

fn default_node_version() -> String {
    "22.15.0".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Base URL of the streaming backend.
    pub fn upstream_base(&self) -> String {
        match &self.upstream_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://q.{}.amazonaws.com", self.region),
        }
    }

    /// Base URL of the OAuth refresh endpoint.
    pub fn auth_base(&self) -> String {
        match &self.auth_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://prod.{}.auth.desktop.kiro.dev", self.region),
        }
    }
}
