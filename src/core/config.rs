//! Configuration management for finmcp.
//!
//! Handles loading configuration from TOML files and turning it into
//! client and server settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::RetryConfig;
use crate::mcp::{ClientConfig, ServerConfig};

/// Name of the project-local config file.
pub const LOCAL_CONFIG_FILE: &str = ".finmcp.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings
    pub logging: LoggingConfig,

    /// Client settings
    pub client: ClientSettings,

    /// Servers started by `finmcp serve`
    pub servers: Vec<ServerSettings>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` and `-v` are absent
    pub level: String,
}

/// Client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Server URLs to connect to, in precedence order
    pub servers: Vec<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Transport retries per invocation
    pub retry_attempts: u32,

    /// Whether timed-out invocations are retried
    pub retry_on_timeout: bool,

    /// Reconnect attempts before a server is marked failed
    pub reconnect_attempts: u32,

    /// Upper bound on the reconnect backoff in seconds
    pub reconnect_cap_secs: u64,

    /// Keepalive ping interval in seconds (0 disables)
    pub ping_interval_secs: u64,
}

/// One server started by `finmcp serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server name
    pub name: String,

    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Built-in tools to expose (empty = all)
    pub tools: Vec<String>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.finmcp.toml` in current directory
    /// 2. `~/.config/finmcp/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        match Self::find() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Find the config file that [`load`](Self::load) would read.
    pub fn find() -> Option<PathBuf> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        Self::config_dir().map(|dir| dir.join("config.toml")).filter(|path| path.exists())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_toml(&content).map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("finmcp"))
    }

    /// Build the client configuration.
    pub fn client_config(&self) -> ClientConfig {
        let client = &self.client;
        let ping = (client.ping_interval_secs > 0).then(|| Duration::from_secs(client.ping_interval_secs));

        ClientConfig {
            servers: client.servers.clone(),
            request_timeout: Duration::from_secs(client.timeout_secs),
            invoke_retry: RetryConfig { max_attempts: client.retry_attempts.saturating_sub(1), ..RetryConfig::invocation() },
            retry_on_timeout: client.retry_on_timeout,
            reconnect: RetryConfig {
                max_attempts: client.reconnect_attempts.saturating_sub(1),
                max_delay: Duration::from_secs(client.reconnect_cap_secs),
                ..RetryConfig::reconnect()
            },
            ping_interval: ping,
            ..ClientConfig::default()
        }
    }

    /// Build the server configurations, with one default server if none are listed.
    pub fn server_configs(&self) -> Vec<(ServerConfig, Vec<String>)> {
        if self.servers.is_empty() {
            return vec![(ServerConfig::default(), Vec::new())];
        }
        self.servers
            .iter()
            .map(|s| (ServerConfig::new(s.name.clone(), s.host.clone(), s.port), s.tools.clone()))
            .collect()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.client.timeout_secs == 0 {
            anyhow::bail!("client.timeout_secs must be greater than zero");
        }
        if self.client.retry_attempts == 0 || self.client.reconnect_attempts == 0 {
            anyhow::bail!("client.retry_attempts and client.reconnect_attempts count the first try and must be at least 1");
        }
        for url in &self.client.servers {
            crate::mcp::validate_url(url)?;
        }

        let mut names = std::collections::HashSet::new();
        for server in &self.servers {
            if !names.insert(server.name.as_str()) {
                anyhow::bail!("duplicate server name '{}'", server.name);
            }
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "warn".to_string() }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            timeout_secs: 60,
            retry_attempts: 3,
            retry_on_timeout: false,
            reconnect_attempts: 5,
            reconnect_cap_secs: 30,
            ping_interval_secs: 30,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self { name: server.name, host: server.host, port: server.port, tools: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.client.timeout_secs, 60);
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        assert!(toml_str.contains("[logging]"));
        assert!(toml_str.contains("[client]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [client]
            servers = ["ws://localhost:8081", "ws://localhost:8082"]
            timeout_secs = 5

            [[servers]]
            name = "market_data"
            port = 8081
            tools = ["echo"]

            [[servers]]
            name = "news"
            port = 8082
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.client.servers.len(), 2);
        assert_eq!(config.client.timeout_secs, 5);
        assert_eq!(config.client.retry_attempts, 3);
        assert_eq!(config.servers[0].name, "market_data");
        assert_eq!(config.servers[0].host, "127.0.0.1");
        assert_eq!(config.servers[1].tools, Vec::<String>::new());
    }

    #[test]
    fn test_client_config_conversion() {
        let toml_str = r#"
            [client]
            servers = ["ws://localhost:8081"]
            timeout_secs = 2
            retry_attempts = 1
            reconnect_attempts = 3
            reconnect_cap_secs = 4
            ping_interval_secs = 0
        "#;

        let client = Config::from_toml(toml_str).unwrap().client_config();
        assert_eq!(client.request_timeout, Duration::from_secs(2));
        assert_eq!(client.invoke_retry.total_attempts(), 1);
        assert_eq!(client.reconnect.total_attempts(), 3);
        assert_eq!(client.reconnect.max_delay, Duration::from_secs(4));
        assert_eq!(client.ping_interval, None);
    }

    #[test]
    fn test_server_configs_default_to_one() {
        let servers = Config::default().server_configs();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].0.port, 8080);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(Config::from_toml("[client]\ntimeout_secs = 0").is_err());
        assert!(Config::from_toml("[client]\nservers = [\"http://localhost\"]").is_err());
        assert!(Config::from_toml("[[servers]]\nname = \"a\"\n[[servers]]\nname = \"a\"\nport = 9000").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(Config::load_from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_load_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LOCAL_CONFIG_FILE), "[client]\nretry_attempts = 7\n").unwrap();

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let found = Config::find();
        let loaded = Config::load();
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(found, Some(PathBuf::from(LOCAL_CONFIG_FILE)));
        assert_eq!(loaded.unwrap().client.retry_attempts, 7);
    }
}
