use crate::lifecycle::RunningMode;
use serde::Deserialize;
use std::path::Path;

/// Global configuration for the gateway host
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Supervisor configuration
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Request header carrying the tenant hostname (default: x-hostname).
    /// Falls back to the Host header when absent on a request.
    #[serde(default = "default_host_header")]
    pub host_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            host_header: default_host_header(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    /// Deployment running mode: "multi" (default) or "single"
    #[serde(default)]
    pub mode: RunningMode,

    /// The pinned tenant name; required when mode is "single"
    pub single_app_name: Option<String>,

    /// Path to the tenant record database (default: ./tenants.db)
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            mode: RunningMode::default(),
            single_app_name: None,
            db_path: default_db_path(),
        }
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_host_header() -> String {
    "x-hostname".to_string()
}

fn default_db_path() -> String {
    "./tenants.db".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.supervisor.mode == RunningMode::Single && self.supervisor.single_app_name.is_none() {
            anyhow::bail!("Configuration error: single mode requires 'supervisor.single_app_name'");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9090
bind = "127.0.0.1"
host_header = "x-tenant"

[supervisor]
mode = "single"
single_app_name = "main"
db_path = "/var/lib/tenants.db"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.host_header, "x-tenant");
        assert_eq!(config.supervisor.mode, RunningMode::Single);
        assert_eq!(config.supervisor.single_app_name, Some("main".to_string()));
        assert_eq!(config.supervisor.db_path, "/var/lib/tenants.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config() {
        let toml = "";
        let config: Config = toml::from_str(toml).unwrap();

        // Should use all defaults
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.host_header, "x-hostname");
        assert_eq!(config.supervisor.mode, RunningMode::Multi);
        assert!(config.supervisor.single_app_name.is_none());
        assert_eq!(config.supervisor.db_path, "./tenants.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_mode_requires_pinned_name() {
        let toml = r#"
[supervisor]
mode = "single"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("single_app_name"));
    }

    #[test]
    fn test_single_app_name_without_single_mode_is_ignored() {
        let toml = r#"
[supervisor]
single_app_name = "main"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.supervisor.mode, RunningMode::Multi);
        assert!(config.validate().is_ok());
    }
}
