//! Server configuration
//!
//! Values are layered: built-in defaults, then `config.toml` (or the file given
//! with `--config`), then `ODATA__`-prefixed environment variables using `__`
//! as the section separator, e.g. `ODATA__SERVER__PORT=9000`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub service: ServiceConfig,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_body_size: usize,
    /// Allowed CORS origins. Empty disables the CORS layer.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_request_body_size: 10 * 1024 * 1024,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Path the service root is mounted at, e.g. `/odata`.
    pub path: String,
    /// JSON entity data model document.
    pub model_path: String,
    /// Optional JSON document of initial entities keyed by entity set.
    pub seed_path: Option<String>,
    /// Whether the in-memory source honours PATCH natively. When off, PATCH
    /// replaces the whole entity with the payload, so required properties the
    /// payload leaves out end up unset (logged at warn).
    pub native_patch: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            path: "/odata".to_string(),
            model_path: "model/demo.json".to_string(),
            seed_path: None,
            native_patch: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of parts in one `$batch` request.
    pub max_parts: usize,
    /// Maximum number of requests in one changeset.
    pub max_changeset_size: usize,
    /// Copy the request Content-Length onto every rendered part instead of
    /// computing each part's own length.
    pub reuse_request_content_length: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_parts: 100,
            max_changeset_size: 100,
            reuse_request_content_length: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// daily, hourly, minutely or never
    pub file_rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "odata-server".to_string(),
            file_rotation: "daily".to_string(),
        }
    }
}

impl Config {
    /// Loads `config.toml` from the working directory when present.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Loads `path` (which must exist) or the optional default file.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("config").required(false),
        };

        config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("ODATA")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_allowed_origins")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if self.server.max_request_body_size == 0 {
            return Err("server.max_request_body_size must be greater than 0".to_string());
        }
        if !self.service.path.starts_with('/') || self.service.path.len() < 2 {
            return Err(format!(
                "service.path must start with '/' and name a segment, got '{}'",
                self.service.path
            ));
        }
        if self.service.path.ends_with('/') {
            return Err("service.path must not end with '/'".to_string());
        }
        if self.batch.max_parts == 0 || self.batch.max_changeset_size == 0 {
            return Err("batch limits must be greater than 0".to_string());
        }
        match self.logging.file_rotation.as_str() {
            "daily" | "hourly" | "minutely" | "never" => Ok(()),
            other => Err(format!("unknown logging.file_rotation '{other}'")),
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {addr}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.service.path, "/odata");
        assert!(!config.batch.reuse_request_content_length);
    }

    #[test]
    fn test_validate_rejects_bad_service_path() {
        let mut config = Config::default();
        config.service.path = "odata".to_string();
        assert!(config.validate().is_err());

        config.service.path = "/".to_string();
        assert!(config.validate().is_err());

        config.service.path = "/odata/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_rotation() {
        let mut config = Config::default();
        config.logging.file_rotation = "weekly".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 9000;
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9000");
    }
}
