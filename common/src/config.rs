// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub scheduling: SchedulingConfig,
    pub reasoning: ReasoningConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Postgres
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_hours: u64,
}

/// Institutional scheduling knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// When set, every committee works in one shared pool of schedules
    #[serde(default)]
    pub global_sharing: bool,
    /// Levels reserved for non-standard cohorts (informational flag only)
    #[serde(default)]
    pub irregular_levels: Vec<i32>,
    #[serde(default = "default_section_capacity")]
    pub default_section_capacity: i32,
    #[serde(default)]
    pub category_a_codes: Vec<String>,
    #[serde(default)]
    pub category_b_codes: Vec<String>,
}

fn default_section_capacity() -> i32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Absent endpoint selects the built-in reference planner
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_seconds: u64,
}

fn default_model() -> String {
    "timetable-planner".to_string()
}

fn default_reasoning_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,
}

fn default_json_logs() -> bool {
    true
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.backend == StorageBackend::Postgres {
            if self.database.url.is_empty() {
                return Err("Database URL cannot be empty".to_string());
            }
            if self.database.max_connections == 0 {
                return Err("Database max_connections must be greater than 0".to_string());
            }
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("JWT secret cannot be empty".to_string());
        }

        if self.scheduling.default_section_capacity <= 0 {
            return Err("Scheduling default_section_capacity must be greater than 0".to_string());
        }
        if let Some(code) = self
            .scheduling
            .category_a_codes
            .iter()
            .find(|code| self.scheduling.category_b_codes.contains(code))
        {
            return Err(format!(
                "Course code {} cannot be listed in both category A and category B",
                code
            ));
        }

        if self.reasoning.timeout_seconds == 0 {
            return Err("Reasoning timeout_seconds must be greater than 0".to_string());
        }
        if matches!(&self.reasoning.endpoint, Some(endpoint) if endpoint.trim().is_empty()) {
            return Err("Reasoning endpoint cannot be blank when set".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                backend: StorageBackend::Postgres,
                url: "postgresql://localhost/timetable".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                jwt_expiration_hours: 24,
            },
            scheduling: SchedulingConfig {
                global_sharing: false,
                irregular_levels: Vec::new(),
                default_section_capacity: default_section_capacity(),
                category_a_codes: Vec::new(),
                category_b_codes: Vec::new(),
            },
            reasoning: ReasoningConfig {
                endpoint: None,
                api_key: None,
                model: default_model(),
                timeout_seconds: default_reasoning_timeout(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
        }
    }
}
