//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which side of the HTTP exchange this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Call the server once, print the body, exit.
    Client,
    /// Serve `GET /foo` until a shutdown signal.
    #[default]
    Server,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub role: Role,

    /// Server role settings.
    pub server: ServerConfig,

    /// Client role settings.
    pub client: ClientConfig,

    /// Observation handlers and shutdown dump.
    pub observability: ObservabilityConfig,

    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// URL fetched in client role.
    pub target_url: String,

    /// Total request timeout in seconds.
    pub timeout_secs: u64,

    /// `client.name` tag; defaults to the target host when empty.
    pub client_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_url: "http://localhost:8080/foo".to_string(),
            timeout_secs: 10,
            client_name: String::new(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Register the sender/receiver/default tracing group.
    pub tracing_enabled: bool,

    /// Register the meter handler group.
    pub metrics_enabled: bool,

    /// Print every meter at teardown.
    pub dump_on_shutdown: bool,

    /// Low cardinality key values added to every observation before it closes.
    pub common_tags: BTreeMap<String, String>,

    /// Server routes that are not observed (matched path, e.g. "/health").
    pub ignored_uris: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: true,
            metrics_enabled: true,
            dump_on_shutdown: true,
            common_tags: BTreeMap::new(),
            ignored_uris: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directives, used when `RUST_LOG` is not set.
    pub filter: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "http_observation=info,tower_http=info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
