//! HTTP observation demo.
//!
//! One binary, two roles: `server` serves `GET /foo`, `client` calls it once
//! and prints the body. Both sides dump their meters at shutdown.
//!
//! ```text
//!     client ──GET /foo (traceparent)──▶ server
//!       │                                  │
//!       ▼                                  ▼
//!  Client observation                Server observation
//!       │                                  │
//!       ├─▶ [meter]                        ├─▶ [meter]
//!       └─▶ [sender | receiver | default]  └─▶ [sender | receiver | default]
//! ```

use std::path::PathBuf;

use clap::Parser;

use http_observation::config::{load_config, validate_config, AppConfig, ConfigError, Role};
use http_observation::lifecycle::startup;
use http_observation::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "http-observation")]
#[command(about = "Observed HTTP client and server", long_about = None)]
struct Cli {
    /// TOML config file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    role: Option<Role>,

    /// Server bind address override.
    #[arg(long)]
    bind: Option<String>,

    /// Client target URL override.
    #[arg(long)]
    target: Option<String>,
}

impl Cli {
    fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };

        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(target) = &self.target {
            config.client.target_url = target.clone();
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    init_logging(&config.logging)?;
    tracing::info!(role = ?config.role, "http-observation v0.1.0 starting");

    startup::run(config).await?;
    Ok(())
}
