//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("client.target_url `{0}` is not a valid URL")]
    TargetUrl(String),

    #[error("client.target_url scheme `{0}` is not http or https")]
    TargetScheme(String),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("logging.filter `{0}` is empty")]
    EmptyLogFilter(String),

    #[error("observability.ignored_uris entry `{0}` must start with '/'")]
    IgnoredUri(String),
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.server.bind_address.clone()));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("server.request_timeout_secs"));
    }

    match Url::parse(&config.client.target_url) {
        Ok(url) if url.scheme() != "http" && url.scheme() != "https" => {
            errors.push(ValidationError::TargetScheme(url.scheme().to_string()));
        }
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::TargetUrl(config.client.target_url.clone())),
    }
    if config.client.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("client.timeout_secs"));
    }

    if config.logging.filter.trim().is_empty() {
        errors.push(ValidationError::EmptyLogFilter(config.logging.filter.clone()));
    }

    for uri in &config.observability.ignored_uris {
        if !uri.starts_with('/') {
            errors.push(ValidationError::IgnoredUri(uri.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
