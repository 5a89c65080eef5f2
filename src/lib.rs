//! HTTP client/server pair instrumented through an observation registry.
//!
//! Every inbound request and outbound call becomes one observation. Handler
//! groups turn observations into meters and trace spans; the meters are
//! printed once at shutdown.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod observation;

pub use config::AppConfig;
pub use error::AppError;
pub use http::{HttpServer, ObservedClient};
pub use lifecycle::{Observability, Shutdown};
pub use observation::{ObservationHandler, ObservationRegistry};
