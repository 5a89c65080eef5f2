//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Observability (registries, handler groups) → role
//!
//! Shutdown (shutdown.rs):
//!     Signal received → server drains → teardown hooks (metrics dump)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: observability first, then listeners
//! - Teardown hooks run once, after request processing has stopped

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::Observability;
