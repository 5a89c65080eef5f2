//! Observation registry and handler dispatch.
//!
//! # Data Flow
//! ```text
//! Client call / server request
//!     → context.rs (Observation: name, kind, key values, carrier)
//!     → registry.rs (start: resolve every group, call on_start)
//!         → group.rs (first-matching / all-matching selection)
//!         → handler.rs (ObservationHandler callbacks)
//!     → ObservationHandle (event, then exactly one of stop / error)
//! ```
//!
//! # Design Decisions
//! - Handler groups are fixed once the registry is shared; reads take no locks
//! - Selection for every group happens before any on_start runs
//! - Handler failures are returned, never swallowed, and never stop other groups
//! - Per-observation handler state lives on the observation, not in the handler

pub mod context;
pub mod error;
pub mod group;
pub mod handler;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{
    KeyValue, KeyValues, Observation, ObservationCause, ObservationEvent, ObservationKind,
    ObservationStatus,
};
pub use error::{DispatchFailure, HandlerError, HandlerFailure, ObservationError, StartError};
pub use group::{HandlerGroup, MatchPolicy};
pub use handler::{HandlerPhase, ObservationHandler};
pub use registry::{ObservationHandle, ObservationRegistry};
