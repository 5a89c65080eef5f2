//! Dispatch and handler error types.

use std::fmt;

use axum::http::header::InvalidHeaderValue;
use thiserror::Error;

use crate::observability::meter::MeterError;
use crate::observation::context::ObservationStatus;
use crate::observation::handler::HandlerPhase;
use crate::observation::registry::ObservationHandle;

/// Failure raised by a single handler callback.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// State the handler put on the observation at start is gone.
    #[error("no {what} recorded on observation `{observation}`")]
    MissingState {
        what: &'static str,
        observation: String,
    },

    #[error(transparent)]
    Meter(#[from] MeterError),

    #[error("invalid propagation header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("{0}")]
    Other(String),
}

/// A handler failure tagged with where it happened.
#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: String,
    pub phase: HandlerPhase,
    pub source: HandlerError,
}

impl HandlerFailure {
    pub fn new(handler: impl Into<String>, phase: HandlerPhase, source: HandlerError) -> Self {
        Self {
            handler: handler.into(),
            phase,
            source,
        }
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler `{}` failed on {}: {}", self.handler, self.phase, self.source)
    }
}

/// Every handler failure of one dispatch, in dispatch order.
#[derive(Debug)]
pub struct DispatchFailure(pub Vec<HandlerFailure>);

impl DispatchFailure {
    pub fn failures(&self) -> &[HandlerFailure] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchFailure {}

/// Errors returned by an [`ObservationHandle`].
#[derive(Debug, Error)]
pub enum ObservationError {
    /// stop/error/event called on an observation that is not running.
    #[error("observation `{name}` is already {status}")]
    AlreadyClosed {
        name: String,
        status: ObservationStatus,
    },

    #[error(transparent)]
    Handler(#[from] DispatchFailure),
}

/// One or more handlers failed in `on_start`.
///
/// The handle is still valid: groups whose handler started fine must be closed
/// through it.
#[derive(Debug, Error)]
#[error("observation `{name}` started with failing handlers: {failure}")]
pub struct StartError {
    name: String,
    handle: Box<ObservationHandle>,
    failure: DispatchFailure,
}

impl StartError {
    pub(crate) fn new(handle: ObservationHandle, failure: DispatchFailure) -> Self {
        Self {
            name: handle.observation().name().to_string(),
            handle: Box::new(handle),
            failure,
        }
    }

    pub fn failure(&self) -> &DispatchFailure {
        &self.failure
    }

    pub fn into_handle(self) -> ObservationHandle {
        *self.handle
    }

    pub fn into_parts(self) -> (ObservationHandle, DispatchFailure) {
        (*self.handle, self.failure)
    }
}
