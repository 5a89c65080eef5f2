//! Handler capability set.

use std::fmt;

use crate::observation::context::{Observation, ObservationEvent};
use crate::observation::error::HandlerError;

/// Lifecycle callback being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    Start,
    Stop,
    Error,
    Event,
}

impl fmt::Display for HandlerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandlerPhase::Start => "start",
            HandlerPhase::Stop => "stop",
            HandlerPhase::Error => "error",
            HandlerPhase::Event => "event",
        };
        f.write_str(s)
    }
}

/// A pluggable reaction to observation lifecycle events.
///
/// One instance is shared by every observation it gets selected for, possibly
/// from many tasks at once. Anything that must survive from `on_start` to
/// `on_stop` goes into [`Observation::state_mut`].
///
/// Callbacks run synchronously inside the observed request and should only
/// touch local state.
pub trait ObservationHandler: Send + Sync {
    /// Name used in logs and dispatch failures.
    fn name(&self) -> &str;

    fn supports_context(&self, observation: &Observation) -> bool;

    fn on_start(&self, _observation: &mut Observation) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_stop(&self, _observation: &mut Observation) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_error(&self, _observation: &mut Observation) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_event(
        &self,
        _observation: &mut Observation,
        _event: &ObservationEvent,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}
