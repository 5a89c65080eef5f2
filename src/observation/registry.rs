//! Central observation dispatcher.

use std::fmt;
use std::sync::Arc;

use crate::observation::context::{Observation, ObservationCause, ObservationEvent, ObservationStatus};
use crate::observation::error::{DispatchFailure, HandlerFailure, ObservationError, StartError};
use crate::observation::group::HandlerGroup;
use crate::observation::handler::{HandlerPhase, ObservationHandler};

/// Decides at start whether an observation is dispatched at all.
pub type ObservationPredicate = Arc<dyn Fn(&Observation) -> bool + Send + Sync>;

/// Adjusts an observation right before its stop/error handlers run.
pub type ObservationFilter = Arc<dyn Fn(&mut Observation) + Send + Sync>;

/// Holds the configured handler groups and starts observations against them.
///
/// Configure with `&mut self`, then share behind an `Arc`; the group list is
/// never mutated afterwards.
#[derive(Default)]
pub struct ObservationRegistry {
    groups: Vec<HandlerGroup>,
    predicates: Vec<ObservationPredicate>,
    filters: Vec<ObservationFilter>,
}

impl ObservationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with no groups: every handle is a no-op.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Append a handler group. Groups are dispatched in registration order.
    pub fn register(&mut self, group: HandlerGroup) -> &mut Self {
        tracing::debug!(group = ?group, position = self.groups.len(), "Registered handler group");
        self.groups.push(group);
        self
    }

    /// Observations rejected by any predicate are started as no-ops.
    pub fn observation_predicate<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&Observation) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Filters run in registration order before stop/error handlers.
    pub fn observation_filter<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&mut Observation) + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn groups(&self) -> &[HandlerGroup] {
        &self.groups
    }

    pub fn is_noop(&self) -> bool {
        self.groups.is_empty()
    }

    /// Start `observation`.
    ///
    /// Every group's handlers are selected first, then `on_start` runs on each
    /// selection in group order. A failing `on_start` does not stop the
    /// remaining groups; the failures come back in [`StartError`] together
    /// with the handle.
    pub fn start(&self, mut observation: Observation) -> Result<ObservationHandle, StartError> {
        observation.set_status(ObservationStatus::Running);

        if !self.predicates.iter().all(|predicate| predicate(&observation)) {
            tracing::trace!(observation = %observation.name(), "Observation skipped by predicate");
            return Ok(ObservationHandle::new(observation, Vec::new(), Vec::new()));
        }

        let selected: Vec<Arc<dyn ObservationHandler>> = self
            .groups
            .iter()
            .flat_map(|group| group.select(&observation))
            .cloned()
            .collect();

        let mut started = Vec::with_capacity(selected.len());
        let mut failures = Vec::new();
        for (slot, handler) in selected.into_iter().enumerate() {
            observation.enter_slot(slot);
            match handler.on_start(&mut observation) {
                Ok(()) => started.push(Dispatched { slot, handler }),
                Err(source) => {
                    failures.push(HandlerFailure::new(handler.name(), HandlerPhase::Start, source));
                }
            }
        }

        tracing::trace!(
            observation = %observation.name(),
            kind = %observation.kind(),
            handlers = started.len(),
            "Observation started"
        );

        let handle = ObservationHandle::new(observation, started, self.filters.clone());
        if failures.is_empty() {
            Ok(handle)
        } else {
            Err(StartError::new(handle, DispatchFailure(failures)))
        }
    }
}

impl fmt::Debug for ObservationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationRegistry")
            .field("groups", &self.groups)
            .field("predicates", &self.predicates.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// A handler that started, with the state slot it was started in.
struct Dispatched {
    slot: usize,
    handler: Arc<dyn ObservationHandler>,
}

/// A started observation.
///
/// Exactly one of [`stop`](Self::stop) or [`error`](Self::error) must be
/// called. Calls after the first are rejected with
/// [`ObservationError::AlreadyClosed`] and reach no handler.
pub struct ObservationHandle {
    observation: Observation,
    handlers: Vec<Dispatched>,
    filters: Vec<ObservationFilter>,
}

impl ObservationHandle {
    fn new(
        observation: Observation,
        handlers: Vec<Dispatched>,
        filters: Vec<ObservationFilter>,
    ) -> Self {
        Self {
            observation,
            handlers,
            filters,
        }
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    /// Mutable access for key values learned mid-flight (status codes...).
    pub fn observation_mut(&mut self) -> &mut Observation {
        &mut self.observation
    }

    pub fn status(&self) -> ObservationStatus {
        self.observation.status()
    }

    /// True when no handler is attached.
    pub fn is_noop(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Names of the handlers that started, in dispatch order.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|d| d.handler.name()).collect()
    }

    /// Signal a named event on the running observation.
    pub fn event(&mut self, name: impl Into<String>) -> Result<(), ObservationError> {
        self.ensure_running()?;
        let event = ObservationEvent::new(name);
        let mut failures = Vec::new();
        for Dispatched { slot, handler } in &self.handlers {
            self.observation.enter_slot(*slot);
            if let Err(source) = handler.on_event(&mut self.observation, &event) {
                failures.push(HandlerFailure::new(handler.name(), HandlerPhase::Event, source));
            }
        }
        into_result(failures)
    }

    pub fn stop(&mut self) -> Result<(), ObservationError> {
        self.close(None)
    }

    pub fn error(&mut self, cause: ObservationCause) -> Result<(), ObservationError> {
        self.close(Some(cause))
    }

    fn ensure_running(&self) -> Result<(), ObservationError> {
        match self.observation.status() {
            ObservationStatus::Running => Ok(()),
            status => Err(ObservationError::AlreadyClosed {
                name: self.observation.name().to_string(),
                status,
            }),
        }
    }

    fn close(&mut self, cause: Option<ObservationCause>) -> Result<(), ObservationError> {
        self.ensure_running()?;

        for filter in &self.filters {
            filter(&mut self.observation);
        }

        // The lifecycle is closed even if a handler below fails.
        let phase = match cause {
            Some(cause) => {
                self.observation.set_error(cause);
                self.observation.set_status(ObservationStatus::Errored);
                HandlerPhase::Error
            }
            None => {
                self.observation.set_status(ObservationStatus::Stopped);
                HandlerPhase::Stop
            }
        };

        let mut failures = Vec::new();
        for Dispatched { slot, handler } in &self.handlers {
            self.observation.enter_slot(*slot);
            let result = match phase {
                HandlerPhase::Error => handler.on_error(&mut self.observation),
                _ => handler.on_stop(&mut self.observation),
            };
            if let Err(source) = result {
                failures.push(HandlerFailure::new(handler.name(), phase, source));
            }
        }
        into_result(failures)
    }
}

fn into_result(failures: Vec<HandlerFailure>) -> Result<(), ObservationError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ObservationError::Handler(DispatchFailure(failures)))
    }
}

impl fmt::Debug for ObservationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationHandle")
            .field("observation", &self.observation.name())
            .field("status", &self.observation.status())
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl Drop for ObservationHandle {
    fn drop(&mut self) {
        if self.observation.status() == ObservationStatus::Running && !self.handlers.is_empty() {
            tracing::warn!(
                observation = %self.observation.name(),
                handlers = ?self.handler_names(),
                "Observation dropped without stop or error"
            );
        }
    }
}
