//! Metrics collection from observations.
//!
//! # Metrics
//! For an observation named `<name>`:
//! - `<name>` (timer): duration of every closed observation, tagged with the
//!   low cardinality key values plus `error` (`none` or the cause kind)
//! - `<name>.active` (long task timer): observations still running
//! - `<name>.<event>` (counter): events signalled on the observation
//!
//! # Design Decisions
//! - The handler supports every observation; it is the catch-all sink
//! - Meter lookup is insert-or-get on the registry, safe under concurrent starts
//! - Every recording is mirrored into the `metrics` facade, so whatever
//!   recorder the host installs sees the same data

use std::sync::Arc;
use std::time::Instant;

use crate::observability::meter::{LongTaskTimer, MeterRegistry, Tags};
use crate::observation::{HandlerError, Observation, ObservationEvent, ObservationHandler};

/// Tag value for observations that stopped without error.
pub const NO_ERROR: &str = "none";

/// What the handler keeps on the observation between start and stop.
#[derive(Clone)]
struct MeterSample {
    started: Instant,
    active: Arc<LongTaskTimer>,
    task: u64,
}

/// Records observation lifecycles into a [`MeterRegistry`].
pub struct MeterHandler {
    registry: Arc<MeterRegistry>,
}

impl MeterHandler {
    pub fn new(registry: Arc<MeterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<MeterRegistry> {
        &self.registry
    }

    fn record(&self, observation: &mut Observation, error: &str) -> Result<(), HandlerError> {
        let sample = observation
            .state_mut()
            .remove::<MeterSample>()
            .ok_or_else(|| HandlerError::MissingState {
                what: "meter sample",
                observation: observation.name().to_string(),
            })?;

        let elapsed = sample.started.elapsed();
        sample.active.stop(sample.task);

        let tags = observation.low_cardinality().clone().with("error", error);
        self.registry.timer(observation.name(), tags.clone())?.record(elapsed);

        metrics::histogram!(observation.name().to_string(), labels(&tags)).record(elapsed.as_secs_f64());
        Ok(())
    }
}

fn labels(tags: &Tags) -> Vec<metrics::Label> {
    tags.iter()
        .map(|kv| metrics::Label::new(kv.key.clone(), kv.value.clone()))
        .collect()
}

impl ObservationHandler for MeterHandler {
    fn name(&self) -> &str {
        "meter"
    }

    fn supports_context(&self, _observation: &Observation) -> bool {
        true
    }

    fn on_start(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        let active = self.registry.long_task_timer(
            format!("{}.active", observation.name()),
            observation.low_cardinality().clone(),
        )?;
        let task = active.start();
        observation.state_mut().insert(MeterSample {
            started: Instant::now(),
            active,
            task,
        });
        Ok(())
    }

    fn on_stop(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        self.record(observation, NO_ERROR)
    }

    fn on_error(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        let kind = observation
            .error()
            .map(|cause| cause.kind().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.record(observation, &kind)
    }

    fn on_event(&self, observation: &mut Observation, event: &ObservationEvent) -> Result<(), HandlerError> {
        let name = format!("{}.{}", observation.name(), event.name());
        let tags = observation.low_cardinality().clone();
        self.registry.counter(name.clone(), tags.clone())?.increment();
        metrics::counter!(name, labels(&tags)).increment(1);
        Ok(())
    }
}
