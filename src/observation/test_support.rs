//! Handlers that record their calls, for dispatch tests.

use std::sync::{Arc, Mutex};

use crate::observation::context::{Observation, ObservationEvent, ObservationKind};
use crate::observation::error::HandlerError;
use crate::observation::handler::{HandlerPhase, ObservationHandler};

/// Shared, ordered log of `"<handler>:<callback>"` entries.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries excluding `supports` probes.
    pub fn callbacks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.ends_with(":supports"))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub struct RecordingHandler {
    name: String,
    kinds: Option<Vec<ObservationKind>>,
    fail_on: Option<HandlerPhase>,
    log: CallLog,
}

impl RecordingHandler {
    pub fn for_kinds(name: &str, kinds: &[ObservationKind], log: &CallLog) -> Arc<dyn ObservationHandler> {
        Arc::new(Self {
            name: name.to_string(),
            kinds: Some(kinds.to_vec()),
            fail_on: None,
            log: log.clone(),
        })
    }

    pub fn catch_all(name: &str, log: &CallLog) -> Arc<dyn ObservationHandler> {
        Arc::new(Self {
            name: name.to_string(),
            kinds: None,
            fail_on: None,
            log: log.clone(),
        })
    }

    pub fn failing(name: &str, phase: HandlerPhase, log: &CallLog) -> Arc<dyn ObservationHandler> {
        Arc::new(Self {
            name: name.to_string(),
            kinds: None,
            fail_on: Some(phase),
            log: log.clone(),
        })
    }

    fn record(&self, phase: HandlerPhase) -> Result<(), HandlerError> {
        self.log.push(format!("{}:{}", self.name, phase));
        if self.fail_on == Some(phase) {
            return Err(HandlerError::Other(format!("{} refused {}", self.name, phase)));
        }
        Ok(())
    }
}

impl ObservationHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_context(&self, observation: &Observation) -> bool {
        self.log.push(format!("{}:supports", self.name));
        match &self.kinds {
            Some(kinds) => kinds.contains(&observation.kind()),
            None => true,
        }
    }

    fn on_start(&self, _observation: &mut Observation) -> Result<(), HandlerError> {
        self.record(HandlerPhase::Start)
    }

    fn on_stop(&self, _observation: &mut Observation) -> Result<(), HandlerError> {
        self.record(HandlerPhase::Stop)
    }

    fn on_error(&self, _observation: &mut Observation) -> Result<(), HandlerError> {
        self.record(HandlerPhase::Error)
    }

    fn on_event(&self, _observation: &mut Observation, _event: &ObservationEvent) -> Result<(), HandlerError> {
        self.record(HandlerPhase::Event)
    }
}
