//! Composite handler groups.
//!
//! # Selection
//! - `FirstMatching`: handlers are offered the observation in construction
//!   order; the first one whose `supports_context` returns true is the only
//!   handler of this group for that observation. Later handlers are not asked.
//! - `AllMatching`: every supporting handler acts, in construction order.
//!
//! Order encodes precedence: put specific handlers (sender, receiver) before
//! generic fallbacks (default).

use std::fmt;
use std::sync::Arc;

use crate::observation::context::Observation;
use crate::observation::handler::ObservationHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    FirstMatching,
    AllMatching,
}

/// An ordered handler list with a selection policy.
#[derive(Clone)]
pub struct HandlerGroup {
    policy: MatchPolicy,
    handlers: Vec<Arc<dyn ObservationHandler>>,
}

impl HandlerGroup {
    pub fn first_matching(handlers: Vec<Arc<dyn ObservationHandler>>) -> Self {
        Self {
            policy: MatchPolicy::FirstMatching,
            handlers,
        }
    }

    pub fn all_matching(handlers: Vec<Arc<dyn ObservationHandler>>) -> Self {
        Self {
            policy: MatchPolicy::AllMatching,
            handlers,
        }
    }

    /// A group holding one handler.
    pub fn single(handler: Arc<dyn ObservationHandler>) -> Self {
        Self::first_matching(vec![handler])
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn handlers(&self) -> &[Arc<dyn ObservationHandler>] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers of this group that act on `observation`.
    ///
    /// Lazy: under `FirstMatching`, `supports_context` is not called on any
    /// handler after the first match.
    pub fn select<'a>(
        &'a self,
        observation: &'a Observation,
    ) -> impl Iterator<Item = &'a Arc<dyn ObservationHandler>> + 'a {
        let limit = match self.policy {
            MatchPolicy::FirstMatching => 1,
            MatchPolicy::AllMatching => usize::MAX,
        };
        self.handlers
            .iter()
            .filter(move |h| h.supports_context(observation))
            .take(limit)
    }
}

impl fmt::Debug for HandlerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("HandlerGroup")
            .field("policy", &self.policy)
            .field("handlers", &names)
            .finish()
    }
}
