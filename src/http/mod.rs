//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Server side:
//!     TCP connection
//!         → server.rs (Axum setup, request id, trace, timeout)
//!         → observe.rs (one Server observation per request)
//!         → GET /foo handler
//!
//! Client side:
//!     client.rs (one Client observation per call)
//!         → carrier headers (traceparent) added to the outbound request
//!         → reqwest
//! ```

pub mod client;
pub mod observe;
pub mod server;

use std::fmt;

use axum::http::StatusCode;

use crate::observation::{Observation, ObservationCause, ObservationHandle, ObservationRegistry};

pub use client::{ClientError, ObservedClient};
pub use server::HttpServer;

/// Observation name for inbound requests.
pub const SERVER_REQUESTS: &str = "http.server.requests";

/// Observation name for outbound calls.
pub const CLIENT_REQUESTS: &str = "http.client.requests";

/// Status class of an HTTP response, used as the `outcome` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Informational => "INFORMATIONAL",
            Outcome::Success => "SUCCESS",
            Outcome::Redirection => "REDIRECTION",
            Outcome::ClientError => "CLIENT_ERROR",
            Outcome::ServerError => "SERVER_ERROR",
            Outcome::Unknown => "UNKNOWN",
        }
    }
}

impl From<StatusCode> for Outcome {
    fn from(status: StatusCode) -> Self {
        match status.as_u16() {
            100..=199 => Outcome::Informational,
            200..=299 => Outcome::Success,
            300..=399 => Outcome::Redirection,
            400..=499 => Outcome::ClientError,
            500..=599 => Outcome::ServerError,
            _ => Outcome::Unknown,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kind recorded when a request future is dropped mid-flight.
pub const CANCELLED: &str = "Cancelled";

/// An observation tied to one request future.
///
/// Start failures are logged and the request goes on. If the future is
/// dropped before [`close`](Self::close) (client disconnect, timeout,
/// caller cancellation) the observation is closed with a `Cancelled` error.
pub(crate) struct InFlight {
    handle: ObservationHandle,
}

impl InFlight {
    pub(crate) fn start(registry: &ObservationRegistry, observation: Observation) -> Self {
        let handle = match registry.start(observation) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Observation handlers failed on start");
                e.into_handle()
            }
        };
        Self { handle }
    }

    pub(crate) fn observation(&self) -> &Observation {
        self.handle.observation()
    }

    pub(crate) fn observation_mut(&mut self) -> &mut Observation {
        self.handle.observation_mut()
    }

    /// `stop` when `cause` is `None`, `error` otherwise. Handler failures
    /// are logged.
    pub(crate) fn close(&mut self, cause: Option<ObservationCause>) {
        let result = match cause {
            Some(cause) => self.handle.error(cause),
            None => self.handle.stop(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Observation handlers failed on close");
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.handle.status().is_closed() {
            return;
        }
        tracing::debug!(observation = %self.handle.observation().name(), "Request dropped before completion");
        self.handle
            .observation_mut()
            .add_low_cardinality("outcome", Outcome::Unknown.as_str());
        self.close(Some(ObservationCause::new(CANCELLED, "request dropped before completion")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::observability::{MeterHandler, MeterRegistry};
    use crate::observation::{HandlerGroup, ObservationKind};

    #[test]
    fn test_dropped_request_closes_as_cancelled() {
        let meters = Arc::new(MeterRegistry::new());
        let mut registry = ObservationRegistry::new();
        registry.register(HandlerGroup::single(Arc::new(MeterHandler::new(meters.clone()))));

        let in_flight = InFlight::start(
            &registry,
            Observation::new(SERVER_REQUESTS, ObservationKind::Server).with_low_cardinality("uri", "/foo"),
        );
        drop(in_flight);

        let tags = [("error", CANCELLED), ("outcome", "UNKNOWN"), ("uri", "/foo")]
            .into_iter()
            .collect();
        assert_eq!(meters.timer(SERVER_REQUESTS, tags).unwrap().count(), 1);
        let active = meters
            .long_task_timer("http.server.requests.active", [("uri", "/foo")].into_iter().collect())
            .unwrap();
        assert_eq!(active.active_tasks(), 0);
    }

    #[test]
    fn test_closed_request_is_not_cancelled_on_drop() {
        let meters = Arc::new(MeterRegistry::new());
        let mut registry = ObservationRegistry::new();
        registry.register(HandlerGroup::single(Arc::new(MeterHandler::new(meters.clone()))));

        let mut in_flight = InFlight::start(&registry, Observation::new(SERVER_REQUESTS, ObservationKind::Server));
        in_flight.close(None);
        drop(in_flight);

        // Long task timer and one timer with error=none, nothing else.
        assert_eq!(meters.len(), 2);
        let tags = [("error", "none")].into_iter().collect();
        assert_eq!(meters.timer(SERVER_REQUESTS, tags).unwrap().count(), 1);
    }

    #[test]
    fn test_outcome_from_status() {
        assert_eq!(Outcome::from(StatusCode::CONTINUE), Outcome::Informational);
        assert_eq!(Outcome::from(StatusCode::OK), Outcome::Success);
        assert_eq!(Outcome::from(StatusCode::FOUND), Outcome::Redirection);
        assert_eq!(Outcome::from(StatusCode::NOT_FOUND), Outcome::ClientError);
        assert_eq!(Outcome::from(StatusCode::BAD_GATEWAY), Outcome::ServerError);
        assert_eq!(Outcome::ServerError.to_string(), "SERVER_ERROR");
    }
}
