//! Server-side observation middleware.
//!
//! # Responsibilities
//! - Wrap every inbound request in one `Server` observation
//! - Hand the request headers to the handlers as the propagation carrier
//! - Close with `error` on 5xx, `stop` otherwise
//!
//! Handler failures are logged and never change the response. A request
//! dropped before its response (disconnect, timeout) closes as `Cancelled`.

use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;
use crate::http::{InFlight, Outcome, SERVER_REQUESTS};
use crate::observation::{Observation, ObservationCause, ObservationKind};

/// `uri` tag for requests that matched no route.
const UNKNOWN_URI: &str = "UNKNOWN";

pub async fn observe_server_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let matched = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());
    let uri = matched.clone().unwrap_or_else(|| UNKNOWN_URI.to_string());

    let observation = Observation::new(SERVER_REQUESTS, ObservationKind::Server)
        .with_contextual_name(format!("{} {}", method, uri))
        .with_low_cardinality("method", method)
        .with_low_cardinality("uri", uri)
        .with_high_cardinality("http.url", request.uri().to_string())
        .with_carrier(request.headers().clone());

    let mut in_flight = InFlight::start(&state.observations, observation);

    let response = next.run(request).await;
    let status = response.status();

    let observation = in_flight.observation_mut();
    observation.add_low_cardinality("status", status.as_str());
    observation.add_low_cardinality("outcome", Outcome::from(status).as_str());
    if matched.is_none() && status == StatusCode::NOT_FOUND {
        observation.add_low_cardinality("uri", "NOT_FOUND");
    }

    if status.is_server_error() {
        in_flight.close(Some(ObservationCause::new("ServerError", status.to_string())));
    } else {
        in_flight.close(None);
    }

    response
}
