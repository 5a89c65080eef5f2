//! Distributed tracing handlers.
//!
//! # Responsibilities
//! - Open a span when an observation starts, finish it on stop/error
//! - Inject W3C `traceparent` into outbound carriers (sender)
//! - Continue the caller's trace from inbound carriers (receiver)
//! - Hand finished spans to a [`SpanReporter`]
//!
//! # Design Decisions
//! - Handlers are stateless; the open span lives on the observation
//! - Span export is a reporter concern; the default reporter logs one event
//!   per span
//! - Register the three handlers in one first-matching group, most specific
//!   first, so the default handler only sees what the others decline

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::HeaderValue;
use uuid::Uuid;

use crate::observation::{
    HandlerError, KeyValues, Observation, ObservationEvent, ObservationHandler, ObservationKind,
};

/// W3C trace context header.
pub const TRACEPARENT: &str = "traceparent";

/// Identifiers that travel across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
    sampled: bool,
}

impl TraceContext {
    /// Start a new trace.
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: new_span_id(),
            sampled: true,
        }
    }

    /// A new span in the same trace.
    pub fn child_of(parent: &TraceContext) -> Self {
        Self {
            trace_id: parent.trace_id.clone(),
            span_id: new_span_id(),
            sampled: parent.sampled,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }

    /// Parse a `traceparent` value; `None` for anything malformed.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if !is_hex(version, 2) || version == "ff" {
            return None;
        }
        // Version 00 has exactly four fields.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if !is_hex(trace_id, 32) || is_zero(trace_id) {
            return None;
        }
        if !is_hex(span_id, 16) || is_zero(span_id) {
            return None;
        }
        if !is_hex(flags, 2) {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            sampled: flags & 0x01 == 0x01,
        })
    }
}

fn new_span_id() -> String {
    format!("{:016x}", rand::random::<u64>().max(1))
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error(String),
}

/// A span opened by one of the tracing handlers.
#[derive(Debug, Clone)]
pub struct TracingSpan {
    pub context: TraceContext,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: ObservationKind,
    pub tags: KeyValues,
    pub events: Vec<String>,
    pub started: Instant,
    pub duration: Duration,
    pub status: SpanStatus,
}

impl TracingSpan {
    fn open(observation: &Observation, context: TraceContext, parent_span_id: Option<String>) -> Self {
        Self {
            context,
            parent_span_id,
            name: span_name(observation),
            kind: observation.kind(),
            tags: KeyValues::new(),
            events: Vec::new(),
            started: Instant::now(),
            duration: Duration::ZERO,
            status: SpanStatus::Unset,
        }
    }
}

fn span_name(observation: &Observation) -> String {
    observation
        .contextual_name()
        .unwrap_or_else(|| observation.name())
        .to_string()
}

/// Receives finished spans.
pub trait SpanReporter: Send + Sync {
    fn report(&self, span: TracingSpan);
}

/// Emits one structured log event per finished span.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSpanReporter;

impl SpanReporter for LoggingSpanReporter {
    fn report(&self, span: TracingSpan) {
        let status = match &span.status {
            SpanStatus::Unset => "unset".to_string(),
            SpanStatus::Ok => "ok".to_string(),
            SpanStatus::Error(cause) => format!("error: {}", cause),
        };
        tracing::info!(
            trace_id = %span.context.trace_id(),
            span_id = %span.context.span_id(),
            parent_id = ?span.parent_span_id,
            name = %span.name,
            kind = %span.kind,
            duration_ms = span.duration.as_secs_f64() * 1000.0,
            tags = %span.tags,
            status = %status,
            "Span finished"
        );
    }
}

/// Keeps finished spans in memory.
#[derive(Debug, Default)]
pub struct CollectingSpanReporter {
    spans: Mutex<Vec<TracingSpan>>,
}

impl CollectingSpanReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<TracingSpan> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SpanReporter for CollectingSpanReporter {
    fn report(&self, span: TracingSpan) {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner).push(span);
    }
}

/// Behaviour shared by the three handlers once a span is open.
struct SpanLifecycle {
    reporter: Arc<dyn SpanReporter>,
}

impl SpanLifecycle {
    fn begin(&self, observation: &mut Observation, span: TracingSpan) {
        tracing::debug!(
            trace_id = %span.context.trace_id(),
            span_id = %span.context.span_id(),
            name = %span.name,
            "Span started"
        );
        observation.state_mut().insert(span);
    }

    fn event(&self, observation: &mut Observation, event: &ObservationEvent) -> Result<(), HandlerError> {
        let name = observation.name().to_string();
        let span = observation
            .state_mut()
            .get_mut::<TracingSpan>()
            .ok_or(HandlerError::MissingState { what: "span", observation: name })?;
        span.events.push(event.name().to_string());
        Ok(())
    }

    fn finish(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        let mut span = observation
            .state_mut()
            .remove::<TracingSpan>()
            .ok_or_else(|| HandlerError::MissingState {
                what: "span",
                observation: observation.name().to_string(),
            })?;

        span.name = span_name(observation);
        span.tags.extend_from(observation.low_cardinality());
        span.tags.extend_from(observation.high_cardinality());
        span.duration = span.started.elapsed();
        span.status = match observation.error() {
            Some(cause) => {
                span.tags.insert("error", cause.kind());
                SpanStatus::Error(cause.to_string())
            }
            None => SpanStatus::Ok,
        };
        self.reporter.report(span);
        Ok(())
    }
}

/// Traces outbound calls and propagates their context.
pub struct SenderTracingHandler {
    spans: SpanLifecycle,
}

impl SenderTracingHandler {
    pub fn new(reporter: Arc<dyn SpanReporter>) -> Self {
        Self {
            spans: SpanLifecycle { reporter },
        }
    }
}

impl ObservationHandler for SenderTracingHandler {
    fn name(&self) -> &str {
        "sender-tracing"
    }

    fn supports_context(&self, observation: &Observation) -> bool {
        matches!(observation.kind(), ObservationKind::Client | ObservationKind::Producer)
    }

    fn on_start(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        let context = TraceContext::new_root();
        let header = HeaderValue::from_str(&context.to_traceparent())?;
        observation.carrier_mut().insert(TRACEPARENT, header);
        let span = TracingSpan::open(observation, context, None);
        self.spans.begin(observation, span);
        Ok(())
    }

    fn on_stop(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        self.spans.finish(observation)
    }

    fn on_error(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        self.spans.finish(observation)
    }

    fn on_event(&self, observation: &mut Observation, event: &ObservationEvent) -> Result<(), HandlerError> {
        self.spans.event(observation, event)
    }
}

/// Traces inbound requests, joining the caller's trace when one is present.
pub struct ReceiverTracingHandler {
    spans: SpanLifecycle,
}

impl ReceiverTracingHandler {
    pub fn new(reporter: Arc<dyn SpanReporter>) -> Self {
        Self {
            spans: SpanLifecycle { reporter },
        }
    }
}

impl ObservationHandler for ReceiverTracingHandler {
    fn name(&self) -> &str {
        "receiver-tracing"
    }

    fn supports_context(&self, observation: &Observation) -> bool {
        matches!(observation.kind(), ObservationKind::Server | ObservationKind::Consumer)
    }

    fn on_start(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        let remote = observation
            .carrier()
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(TraceContext::from_traceparent);

        let span = match remote {
            Some(parent) => {
                let context = TraceContext::child_of(&parent);
                TracingSpan::open(observation, context, Some(parent.span_id().to_string()))
            }
            None => TracingSpan::open(observation, TraceContext::new_root(), None),
        };
        self.spans.begin(observation, span);
        Ok(())
    }

    fn on_stop(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        self.spans.finish(observation)
    }

    fn on_error(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        self.spans.finish(observation)
    }

    fn on_event(&self, observation: &mut Observation, event: &ObservationEvent) -> Result<(), HandlerError> {
        self.spans.event(observation, event)
    }
}

/// Local span for any observation; the fallback of the tracing group.
pub struct DefaultTracingHandler {
    spans: SpanLifecycle,
}

impl DefaultTracingHandler {
    pub fn new(reporter: Arc<dyn SpanReporter>) -> Self {
        Self {
            spans: SpanLifecycle { reporter },
        }
    }
}

impl ObservationHandler for DefaultTracingHandler {
    fn name(&self) -> &str {
        "default-tracing"
    }

    fn supports_context(&self, _observation: &Observation) -> bool {
        true
    }

    fn on_start(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        let span = TracingSpan::open(observation, TraceContext::new_root(), None);
        self.spans.begin(observation, span);
        Ok(())
    }

    fn on_stop(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        self.spans.finish(observation)
    }

    fn on_error(&self, observation: &mut Observation) -> Result<(), HandlerError> {
        self.spans.finish(observation)
    }

    fn on_event(&self, observation: &mut Observation, event: &ObservationEvent) -> Result<(), HandlerError> {
        self.spans.event(observation, event)
    }
}

impl fmt::Debug for SenderTracingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SenderTracingHandler")
    }
}

impl fmt::Debug for ReceiverTracingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReceiverTracingHandler")
    }
}

impl fmt::Debug for DefaultTracingHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultTracingHandler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{HandlerGroup, ObservationCause, ObservationRegistry};

    fn registry(reporter: &Arc<CollectingSpanReporter>) -> ObservationRegistry {
        let reporter: Arc<dyn SpanReporter> = reporter.clone();
        let mut registry = ObservationRegistry::new();
        registry.register(HandlerGroup::first_matching(vec![
            Arc::new(SenderTracingHandler::new(reporter.clone())),
            Arc::new(ReceiverTracingHandler::new(reporter.clone())),
            Arc::new(DefaultTracingHandler::new(reporter)),
        ]));
        registry
    }

    #[test]
    fn test_traceparent_roundtrip_and_rejects() {
        let ctx = TraceContext::new_root();
        let parsed = TraceContext::from_traceparent(&ctx.to_traceparent()).unwrap();
        assert_eq!(parsed, ctx);

        let valid = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let parsed = TraceContext::from_traceparent(valid).unwrap();
        assert_eq!(parsed.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(parsed.span_id(), "00f067aa0ba902b7");
        assert!(parsed.is_sampled());

        for bad in [
            "",
            "garbage",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
        ] {
            assert!(TraceContext::from_traceparent(bad).is_none(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_sender_injects_traceparent() {
        let reporter = Arc::new(CollectingSpanReporter::new());
        let registry = registry(&reporter);

        let mut handle = registry
            .start(Observation::new("http.client.requests", ObservationKind::Client).with_contextual_name("GET"))
            .unwrap();
        assert_eq!(handle.handler_names(), vec!["sender-tracing"]);
        let header = handle.observation().carrier().get(TRACEPARENT).unwrap().to_str().unwrap().to_string();
        handle.stop().unwrap();

        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].context.to_traceparent(), header);
        assert_eq!(spans[0].name, "GET");
        assert_eq!(spans[0].status, SpanStatus::Ok);
    }

    #[test]
    fn test_receiver_continues_remote_trace() {
        let reporter = Arc::new(CollectingSpanReporter::new());
        let registry = registry(&reporter);
        let remote = TraceContext::new_root();

        let mut carrier = axum::http::HeaderMap::new();
        carrier.insert(TRACEPARENT, HeaderValue::from_str(&remote.to_traceparent()).unwrap());
        let mut handle = registry
            .start(Observation::new("http.server.requests", ObservationKind::Server).with_carrier(carrier))
            .unwrap();
        assert_eq!(handle.handler_names(), vec!["receiver-tracing"]);
        handle.stop().unwrap();

        let span = &reporter.spans()[0];
        assert_eq!(span.context.trace_id(), remote.trace_id());
        assert_ne!(span.context.span_id(), remote.span_id());
        assert_eq!(span.parent_span_id.as_deref(), Some(remote.span_id()));
    }

    #[test]
    fn test_receiver_without_header_starts_new_trace() {
        let reporter = Arc::new(CollectingSpanReporter::new());
        let registry = registry(&reporter);

        let mut handle = registry
            .start(Observation::new("http.server.requests", ObservationKind::Server))
            .unwrap();
        handle.stop().unwrap();
        assert!(reporter.spans()[0].parent_span_id.is_none());
    }

    #[test]
    fn test_error_marks_span() {
        let reporter = Arc::new(CollectingSpanReporter::new());
        let registry = registry(&reporter);

        let mut handle = registry
            .start(Observation::new("job", ObservationKind::Internal).with_high_cardinality("job.id", "42"))
            .unwrap();
        assert_eq!(handle.handler_names(), vec!["default-tracing"]);
        handle.event("checkpoint").unwrap();
        handle.error(ObservationCause::new("Timeout", "took too long")).unwrap();

        let span = &reporter.spans()[0];
        assert_eq!(span.status, SpanStatus::Error("Timeout: took too long".into()));
        assert_eq!(span.tags.get("error"), Some("Timeout"));
        assert_eq!(span.tags.get("job.id"), Some("42"));
        assert_eq!(span.events, vec!["checkpoint".to_string()]);
    }

    #[test]
    fn test_stop_without_start_is_missing_state() {
        let handler = DefaultTracingHandler::new(Arc::new(CollectingSpanReporter::new()));
        let mut obs = Observation::new("job", ObservationKind::Internal);
        let err = handler.on_stop(&mut obs).unwrap_err();
        assert!(matches!(err, HandlerError::MissingState { what: "span", .. }));
    }
}
