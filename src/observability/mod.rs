//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! ObservationRegistry dispatches to:
//!     → metrics.rs (MeterHandler → meter.rs registry, `metrics` facade)
//!     → tracing.rs (sender / receiver / default span handlers → SpanReporter)
//!
//! Teardown:
//!     → dump.rs (MetricsDumper prints every meter once)
//!
//! Process-wide:
//!     → logging.rs (tracing-subscriber setup)
//! ```
//!
//! # Design Decisions
//! - Meter identities are unique; creation is insert-or-get
//! - Trace context crosses processes as W3C `traceparent`
//! - Nothing here exports over the network

pub mod dump;
pub mod logging;
pub mod meter;
pub mod metrics;
pub mod tracing;

pub use self::dump::MetricsDumper;
pub use self::meter::{Meter, MeterError, MeterId, MeterRegistry, MeterType};
pub use self::metrics::MeterHandler;
pub use self::tracing::{
    CollectingSpanReporter, DefaultTracingHandler, LoggingSpanReporter, ReceiverTracingHandler,
    SenderTracingHandler, SpanReporter, TraceContext, TracingSpan,
};
