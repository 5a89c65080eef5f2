//! Shutdown-time metrics snapshot.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::observability::meter::{Meter, MeterError, MeterRegistry};

pub const HEADER: &str = "==== METRICS ====";
pub const FOOTER: &str = "=================";

/// Prints every meter once, at teardown.
pub struct MetricsDumper {
    registry: Arc<MeterRegistry>,
    fired: AtomicBool,
}

impl MetricsDumper {
    pub fn new(registry: Arc<MeterRegistry>) -> Self {
        Self {
            registry,
            fired: AtomicBool::new(false),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Write the snapshot to `out` and return how many meter lines made it.
    ///
    /// Only the first call writes anything. A meter that cannot be measured,
    /// or a failed write, is logged and skipped.
    pub fn dump<W: Write>(&self, out: &mut W) -> usize {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("Metrics already dumped, ignoring");
            return 0;
        }

        if let Err(e) = writeln!(out, "{}", HEADER) {
            tracing::warn!(error = %e, "Failed to write metrics header");
        }

        let mut written = 0;
        for meter in self.registry.meters() {
            let line = match format_meter(&meter) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(meter = %meter.id().name(), error = %e, "Skipping meter in dump");
                    continue;
                }
            };
            match writeln!(out, "{}", line) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(meter = %meter.id().name(), error = %e, "Failed to write meter"),
            }
        }

        if let Err(e) = writeln!(out, "{}", FOOTER).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "Failed to write metrics footer");
        }

        tracing::info!(meters = written, "Metrics dumped");
        written
    }

    pub fn dump_to_stdout(&self) -> usize {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        self.dump(&mut lock)
    }
}

/// `- Metric type [TYPE], name [name], tags [tag(k=v)], measurements [...]`
pub fn format_meter(meter: &Meter) -> Result<String, MeterError> {
    let measurements = meter.measure()?;
    let values: Vec<String> = measurements.iter().map(ToString::to_string).collect();
    let id = meter.id();
    Ok(format!(
        "- Metric type [{}], name [{}], tags {}, measurements [{}]",
        id.meter_type(),
        id.name(),
        id.tags(),
        values.join(", ")
    ))
}
