//! In-process meter registry.
//!
//! # Layout
//! - `meters`: append-only slot vector; dump order is slot order
//! - `index`: concurrent identity → slot map
//!
//! Registration goes through the DashMap entry lock for the identity, so two
//! tasks racing to create the same meter end up sharing one slot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::observation::KeyValues;

/// Meter tags share the observation key value representation.
pub type Tags = KeyValues;

#[derive(Debug, Error)]
pub enum MeterError {
    /// The identity is already registered as another meter type.
    #[error("meter `{name}` is registered as {actual}, not {expected}")]
    TypeConflict {
        name: String,
        expected: MeterType,
        actual: MeterType,
    },

    /// The gauge's source is gone or could not be sampled.
    #[error("measurement of `{name}` is unavailable")]
    Unavailable { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeterType {
    Counter,
    Timer,
    LongTaskTimer,
    Gauge,
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeterType::Counter => "COUNTER",
            MeterType::Timer => "TIMER",
            MeterType::LongTaskTimer => "LONG_TASK_TIMER",
            MeterType::Gauge => "GAUGE",
        };
        f.write_str(s)
    }
}

/// Meter identity: name, sorted tags and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeterId {
    name: String,
    tags: Tags,
    meter_type: MeterType,
}

impl MeterId {
    pub fn new(name: impl Into<String>, tags: Tags, meter_type: MeterType) -> Self {
        Self {
            name: name.into(),
            tags,
            meter_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn meter_type(&self) -> MeterType {
        self.meter_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Count,
    TotalTime,
    Max,
    ActiveTasks,
    Duration,
    Value,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Statistic::Count => "COUNT",
            Statistic::TotalTime => "TOTAL_TIME",
            Statistic::Max => "MAX",
            Statistic::ActiveTasks => "ACTIVE_TASKS",
            Statistic::Duration => "DURATION",
            Statistic::Value => "VALUE",
        };
        f.write_str(s)
    }
}

/// One sampled value. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub statistic: Statistic,
    pub value: f64,
}

impl Measurement {
    pub fn new(statistic: Statistic, value: f64) -> Self {
        Self { statistic, value }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Measurement{{statistic='{}', value={:?}}}", self.statistic, self.value)
    }
}

/// Monotonic count.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Count, total and max of recorded durations.
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl Timer {
    pub fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }
}

/// Tracks tasks that are still running.
#[derive(Debug, Default)]
pub struct LongTaskTimer {
    next_task: AtomicU64,
    active: DashMap<u64, Instant>,
}

impl LongTaskTimer {
    /// Begin a task; returns its id for [`stop`](Self::stop).
    pub fn start(&self) -> u64 {
        let task = self.next_task.fetch_add(1, Ordering::Relaxed);
        self.active.insert(task, Instant::now());
        task
    }

    /// End a task, returning how long it ran.
    pub fn stop(&self, task: u64) -> Option<Duration> {
        self.active.remove(&task).map(|(_, started)| started.elapsed())
    }

    pub fn active_tasks(&self) -> usize {
        self.active.len()
    }

    /// Summed run time of the tasks still active.
    pub fn duration(&self) -> Duration {
        self.active.iter().map(|entry| entry.value().elapsed()).sum()
    }
}

type GaugeFn = Box<dyn Fn() -> Option<f64> + Send + Sync>;

/// Samples a value on demand.
pub struct Gauge {
    sample: GaugeFn,
}

impl Gauge {
    pub fn new<F>(sample: F) -> Self
    where
        F: Fn() -> Option<f64> + Send + Sync + 'static,
    {
        Self {
            sample: Box::new(sample),
        }
    }

    /// `None` when the source is gone.
    pub fn value(&self) -> Option<f64> {
        (self.sample)()
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum MeterValue {
    Counter(Arc<Counter>),
    Timer(Arc<Timer>),
    LongTaskTimer(Arc<LongTaskTimer>),
    Gauge(Arc<Gauge>),
}

impl MeterValue {
    fn meter_type(&self) -> MeterType {
        match self {
            MeterValue::Counter(_) => MeterType::Counter,
            MeterValue::Timer(_) => MeterType::Timer,
            MeterValue::LongTaskTimer(_) => MeterType::LongTaskTimer,
            MeterValue::Gauge(_) => MeterType::Gauge,
        }
    }
}

/// A registered meter.
#[derive(Debug)]
pub struct Meter {
    id: MeterId,
    value: MeterValue,
}

impl Meter {
    pub fn id(&self) -> &MeterId {
        &self.id
    }

    /// Current measurements, in a fixed per-type order.
    pub fn measure(&self) -> Result<Vec<Measurement>, MeterError> {
        let measurements = match &self.value {
            MeterValue::Counter(c) => vec![Measurement::new(Statistic::Count, c.count() as f64)],
            MeterValue::Timer(t) => vec![
                Measurement::new(Statistic::Count, t.count() as f64),
                Measurement::new(Statistic::TotalTime, t.total_time().as_secs_f64()),
                Measurement::new(Statistic::Max, t.max().as_secs_f64()),
            ],
            MeterValue::LongTaskTimer(t) => vec![
                Measurement::new(Statistic::ActiveTasks, t.active_tasks() as f64),
                Measurement::new(Statistic::Duration, t.duration().as_secs_f64()),
            ],
            MeterValue::Gauge(g) => {
                let value = g.value().ok_or_else(|| MeterError::Unavailable {
                    name: self.id.name.clone(),
                })?;
                vec![Measurement::new(Statistic::Value, value)]
            }
        };
        Ok(measurements)
    }
}

/// Registry of every meter created in this process.
#[derive(Debug, Default)]
pub struct MeterRegistry {
    index: DashMap<MeterId, usize>,
    meters: RwLock<Vec<Arc<Meter>>>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: impl Into<String>, tags: Tags) -> Result<Arc<Counter>, MeterError> {
        let meter = self.get_or_register(MeterId::new(name, tags, MeterType::Counter), || {
            MeterValue::Counter(Arc::default())
        });
        match &meter.value {
            MeterValue::Counter(c) => Ok(Arc::clone(c)),
            other => Err(type_conflict(&meter.id, MeterType::Counter, other)),
        }
    }

    pub fn timer(&self, name: impl Into<String>, tags: Tags) -> Result<Arc<Timer>, MeterError> {
        let meter = self.get_or_register(MeterId::new(name, tags, MeterType::Timer), || {
            MeterValue::Timer(Arc::default())
        });
        match &meter.value {
            MeterValue::Timer(t) => Ok(Arc::clone(t)),
            other => Err(type_conflict(&meter.id, MeterType::Timer, other)),
        }
    }

    pub fn long_task_timer(
        &self,
        name: impl Into<String>,
        tags: Tags,
    ) -> Result<Arc<LongTaskTimer>, MeterError> {
        let meter = self.get_or_register(MeterId::new(name, tags, MeterType::LongTaskTimer), || {
            MeterValue::LongTaskTimer(Arc::default())
        });
        match &meter.value {
            MeterValue::LongTaskTimer(t) => Ok(Arc::clone(t)),
            other => Err(type_conflict(&meter.id, MeterType::LongTaskTimer, other)),
        }
    }

    /// Register a gauge. If the identity exists, the existing gauge is kept
    /// and `sample` is dropped.
    pub fn gauge<F>(&self, name: impl Into<String>, tags: Tags, sample: F) -> Result<Arc<Gauge>, MeterError>
    where
        F: Fn() -> Option<f64> + Send + Sync + 'static,
    {
        let meter = self.get_or_register(MeterId::new(name, tags, MeterType::Gauge), || {
            MeterValue::Gauge(Arc::new(Gauge::new(sample)))
        });
        match &meter.value {
            MeterValue::Gauge(g) => Ok(Arc::clone(g)),
            other => Err(type_conflict(&meter.id, MeterType::Gauge, other)),
        }
    }

    /// Gauge over a weakly held object; unavailable once it is dropped.
    pub fn gauge_weak<T, F>(
        &self,
        name: impl Into<String>,
        tags: Tags,
        source: &Arc<T>,
        f: F,
    ) -> Result<Arc<Gauge>, MeterError>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(source);
        self.gauge(name, tags, move || weak.upgrade().map(|s| f(&s)))
    }

    pub fn get(&self, id: &MeterId) -> Option<Arc<Meter>> {
        let slot = self.index.get(id).map(|slot| *slot)?;
        self.read_meters().get(slot).cloned()
    }

    /// Snapshot of every meter in registration order.
    pub fn meters(&self) -> Vec<Arc<Meter>> {
        self.read_meters().clone()
    }

    pub fn len(&self) -> usize {
        self.read_meters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_or_register(&self, id: MeterId, make: impl FnOnce() -> MeterValue) -> Arc<Meter> {
        if let Some(existing) = self.get(&id) {
            return existing;
        }

        // The entry guard is held until the new slot is published, so a
        // concurrent caller for the same identity waits and then sees it.
        match self.index.entry(id) {
            Entry::Occupied(entry) => {
                let slot = *entry.get();
                drop(entry);
                Arc::clone(&self.read_meters()[slot])
            }
            Entry::Vacant(entry) => {
                let meter = Arc::new(Meter {
                    id: entry.key().clone(),
                    value: make(),
                });
                let mut meters = self.meters.write().unwrap_or_else(PoisonError::into_inner);
                let slot = meters.len();
                meters.push(Arc::clone(&meter));
                drop(meters);
                entry.insert(slot);
                tracing::debug!(
                    name = %meter.id.name,
                    tags = %meter.id.tags,
                    meter_type = %meter.id.meter_type,
                    "Registered meter"
                );
                meter
            }
        }
    }

    fn read_meters(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Meter>>> {
        self.meters.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn type_conflict(id: &MeterId, expected: MeterType, actual: &MeterValue) -> MeterError {
    MeterError::TypeConflict {
        name: id.name.clone(),
        expected,
        actual: actual.meter_type(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_same_identity_returns_same_meter() {
        let registry = MeterRegistry::new();
        let a = registry.counter("requests", tags(&[("method", "GET")])).unwrap();
        let b = registry.counter("requests", tags(&[("method", "GET")])).unwrap();
        a.increment();
        b.increment();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.count(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identity_includes_tags_and_type() {
        let registry = MeterRegistry::new();
        registry.counter("requests", tags(&[("method", "GET")])).unwrap();
        registry.counter("requests", tags(&[("method", "POST")])).unwrap();
        registry.timer("requests", tags(&[("method", "GET")])).unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_concurrent_creation_converges() {
        let registry = Arc::new(MeterRegistry::new());
        let threads = 16;
        let per_thread = 100;

        thread::scope(|scope| {
            for _ in 0..threads {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    for _ in 0..per_thread {
                        registry
                            .timer("http.server.requests", tags(&[("uri", "/foo")]))
                            .unwrap()
                            .record(Duration::from_millis(1));
                    }
                });
            }
        });

        assert_eq!(registry.len(), 1);
        let timer = registry.timer("http.server.requests", tags(&[("uri", "/foo")])).unwrap();
        assert_eq!(timer.count(), (threads * per_thread) as u64);
    }

    #[test]
    fn test_timer_statistics() {
        let timer = Timer::default();
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.total_time(), Duration::from_millis(40));
        assert_eq!(timer.max(), Duration::from_millis(30));
    }

    #[test]
    fn test_long_task_timer_tracks_active() {
        let ltt = LongTaskTimer::default();
        let a = ltt.start();
        let b = ltt.start();
        assert_eq!(ltt.active_tasks(), 2);

        assert!(ltt.stop(a).is_some());
        assert!(ltt.stop(a).is_none());
        assert_eq!(ltt.active_tasks(), 1);
        ltt.stop(b);
        assert_eq!(ltt.active_tasks(), 0);
        assert_eq!(ltt.duration(), Duration::ZERO);
    }

    #[test]
    fn test_weak_gauge_becomes_unavailable() {
        let registry = MeterRegistry::new();
        let source = Arc::new(AtomicU64::new(7));
        registry
            .gauge_weak("queue.size", Tags::new(), &source, |s| s.load(Ordering::Relaxed) as f64)
            .unwrap();

        let meter = registry.meters().remove(0);
        assert_eq!(meter.measure().unwrap(), vec![Measurement::new(Statistic::Value, 7.0)]);

        drop(source);
        assert!(matches!(meter.measure(), Err(MeterError::Unavailable { .. })));
    }

    #[test]
    fn test_measurement_display() {
        let m = Measurement::new(Statistic::Count, 1.0);
        assert_eq!(m.to_string(), "Measurement{statistic='COUNT', value=1.0}");
    }
}
