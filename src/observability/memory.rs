//! In-memory metrics backend.
//!
//! Keeps every recording so tests can assert on aggregates and on the
//! attributes a single recording carried.

use opentelemetry::{Context, KeyValue};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use super::metrics::{Counter, Gauge, Histogram, InstrumentCache, Metrics};

/// One call to an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording<T> {
    pub value: T,
    pub attributes: Vec<KeyValue>,
}

impl<T> Recording<T> {
    /// True when the recording carried `attribute` (key and value).
    pub fn has(&self, attribute: &KeyValue) -> bool {
        self.attributes.iter().any(|kv| kv == attribute)
    }
}

/// Counter keeping its total and each delta.
#[derive(Debug, Default)]
pub struct InMemoryCounter {
    total: AtomicI64,
    recordings: Mutex<Vec<Recording<i64>>>,
}

impl InMemoryCounter {
    /// Sum of every delta, negative ones included.
    pub fn value(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Sum of the deltas recorded with `attribute`.
    pub fn value_with(&self, attribute: &KeyValue) -> i64 {
        self.recordings()
            .iter()
            .filter(|r| r.has(attribute))
            .map(|r| r.value)
            .sum()
    }

    /// Number of `add` calls.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn recordings(&self) -> Vec<Recording<i64>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Recording<i64>>> {
        self.recordings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Counter for InMemoryCounter {
    fn add(&self, _cx: &Context, delta: i64, attributes: &[KeyValue]) {
        let mut recordings = self.lock();
        self.total.fetch_add(delta, Ordering::SeqCst);
        recordings.push(Recording {
            value: delta,
            attributes: attributes.to_vec(),
        });
    }
}

/// Histogram keeping every observation.
#[derive(Debug, Default)]
pub struct InMemoryHistogram {
    observations: Mutex<Vec<Recording<f64>>>,
}

impl InMemoryHistogram {
    /// Observed values in recording order.
    pub fn values(&self) -> Vec<f64> {
        self.observations().into_iter().map(|r| r.value).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn observations(&self) -> Vec<Recording<f64>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Recording<f64>>> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Histogram for InMemoryHistogram {
    fn record(&self, _cx: &Context, value: f64, attributes: &[KeyValue]) {
        self.lock().push(Recording {
            value,
            attributes: attributes.to_vec(),
        });
    }
}

/// Latest gauge value with the time it was set.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeValue {
    pub value: f64,
    pub attributes: Vec<KeyValue>,
    pub at: SystemTime,
}

/// Gauge keeping the last write.
#[derive(Debug, Default)]
pub struct InMemoryGauge {
    last: Mutex<Option<GaugeValue>>,
}

impl InMemoryGauge {
    pub fn value(&self) -> Option<f64> {
        self.last().map(|g| g.value)
    }

    pub fn last(&self) -> Option<GaugeValue> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Gauge for InMemoryGauge {
    fn set(&self, _cx: &Context, value: f64, attributes: &[KeyValue]) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(GaugeValue {
            value,
            attributes: attributes.to_vec(),
            at: SystemTime::now(),
        });
    }
}

/// Metrics backend that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: InstrumentCache<InMemoryCounter>,
    histograms: InstrumentCache<InMemoryHistogram>,
    gauges: InstrumentCache<InMemoryGauge>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete counter for inspection; `None` if never referenced.
    pub fn find_counter(&self, name: &str) -> Option<Arc<InMemoryCounter>> {
        self.counters.get(name)
    }

    pub fn find_histogram(&self, name: &str) -> Option<Arc<InMemoryHistogram>> {
        self.histograms.get(name)
    }

    pub fn find_gauge(&self, name: &str) -> Option<Arc<InMemoryGauge>> {
        self.gauges.get(name)
    }

    /// Counter total, zero if the counter was never referenced.
    pub fn counter_value(&self, name: &str) -> i64 {
        self.find_counter(name).map_or(0, |c| c.value())
    }

    /// Counter total restricted to recordings carrying `attribute`.
    pub fn counter_value_with(&self, name: &str, attribute: &KeyValue) -> i64 {
        self.find_counter(name)
            .map_or(0, |c| c.value_with(attribute))
    }

    /// Number of `add` calls on a counter.
    pub fn counter_calls(&self, name: &str) -> usize {
        self.find_counter(name).map_or(0, |c| c.count())
    }

    /// Histogram observations, empty if never referenced.
    pub fn histogram_values(&self, name: &str) -> Vec<f64> {
        self.find_histogram(name)
            .map(|h| h.values())
            .unwrap_or_default()
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.find_gauge(name).and_then(|g| g.value())
    }

    /// Names of every counter referenced so far, sorted.
    pub fn counter_names(&self) -> Vec<String> {
        self.counters.names()
    }
}

impl Metrics for InMemoryMetrics {
    fn counter(&self, name: &str) -> Arc<dyn Counter> {
        self.counters
            .get_or_create(name, || Arc::new(InMemoryCounter::default()))
    }

    fn histogram(&self, name: &str) -> Arc<dyn Histogram> {
        self.histograms
            .get_or_create(name, || Arc::new(InMemoryHistogram::default()))
    }

    fn gauge(&self, name: &str) -> Arc<dyn Gauge> {
        self.gauges
            .get_or_create(name, || Arc::new(InMemoryGauge::default()))
    }
}
