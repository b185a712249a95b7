//! Metrics abstraction over OpenTelemetry instruments.
//!
//! Instruments are looked up by name and created lazily:
//! - [`OtelMetrics`]: instruments from an OpenTelemetry `Meter`
//! - [`NoopMetrics`]: shared do-nothing instruments, no allocation per call
//! - [`InMemoryMetrics`](super::memory::InMemoryMetrics): aggregates kept for tests
//!
//! Names found in the metric catalog get its unit and description.

use opentelemetry::metrics::{
    Counter as OtelCounterInstrument, Gauge as OtelGaugeInstrument,
    Histogram as OtelHistogramInstrument, Meter,
};
use opentelemetry::{Context, KeyValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::catalog::instruments;

/// Running sum of integer deltas.
pub trait Counter: Send + Sync + fmt::Debug {
    fn add(&self, cx: &Context, delta: i64, attributes: &[KeyValue]);
}

/// Distribution of observed values.
pub trait Histogram: Send + Sync + fmt::Debug {
    fn record(&self, cx: &Context, value: f64, attributes: &[KeyValue]);
}

/// Last observed value.
pub trait Gauge: Send + Sync + fmt::Debug {
    fn set(&self, cx: &Context, value: f64, attributes: &[KeyValue]);
}

/// Instrument registry.
///
/// Repeated calls with the same name return the same instrument. Counters,
/// histograms and gauges live in separate namespaces.
pub trait Metrics: Send + Sync + fmt::Debug {
    fn counter(&self, name: &str) -> Arc<dyn Counter>;

    fn histogram(&self, name: &str) -> Arc<dyn Histogram>;

    fn gauge(&self, name: &str) -> Arc<dyn Gauge>;
}

/// Name-keyed cache of instruments of one kind.
///
/// Reads take the shared lock. Creation re-checks under the exclusive lock
/// so concurrent first use of a name yields a single instrument.
pub(crate) struct InstrumentCache<T: ?Sized> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> InstrumentCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub(crate) fn get_or_create(&self, name: &str, create: impl FnOnce() -> Arc<T>) -> Arc<T> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(name) {
            return existing.clone();
        }
        let created = create();
        entries.insert(name.to_string(), created.clone());
        created
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl<T: ?Sized> Default for InstrumentCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for InstrumentCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Metrics backed by an OpenTelemetry meter.
pub struct OtelMetrics {
    meter: Meter,
    counters: InstrumentCache<dyn Counter>,
    histograms: InstrumentCache<dyn Histogram>,
    gauges: InstrumentCache<dyn Gauge>,
}

impl OtelMetrics {
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            counters: InstrumentCache::new(),
            histograms: InstrumentCache::new(),
            gauges: InstrumentCache::new(),
        }
    }
}

impl fmt::Debug for OtelMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelMetrics")
            .field("counters", &self.counters)
            .field("histograms", &self.histograms)
            .field("gauges", &self.gauges)
            .finish()
    }
}

impl Metrics for OtelMetrics {
    fn counter(&self, name: &str) -> Arc<dyn Counter> {
        self.counters.get_or_create(name, || {
            let mut builder = self.meter.u64_counter(name.to_string());
            if let Some(def) = instruments::lookup(name) {
                builder = builder
                    .with_description(def.description)
                    .with_unit(def.unit.as_str());
            }
            Arc::new(OtelCounter {
                name: name.to_string(),
                inner: builder.init(),
            }) as Arc<dyn Counter>
        })
    }

    fn histogram(&self, name: &str) -> Arc<dyn Histogram> {
        self.histograms.get_or_create(name, || {
            let mut builder = self.meter.f64_histogram(name.to_string());
            if let Some(def) = instruments::lookup(name) {
                builder = builder
                    .with_description(def.description)
                    .with_unit(def.unit.as_str());
            }
            Arc::new(OtelHistogram {
                inner: builder.init(),
            }) as Arc<dyn Histogram>
        })
    }

    fn gauge(&self, name: &str) -> Arc<dyn Gauge> {
        self.gauges.get_or_create(name, || {
            let mut builder = self.meter.f64_gauge(name.to_string());
            if let Some(def) = instruments::lookup(name) {
                builder = builder
                    .with_description(def.description)
                    .with_unit(def.unit.as_str());
            }
            Arc::new(OtelGauge {
                inner: builder.init(),
            }) as Arc<dyn Gauge>
        })
    }
}

#[derive(Debug)]
struct OtelCounter {
    name: String,
    inner: OtelCounterInstrument<u64>,
}

impl Counter for OtelCounter {
    fn add(&self, _cx: &Context, delta: i64, attributes: &[KeyValue]) {
        match u64::try_from(delta) {
            Ok(delta) => self.inner.add(delta, attributes),
            // OTel counters are monotonic
            Err(_) => tracing::warn!(
                instrument = %self.name,
                delta,
                "Dropping negative delta on monotonic counter"
            ),
        }
    }
}

#[derive(Debug)]
struct OtelHistogram {
    inner: OtelHistogramInstrument<f64>,
}

impl Histogram for OtelHistogram {
    fn record(&self, _cx: &Context, value: f64, attributes: &[KeyValue]) {
        self.inner.record(value, attributes);
    }
}

#[derive(Debug)]
struct OtelGauge {
    inner: OtelGaugeInstrument<f64>,
}

impl Gauge for OtelGauge {
    fn set(&self, _cx: &Context, value: f64, attributes: &[KeyValue]) {
        self.inner.record(value, attributes);
    }
}

/// Metrics that discard every recording.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

/// Instrument that discards every recording.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrument;

impl Counter for NoopInstrument {
    fn add(&self, _cx: &Context, _delta: i64, _attributes: &[KeyValue]) {}
}

impl Histogram for NoopInstrument {
    fn record(&self, _cx: &Context, _value: f64, _attributes: &[KeyValue]) {}
}

impl Gauge for NoopInstrument {
    fn set(&self, _cx: &Context, _value: f64, _attributes: &[KeyValue]) {}
}

impl NoopMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl Metrics for NoopMetrics {
    fn counter(&self, _name: &str) -> Arc<dyn Counter> {
        static NOOP: OnceLock<Arc<dyn Counter>> = OnceLock::new();
        NOOP.get_or_init(|| Arc::new(NoopInstrument) as Arc<dyn Counter>).clone()
    }

    fn histogram(&self, _name: &str) -> Arc<dyn Histogram> {
        static NOOP: OnceLock<Arc<dyn Histogram>> = OnceLock::new();
        NOOP.get_or_init(|| Arc::new(NoopInstrument) as Arc<dyn Histogram>).clone()
    }

    fn gauge(&self, _name: &str) -> Arc<dyn Gauge> {
        static NOOP: OnceLock<Arc<dyn Gauge>> = OnceLock::new();
        NOOP.get_or_init(|| Arc::new(NoopInstrument) as Arc<dyn Gauge>).clone()
    }
}

/// True when two handles point at the same instrument.
pub fn same_instance<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
