//! Telemetry provider: one tracer, one metrics registry and one logger per
//! process (or per test), built from a validated [`Config`].
//!
//! Lifecycle:
//! - `Config::enabled = false`: every component is a no-op, shutdown does nothing
//! - otherwise tracing and metrics are enabled independently; enabled backends
//!   register a teardown callback that [`Provider::shutdown`] runs
//!
//! Building never touches process-wide state until every fallible step has
//! succeeded. Installing the provider globally is a separate step, see
//! [`crate::global`].

use opentelemetry::global;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{self as sdktrace, Tracer as SdkTracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{Config, MetricsConfig, TracingConfig};
use crate::error::{Result, TelemetryError};
use crate::observability::logging::{Logger, NoopLogger, TracingLogger};
use crate::observability::metrics::{Metrics, NoopMetrics, OtelMetrics};
use crate::observability::trace::{sampler_for, NoopTracer, OtelTracer, Tracer};
use crate::observability::tracing::init_subscriber;

/// Instrumentation scope reported with every span and metric.
pub const INSTRUMENTATION_NAME: &str = "agent-telemetry";

/// Teardown step registered by a backend.
pub type ShutdownFn = Box<dyn FnOnce() -> Result<()> + Send + Sync>;

/// Tracer, metrics and logger handles travelling together.
///
/// This is the explicit context object traced wrappers are built from.
/// Cloning only clones the handles; clones also share the count of agent
/// runs in flight, so every `AgentTracer` built from one bundle reports the
/// same `agent.active_runs` series.
#[derive(Clone, Debug)]
pub struct Telemetry {
    pub tracer: Arc<dyn Tracer>,
    pub metrics: Arc<dyn Metrics>,
    pub logger: Arc<dyn Logger>,
    active_runs: Arc<AtomicI64>,
}

impl Telemetry {
    pub fn new(tracer: Arc<dyn Tracer>, metrics: Arc<dyn Metrics>, logger: Arc<dyn Logger>) -> Self {
        Self {
            tracer,
            metrics,
            logger,
            active_runs: Arc::default(),
        }
    }

    /// Agent runs started and not yet finished or dropped.
    pub fn active_runs(&self) -> i64 {
        self.active_runs.load(Ordering::SeqCst)
    }

    pub(crate) fn run_counter(&self) -> &Arc<AtomicI64> {
        &self.active_runs
    }

    /// Handles that record nothing.
    pub fn noop() -> Self {
        Self::new(
            Arc::new(NoopTracer::new()),
            Arc::new(NoopMetrics::new()),
            NoopLogger::shared(),
        )
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::noop()
    }
}

struct Inner {
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn Metrics>,
    logger: Arc<dyn Logger>,
    sdk_tracer: Option<SdkTracer>,
    shutdown: Vec<ShutdownFn>,
    active_runs: Arc<AtomicI64>,
    notes: Vec<Note>,
}

/// Setup outcome worth reporting once a subscriber is listening.
#[derive(Debug, Clone)]
enum Note {
    SpanExporter { endpoint: String, sample_rate: f64 },
    MetricsExporter { endpoint: String, interval_ms: u64 },
    MetricsFallback { error: String },
}

/// Owner of the telemetry backends of a process.
pub struct Provider {
    config: Config,
    inner: RwLock<Inner>,
}

impl Provider {
    /// Build a provider from `config`.
    ///
    /// Zero-valued fields are defaulted first, then the config is validated.
    /// Enabled exporters spawn their workers on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the sample rate is out of range or the span
    /// exporter cannot be built. Nothing needs cleanup in that case.
    pub fn new(config: Config) -> Result<Self> {
        let config = config.with_defaults();
        config.validate()?;

        if !config.enabled {
            return Ok(Self::noop(config));
        }

        let resource = resource(&config);
        let mut shutdown: Vec<ShutdownFn> = Vec::new();
        let mut notes = Vec::new();

        let (tracer, sdk_tracer): (Arc<dyn Tracer>, Option<SdkTracer>) = if config.tracing.enabled {
            let provider = tracer_provider(&config.tracing, resource.clone())?;
            let sdk_tracer = provider.tracer(INSTRUMENTATION_NAME);
            shutdown.push(Box::new(move || {
                provider
                    .shutdown()
                    .map_err(|e| TelemetryError::shutdown("tracer", e))
            }));
            notes.push(Note::SpanExporter {
                endpoint: config.tracing.endpoint.clone(),
                sample_rate: config.tracing.sample_rate,
            });
            (
                Arc::new(OtelTracer::new(sdk_tracer.clone())) as Arc<dyn Tracer>,
                Some(sdk_tracer),
            )
        } else {
            (Arc::new(NoopTracer::new()) as Arc<dyn Tracer>, None)
        };

        let metrics: Arc<dyn Metrics> = if config.metrics.enabled {
            match meter_provider(&config.metrics, resource) {
                Ok(provider) => {
                    let meter = provider.meter(INSTRUMENTATION_NAME);
                    shutdown.push(Box::new(move || {
                        provider
                            .shutdown()
                            .map_err(|e| TelemetryError::shutdown("meter", e))
                    }));
                    notes.push(Note::MetricsExporter {
                        endpoint: config.metrics.endpoint.clone(),
                        interval_ms: config.metrics.interval.as_millis() as u64,
                    });
                    Arc::new(OtelMetrics::new(meter))
                }
                Err(e) => {
                    notes.push(Note::MetricsFallback { error: e.to_string() });
                    Arc::new(NoopMetrics::new())
                }
            }
        } else {
            Arc::new(NoopMetrics::new())
        };

        if sdk_tracer.is_some() {
            global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
                Box::new(TraceContextPropagator::new()),
                Box::new(BaggagePropagator::new()),
            ]));
        }

        let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new(config.logging.include_trace_id));

        Ok(Self {
            config,
            inner: RwLock::new(Inner {
                tracer,
                metrics,
                logger,
                sdk_tracer,
                shutdown,
                active_runs: Arc::default(),
                notes,
            }),
        })
    }

    /// Provider whose components are all no-ops.
    pub fn disabled() -> Self {
        Self::noop(Config::default().with_defaults())
    }

    fn noop(config: Config) -> Self {
        let telemetry = Telemetry::noop();
        Self {
            config,
            inner: RwLock::new(Inner {
                tracer: telemetry.tracer,
                metrics: telemetry.metrics,
                logger: telemetry.logger,
                sdk_tracer: None,
                shutdown: Vec::new(),
                active_runs: Arc::default(),
                notes: Vec::new(),
            }),
        }
    }

    /// Effective (defaulted) configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn tracer(&self) -> Arc<dyn Tracer> {
        self.read().tracer.clone()
    }

    pub fn metrics(&self) -> Arc<dyn Metrics> {
        self.read().metrics.clone()
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        self.read().logger.clone()
    }

    /// All three handles in one bundle.
    ///
    /// Every bundle from one provider shares its count of runs in flight.
    pub fn telemetry(&self) -> Telemetry {
        let inner = self.read();
        Telemetry {
            tracer: inner.tracer.clone(),
            metrics: inner.metrics.clone(),
            logger: inner.logger.clone(),
            active_runs: inner.active_runs.clone(),
        }
    }

    /// The SDK tracer when span export is enabled.
    pub fn sdk_tracer(&self) -> Option<SdkTracer> {
        self.read().sdk_tracer.clone()
    }

    /// Register an extra teardown step, run after the backends' own.
    pub fn on_shutdown<F>(&self, f: F)
    where
        F: FnOnce() -> Result<()> + Send + Sync + 'static,
    {
        self.write().shutdown.push(Box::new(f));
    }

    /// Install the `tracing` subscriber for this provider's logging config,
    /// bridged to the span exporter when tracing is enabled.
    ///
    /// # Errors
    ///
    /// Fails if a global subscriber is already installed.
    pub fn init_subscriber(&self) -> Result<()> {
        init_subscriber(&self.config.logging, self.sdk_tracer())?;
        self.report_setup();
        Ok(())
    }

    /// Log how the backends were set up.
    ///
    /// [`Provider::new`] runs before any subscriber can exist, so this is
    /// deferred to [`Provider::init_subscriber`]. Hosts that install their
    /// own subscriber can call it afterwards.
    pub fn report_setup(&self) {
        let notes = self.read().notes.clone();
        if !self.config.enabled {
            tracing::info!("Telemetry disabled, using no-op backends");
        }
        for note in notes {
            match note {
                Note::SpanExporter {
                    endpoint,
                    sample_rate,
                } => tracing::info!(%endpoint, sample_rate, "OTLP span exporter configured"),
                Note::MetricsExporter {
                    endpoint,
                    interval_ms,
                } => tracing::info!(%endpoint, interval_ms, "OTLP metrics exporter configured"),
                Note::MetricsFallback { error } => tracing::warn!(
                    %error,
                    "Failed to create OTLP metrics exporter, using no-op metrics"
                ),
            }
        }
    }

    /// Run every registered teardown step.
    ///
    /// All steps run even when earlier ones fail; the last failure is
    /// returned. A second call finds nothing left to run.
    ///
    /// Exporter teardown blocks until pending data is flushed, so call this
    /// from a blocking context (e.g. `spawn_blocking`) inside a runtime.
    pub fn shutdown(&self) -> Result<()> {
        let steps = mem::take(&mut self.write().shutdown);
        let mut last_error = None;
        for step in steps {
            if let Err(e) = step() {
                tracing::warn!(error = %e, "Telemetry shutdown step failed");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Provider")
            .field("config", &self.config)
            .field("tracer", &inner.tracer)
            .field("metrics", &inner.metrics)
            .field("pending_shutdown", &inner.shutdown.len())
            .finish()
    }
}

/// Resource describing the emitting service.
fn resource(config: &Config) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}

/// Endpoint with an explicit scheme; `insecure` picks plaintext when none
/// is given.
fn collector_endpoint(endpoint: &str, insecure: bool) -> String {
    if endpoint.contains("://") {
        return endpoint.to_string();
    }
    let scheme = if insecure { "http" } else { "https" };
    format!("{scheme}://{endpoint}")
}

fn tracer_provider(config: &TracingConfig, resource: Resource) -> Result<TracerProvider> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(collector_endpoint(&config.endpoint, config.insecure))
        .with_protocol(Protocol::Grpc)
        .with_timeout(config.timeout);

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(sampler_for(config.sample_rate))
                .with_resource(resource),
        )
        .install_batch(runtime::Tokio)?;
    Ok(provider)
}

fn meter_provider(
    config: &MetricsConfig,
    resource: Resource,
) -> Result<opentelemetry_sdk::metrics::SdkMeterProvider> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(collector_endpoint(&config.endpoint, config.insecure))
        .with_protocol(Protocol::Grpc);

    let provider = opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(exporter)
        .with_period(config.interval)
        .with_resource(resource)
        .build()?;
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::trace::SpanOptions;
    use opentelemetry::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Log output captured by a test subscriber.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<T>(f: impl FnOnce() -> T) -> (T, String) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, captured.text())
    }

    #[test]
    fn test_collector_endpoint_scheme() {
        assert_eq!(
            collector_endpoint("http://collector:4317", false),
            "http://collector:4317"
        );
        assert_eq!(collector_endpoint("collector:4317", true), "http://collector:4317");
        assert_eq!(collector_endpoint("collector:4317", false), "https://collector:4317");
    }

    #[test]
    fn test_resource_attributes() {
        let config = Config {
            service_name: "planner".into(),
            ..Config::default()
        }
        .with_defaults();
        let resource = resource(&config);
        assert_eq!(
            resource.get("service.name".into()).map(|v| v.to_string()),
            Some("planner".to_string())
        );
        assert_eq!(
            resource
                .get("deployment.environment".into())
                .map(|v| v.to_string()),
            Some("development".to_string())
        );
    }

    #[test]
    fn test_disabled_provider_is_noop() {
        let provider = Provider::new(Config::default()).unwrap();
        assert!(!provider.is_enabled());
        assert!(provider.sdk_tracer().is_none());

        let (_, span) = provider
            .tracer()
            .start(&Context::new(), "op", SpanOptions::internal());
        assert!(!span.span_context().is_valid());
        span.end();
        provider.metrics().counter("llm.requests").add(&Context::new(), 1, &[]);
        provider.logger().info("dropped");
        assert!(provider.shutdown().is_ok());
    }

    #[test]
    fn test_invalid_sample_rate_fails_fast() {
        let mut config = Config::development();
        config.tracing.sample_rate = 1.5;
        let err = Provider::new(config).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidSampleRate(r) if r == 1.5));
    }

    #[test]
    fn test_shutdown_runs_every_step_and_keeps_last_error() {
        let provider = Provider::disabled();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        provider.on_shutdown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TelemetryError::shutdown("first", "boom"))
        });
        let counter = ran.clone();
        provider.on_shutdown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TelemetryError::shutdown("second", "bang"))
        });
        let counter = ran.clone();
        provider.on_shutdown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = provider.shutdown().unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(matches!(err, TelemetryError::Shutdown { backend: "second", .. }));

        // Nothing left to run
        assert!(provider.shutdown().is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_telemetry_bundle_shares_handles() {
        let provider = Provider::disabled();
        let telemetry = provider.telemetry();
        assert!(crate::observability::metrics::same_instance(
            &telemetry.metrics,
            &provider.metrics()
        ));
    }

    #[test]
    fn test_disabled_setup_reported_on_demand() {
        let (provider, during_new) = capture(|| Provider::new(Config::default()).unwrap());
        assert!(during_new.is_empty());

        let ((), report) = capture(|| provider.report_setup());
        assert!(report.contains("Telemetry disabled"), "{report}");
        assert!(!report.contains("exporter configured"), "{report}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exporter_setup_logged_after_construction() {
        let config = Config {
            enabled: true,
            tracing: TracingConfig {
                enabled: true,
                endpoint: "http://127.0.0.1:1".into(),
                insecure: true,
                sample_rate: 0.0,
                timeout: Duration::from_secs(1),
            },
            ..Config::default()
        };

        let (provider, during_new) = capture(|| Provider::new(config).unwrap());
        assert!(during_new.is_empty(), "{during_new}");

        let ((), report) = capture(|| provider.report_setup());
        assert!(report.contains("OTLP span exporter configured"), "{report}");
        assert!(report.contains("127.0.0.1:1"), "{report}");
        assert!(!report.contains("metrics exporter"), "{report}");

        let provider = Arc::new(provider);
        let _ = tokio::task::spawn_blocking(move || provider.shutdown()).await;
    }
}
