//! Process-wide telemetry for the outermost composition boundary.
//!
//! Library code should take a [`Telemetry`] explicitly. These accessors are
//! for binaries and glue code that have nowhere to thread one through; they
//! fall back to no-op components until [`install`] is called.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::observability::logging::{Logger, NoopLogger};
use crate::observability::metrics::{Metrics, NoopMetrics};
use crate::observability::trace::{NoopTracer, Tracer};
use crate::provider::{Provider, Telemetry};

struct Global {
    provider: Option<Arc<Provider>>,
    tracer: Option<Arc<dyn Tracer>>,
}

static GLOBAL: RwLock<Global> = RwLock::new(Global {
    provider: None,
    tracer: None,
});

fn read() -> RwLockReadGuard<'static, Global> {
    GLOBAL.read().unwrap_or_else(PoisonError::into_inner)
}

/// Make `provider` and its tracer the process-wide defaults.
///
/// Replaces whatever was installed before. Readers holding handles from the
/// previous provider keep using them.
pub fn install(provider: &Arc<Provider>) {
    let tracer = provider.tracer();
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    global.provider = Some(provider.clone());
    global.tracer = Some(tracer);
}

/// Override only the global tracer.
pub fn set_tracer(tracer: Arc<dyn Tracer>) {
    GLOBAL
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .tracer = Some(tracer);
}

/// Forget the installed provider and tracer.
///
/// Does not shut the provider down.
pub fn reset() {
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    global.provider = None;
    global.tracer = None;
}

/// The installed provider, if any.
pub fn provider() -> Option<Arc<Provider>> {
    read().provider.clone()
}

pub fn tracer() -> Arc<dyn Tracer> {
    read()
        .tracer
        .clone()
        .unwrap_or_else(|| Arc::new(NoopTracer::new()))
}

pub fn metrics() -> Arc<dyn Metrics> {
    // Provider accessors take their own lock; clone out first.
    match provider() {
        Some(provider) => provider.metrics(),
        None => Arc::new(NoopMetrics::new()),
    }
}

pub fn logger() -> Arc<dyn Logger> {
    match provider() {
        Some(provider) => provider.logger(),
        None => NoopLogger::shared(),
    }
}

/// Global tracer, metrics and logger as one bundle.
///
/// Bundles from the installed provider share its count of runs in flight.
pub fn telemetry() -> Telemetry {
    match provider() {
        Some(provider) => {
            let mut telemetry = provider.telemetry();
            telemetry.tracer = tracer();
            telemetry
        }
        None => Telemetry::new(tracer(), metrics(), logger()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::same_instance;
    use crate::observability::trace::SpanOptions;
    use opentelemetry::Context;
    use std::sync::Mutex;

    // Global state is shared by every test in this binary.
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn test_accessors_fall_back_to_noop() {
        let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        reset();

        assert!(provider().is_none());
        let (_, span) = tracer().start(&Context::new(), "op", SpanOptions::internal());
        assert!(!span.span_context().is_valid());
        metrics().counter("llm.requests").add(&Context::new(), 1, &[]);
        logger().info("dropped");
    }

    #[test]
    fn test_install_and_reset() {
        let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let installed = Arc::new(Provider::disabled());
        install(&installed);

        let current = provider().expect("provider installed");
        assert!(Arc::ptr_eq(&current, &installed));
        assert!(same_instance(&metrics(), &installed.metrics()));
        assert!(same_instance(&tracer(), &installed.tracer()));

        reset();
        assert!(provider().is_none());
    }

    #[test]
    fn test_set_tracer_overrides_provider_tracer() {
        let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let installed = Arc::new(Provider::disabled());
        install(&installed);

        let replacement: Arc<dyn Tracer> = Arc::new(NoopTracer::new());
        set_tracer(replacement.clone());
        assert!(same_instance(&tracer(), &replacement));
        assert!(!same_instance(&tracer(), &installed.tracer()));

        reset();
    }

    #[test]
    fn test_global_bundles_share_run_count() {
        let _serial = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let installed = Arc::new(Provider::disabled());
        install(&installed);

        assert!(Arc::ptr_eq(
            telemetry().run_counter(),
            installed.telemetry().run_counter()
        ));

        reset();
    }
}
