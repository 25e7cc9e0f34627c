use std::sync::Arc;

use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

/// Prometheus metrics for the compile endpoint
#[derive(Clone, Debug)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    compilations: CounterVec,
    failures: CounterVec,
    cache_hits: Counter,
    compile_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let compilations = CounterVec::new(
            Opts::new("docpush_compilations_total", "Plans compiled, by output form"),
            &["form"],
        )?;
        let failures = CounterVec::new(
            Opts::new("docpush_compile_failures_total", "Plans rejected, by error kind"),
            &["kind"],
        )?;
        let cache_hits = Counter::new("docpush_cache_hits_total", "Compiled plans served from cache")?;
        let compile_seconds = Histogram::with_opts(HistogramOpts::new(
            "docpush_compile_seconds",
            "Time spent compiling one plan",
        ))?;

        registry.register(Box::new(compilations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(compile_seconds.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                compilations,
                failures,
                cache_hits,
                compile_seconds,
            }),
        })
    }

    pub fn record_compilation(&self, form: &str, secs: f64) {
        self.inner.compilations.with_label_values(&[form]).inc();
        self.inner.compile_seconds.observe(secs.max(0.0));
    }

    pub fn record_failure(&self, kind: &str) {
        self.inner.failures.with_label_values(&[kind]).inc();
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}
