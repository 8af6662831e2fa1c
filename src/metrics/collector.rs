// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self { registry, collector })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("prometheus text encoding never fails for valid metric families");
        buffer
    }
}

pub struct MetricsCollector {
    pub proxy_outcomes_total: IntCounterVec,
    pub backend_requests_total: IntCounterVec,
    pub backend_request_duration_seconds: HistogramVec,
    pub backend_health_status: IntGaugeVec,
    pub active_requests: IntGauge,
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let proxy_outcomes_total = IntCounterVec::new(
            Opts::new(
                "exproxyment_proxy_outcomes_total",
                "Outcomes of proxied requests (ok, retry, no_backends, ...)",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(proxy_outcomes_total.clone()))?;

        let backend_requests_total = IntCounterVec::new(
            Opts::new(
                "exproxyment_backend_requests_total",
                "Requests forwarded to a backend",
            ),
            &["backend", "status"],
        )?;
        registry.register(Box::new(backend_requests_total.clone()))?;

        let backend_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "exproxyment_backend_request_duration_seconds",
                "Time spent waiting on a backend response",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_request_duration_seconds.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "exproxyment_backend_health_status",
                "Last-observed backend health (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let active_requests = IntGauge::new(
            "exproxyment_active_requests",
            "Requests currently being proxied",
        )?;
        registry.register(Box::new(active_requests.clone()))?;

        let healthy_backends =
            IntGauge::new("exproxyment_healthy_backends", "Number of healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends = IntGauge::new(
            "exproxyment_total_backends",
            "Total number of registered backends",
        )?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            proxy_outcomes_total,
            backend_requests_total,
            backend_request_duration_seconds,
            backend_health_status,
            active_requests,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.proxy_outcomes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_backend_request(&self, backend: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "failure" };
        self.backend_requests_total.with_label_values(&[backend, status]).inc();
        self.backend_request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        self.backend_health_status
            .with_label_values(&[backend])
            .set(if healthy { 1 } else { 0 });
    }

    pub fn set_active_requests(&self, count: i64) {
        self.active_requests.set(count);
    }

    pub fn set_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_metric_families() {
        let registry = MetricsRegistry::new().unwrap();
        registry.collector().record_outcome("ok");
        registry
            .collector()
            .record_backend_request("h1:9001", true, Duration::from_millis(5));
        let text = String::from_utf8(registry.gather()).unwrap();
        assert!(text.contains("exproxyment_proxy_outcomes_total"));
        assert!(text.contains("exproxyment_backend_requests_total"));
    }
}
