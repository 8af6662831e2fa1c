// src/health/scheduler.rs
//
// Every tick, probes every backend that's never been seen before plus one
// randomly-chosen already-seen backend, then fans in before the next tick
// starts.
use crate::metrics::MetricsCollector;
use crate::state::{Backend, BackendState, Health, RoutingTable};
use hyper::header::HeaderValue;
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Default tick period: every 1000 ms.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Deserialize, Default)]
struct HealthProbeBody {
    #[serde(default)]
    healthy: bool,
    #[serde(default)]
    version: Option<String>,
}

pub struct HealthScheduler {
    table: Arc<RoutingTable>,
    client: Client,
    period: Duration,
    metrics: Arc<MetricsCollector>,
}

impl HealthScheduler {
    pub fn new(table: Arc<RoutingTable>, period: Duration, metrics: Arc<MetricsCollector>) -> Self {
        let client = Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("failed to build health-check HTTP client");

        Self {
            table,
            client,
            period,
            metrics,
        }
    }

    /// Runs forever. The next tick does not begin until the previous
    /// tick's fan-in completes (`PeriodicCallback` semantics), preventing
    /// unbounded probe accumulation against a slow fleet.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let (unseen, seen) = self.table.partition_for_probing();

        let mut probes = Vec::with_capacity(unseen.len() + 1);
        for backend in unseen {
            probes.push(self.probe(backend));
        }

        if let Some(backend) = seen.choose(&mut rand::thread_rng()) {
            probes.push(self.probe(backend.clone()));
        }

        futures::future::join_all(probes).await;

        let all = self.table.all_backends_sorted();
        let healthy_count = all.iter().filter(|(_, s)| s.is_healthy()).count();
        self.metrics.set_backend_counts(healthy_count, all.len());
    }

    async fn probe(&self, backend: Backend) {
        let old_state = self.table.current_state(&backend);
        let url = backend.url_for("/health");

        let new_state = match self.client.get(&url).send().await {
            Ok(response) if response.status() == StatusCode::OK => match response.json::<HealthProbeBody>().await {
                Ok(HealthProbeBody { healthy: true, version: Some(version) })
                    if !version.is_empty() && is_header_safe(&version) =>
                {
                    BackendState::healthy(version)
                }
                _ => BackendState::unhealthy(),
            },
            _ => BackendState::unhealthy(),
        };

        // the backend may have been deregistered while the probe was in
        // flight; discard the result rather than resurrecting a stale key
        if !self.table.contains(&backend) {
            debug!(%backend, "disappeared while we were checking on it");
            return;
        }

        let was_problem_free = matches!(
            old_state.as_ref().map(|s| s.health),
            Some(Health::Healthy) | Some(Health::Unknown) | None
        );
        let now_unhealthy = new_state.health == Health::Unhealthy;

        if was_problem_free && now_unhealthy {
            warn!(%backend, ?old_state, ?new_state, "backend became unhealthy");
        } else {
            debug!(%backend, ?old_state, ?new_state, "probe complete");
        }

        self.metrics.update_backend_health(&backend.to_string(), new_state.is_healthy());
        self.table.update_backend_state(&backend, new_state);
    }
}

/// A version string is only usable if it can later be carried as-is in
/// `X-Exproxyment-Version`. A version containing a control character (a
/// stray newline from a file read, for example) would make the pipeline's
/// `HeaderValue::from_str` fail downstream, so reject it here instead and
/// fall through to the malformed-body classification.
fn is_header_safe(version: &str) -> bool {
    HeaderValue::from_str(version).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_marks_backend_healthy_on_200_with_valid_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"healthy": true, "version": "3"}"#)
            .create_async()
            .await;

        let host = server.host_with_port();
        let (host, port) = host.split_once(':').unwrap();
        let backend = Backend::new(host, port.parse().unwrap());

        let table = Arc::new(RoutingTable::new());
        table.add_backend(backend.clone());

        let metrics = crate::metrics::MetricsRegistry::new().unwrap().collector();
        let scheduler = HealthScheduler::new(table.clone(), Duration::from_secs(1), metrics);
        scheduler.probe(backend.clone()).await;

        let state = table.current_state(&backend).unwrap();
        assert!(state.is_healthy());
        assert_eq!(state.version.as_deref(), Some("3"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn probe_marks_backend_unhealthy_on_non_200() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(503).create_async().await;

        let host = server.host_with_port();
        let (host, port) = host.split_once(':').unwrap();
        let backend = Backend::new(host, port.parse().unwrap());

        let table = Arc::new(RoutingTable::new());
        table.add_backend(backend.clone());

        let metrics = crate::metrics::MetricsRegistry::new().unwrap().collector();
        let scheduler = HealthScheduler::new(table.clone(), Duration::from_secs(1), metrics);
        scheduler.probe(backend.clone()).await;

        let state = table.current_state(&backend).unwrap();
        assert!(!state.is_healthy());
        assert!(state.version.is_none());
    }

    #[tokio::test]
    async fn probe_marks_unhealthy_when_body_missing_version() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"healthy": true}"#)
            .create_async()
            .await;

        let host = server.host_with_port();
        let (host, port) = host.split_once(':').unwrap();
        let backend = Backend::new(host, port.parse().unwrap());

        let table = Arc::new(RoutingTable::new());
        table.add_backend(backend.clone());

        let metrics = crate::metrics::MetricsRegistry::new().unwrap().collector();
        let scheduler = HealthScheduler::new(table.clone(), Duration::from_secs(1), metrics);
        scheduler.probe(backend.clone()).await;

        let state = table.current_state(&backend).unwrap();
        assert!(!state.is_healthy());
    }

    #[tokio::test]
    async fn probe_marks_unhealthy_when_version_has_control_characters() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"healthy": true, "version": "1.2.3\n"}"#)
            .create_async()
            .await;

        let host = server.host_with_port();
        let (host, port) = host.split_once(':').unwrap();
        let backend = Backend::new(host, port.parse().unwrap());

        let table = Arc::new(RoutingTable::new());
        table.add_backend(backend.clone());

        let metrics = crate::metrics::MetricsRegistry::new().unwrap().collector();
        let scheduler = HealthScheduler::new(table.clone(), Duration::from_secs(1), metrics);
        scheduler.probe(backend.clone()).await;

        let state = table.current_state(&backend).unwrap();
        assert!(!state.is_healthy());
        assert!(state.version.is_none());
    }

    #[test]
    fn header_safe_rejects_control_characters_and_accepts_plain_versions() {
        assert!(is_header_safe("1.2.3"));
        assert!(!is_header_safe("1.2.3\n"));
        assert!(!is_header_safe("1.2.3\r\nX-Injected: true"));
    }

    #[tokio::test]
    async fn probe_result_discarded_if_backend_removed_mid_flight() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"healthy": true, "version": "3"}"#)
            .create_async()
            .await;

        let host = server.host_with_port();
        let (host, port) = host.split_once(':').unwrap();
        let backend = Backend::new(host, port.parse().unwrap());

        let table = Arc::new(RoutingTable::new());
        table.add_backend(backend.clone());
        table.remove_backend(&backend);

        let metrics = crate::metrics::MetricsRegistry::new().unwrap().collector();
        let scheduler = HealthScheduler::new(table.clone(), Duration::from_secs(1), metrics);
        scheduler.probe(backend.clone()).await;

        assert!(table.current_state(&backend).is_none());
    }
}
