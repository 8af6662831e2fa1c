// src/admin/mod.rs
//
// The control-plane surface: backend health, live reconfiguration,
// self-registration, and in-flight request introspection.
use crate::proxy::BufferedRequest;
use crate::state::{Backend, BackendState, Health, RoutingTable};
use hyper::{Body, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
struct BackendRef {
    host: String,
    port: u16,
}

impl From<BackendRef> for Backend {
    fn from(value: BackendRef) -> Self {
        Backend::new(value.host, value.port)
    }
}

#[derive(Serialize)]
struct BackendEntry {
    host: String,
    port: u16,
    healthy: Option<bool>,
    version: Option<String>,
}

impl BackendEntry {
    fn from_state(backend: &Backend, state: &BackendState) -> Self {
        Self {
            host: backend.host.clone(),
            port: backend.port,
            healthy: match state.health {
                Health::Unknown => None,
                Health::Healthy => Some(true),
                Health::Unhealthy => Some(false),
            },
            version: state.version.clone(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    versions: Vec<String>,
    weights: HashMap<String, u64>,
    backends: Vec<BackendEntry>,
}

#[derive(Serialize)]
struct ConfigureResponse {
    backends: Vec<BackendEntry>,
    weights: HashMap<String, u64>,
}

#[derive(Deserialize)]
struct ConfigureBody {
    #[serde(default)]
    backends: Option<serde_json::Value>,
    #[serde(default)]
    weights: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct BackendListBody {
    backends: Vec<BackendRef>,
}

#[derive(Serialize)]
struct StatusOk {
    status: &'static str,
}

#[derive(Serialize)]
struct ActivityResponse {
    activity: Vec<crate::state::ActiveRequest>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn json_response(status: StatusCode, body: &impl Serialize) -> Response<Body> {
    let bytes = serde_json::to_vec(body).expect("admin response bodies always serialize");
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(Body::from(bytes))
        .expect("status/body are always valid")
}

fn bad_format(field: &str) -> Response<Body> {
    json_response(
        StatusCode::BAD_REQUEST,
        &ErrorBody {
            error: format!("bad format: {field}"),
        },
    )
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .expect("status/body are always valid")
}

fn configure_response(table: &RoutingTable) -> ConfigureResponse {
    let backends = table
        .all_backends_sorted()
        .iter()
        .map(|(b, s)| BackendEntry::from_state(b, s))
        .collect();
    ConfigureResponse {
        backends,
        weights: table.weights(),
    }
}

/// The daemon is healthy if at least one backend is healthy (optionally
/// restricted to `for_version`).
fn health_response(table: &RoutingTable, for_version: Option<&str>) -> Response<Body> {
    let healthy = table.healthy(for_version);
    let mut versions: Vec<String> = table.available_versions().into_iter().collect();
    versions.sort();

    let backends = table
        .all_backends_sorted()
        .iter()
        .map(|(b, s)| BackendEntry::from_state(b, s))
        .collect();

    let body = HealthResponse {
        healthy,
        versions,
        weights: table.weights(),
        backends,
    };

    let status = if healthy { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    json_response(status, &body)
}

fn parse_body<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Option<T> {
    serde_json::from_slice(bytes).ok()
}

/// Returns `Some(response)` if `req` matched an admin route (including the
/// `/exproxyment*`/`/health*` 404 catch-alls), or `None` if the caller
/// should proxy the request instead.
pub async fn dispatch(table: &RoutingTable, req: &BufferedRequest) -> Option<Response<Body>> {
    let path = req.uri.path();

    match (req.method.clone(), path) {
        (Method::GET, "/health") => {
            let for_version = uri_query_param(&req.uri, "for_version");
            Some(health_response(table, for_version.as_deref()))
        }
        (Method::GET, "/exproxyment/configure") => Some(json_response(StatusCode::OK, &configure_response(table))),
        (Method::POST, "/exproxyment/configure") => Some(handle_configure(table, &req.body)),
        (Method::POST, "/exproxyment/register") => Some(handle_register(table, &req.body)),
        (Method::POST, "/exproxyment/deregister") => Some(handle_deregister(table, &req.body)),
        (Method::GET, "/exproxyment/activity") => Some(json_response(
            StatusCode::OK,
            &ActivityResponse {
                activity: table.activity_snapshot(),
            },
        )),
        _ if path.starts_with("/exproxyment") || path.starts_with("/health") => Some(not_found()),
        _ => None,
    }
}

fn handle_configure(table: &RoutingTable, body: &[u8]) -> Response<Body> {
    // `backends` and `weights` are kept as raw `Value`s at the envelope level
    // and converted independently below, so a malformed `weights` entry is
    // reported as "bad format: weights" rather than blaming "backends".
    let Some(parsed) = parse_body::<ConfigureBody>(body) else {
        return bad_format("backends");
    };

    if let Some(raw) = parsed.backends {
        let Ok(backends) = serde_json::from_value::<Vec<BackendRef>>(raw) else {
            return bad_format("backends");
        };
        let backends: Vec<Backend> = backends.into_iter().map(Backend::from).collect();
        tracing::info!(?backends, "reconfiguring backends");
        table.set_backends(backends);
    }

    if let Some(raw) = parsed.weights {
        let Ok(weights) = serde_json::from_value::<HashMap<String, u64>>(raw) else {
            return bad_format("weights");
        };
        tracing::info!(?weights, "reconfiguring weights");
        table.set_weights(weights);
    }

    json_response(StatusCode::OK, &configure_response(table))
}

fn handle_register(table: &RoutingTable, body: &[u8]) -> Response<Body> {
    let Some(parsed) = parse_body::<BackendListBody>(body) else {
        return bad_format("backends");
    };

    for entry in parsed.backends {
        let backend = Backend::from(entry);
        tracing::info!(%backend, "registering backend");
        table.add_backend(backend);
    }

    json_response(StatusCode::OK, &StatusOk { status: "ok" })
}

fn handle_deregister(table: &RoutingTable, body: &[u8]) -> Response<Body> {
    let Some(parsed) = parse_body::<BackendListBody>(body) else {
        return bad_format("backends");
    };

    for entry in parsed.backends {
        let backend = Backend::from(entry);
        tracing::info!(%backend, "deregistering backend");
        table.remove_backend(&backend);
    }

    json_response(StatusCode::OK, &StatusOk { status: "ok" })
}

fn uri_query_param(uri: &hyper::Uri, name: &str) -> Option<String> {
    uri.query().and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    })
}
