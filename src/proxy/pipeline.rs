// src/proxy/pipeline.rs
//
// The per-request algorithm: resolve a target version, select a backend,
// forward the request, retry on upstream version-rejection, apply
// stickiness. Recursion is boxed (`BoxFuture`) because async fns cannot
// call themselves unboxed, the future's size would otherwise be
// unbounded.
use super::error::ProxyError;
use super::request::BufferedRequest;
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::state::RoutingTable;
use crate::{cookie, placement, resolver};
use futures::future::BoxFuture;
use hyper::header::{HeaderName, HeaderValue, SET_COOKIE};
use hyper::{Body, Method, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const DEFAULT_TRIES: u32 = 3;
const WRONG_VERSION_HEADER: &str = "x-exproxyment-wrong-version";
const VERSION_HEADER: &str = "x-exproxyment-version";
const BACKEND_HEADER: &str = "x-exproxyment-backend";

pub struct ProxyContext {
    pub table: Arc<RoutingTable>,
    pub config: Arc<Config>,
    pub client: reqwest::Client,
    pub metrics: Arc<MetricsCollector>,
}

/// Resolves a backend for `req` and forwards it, retrying up to `tries`
/// times when an upstream rejects the selected version.
pub fn proxy(ctx: Arc<ProxyContext>, req: BufferedRequest, tries: u32) -> BoxFuture<'static, Response<Body>> {
    Box::pin(async move {
        if tries == 0 {
            return fail(&ctx, ProxyError::TooManyTries);
        }

        if !ctx.table.healthy(None) {
            return fail(&ctx, ProxyError::NoBackendsAvailable);
        }

        let preference = resolver::resolve(&req.headers, &req.uri);
        if let Some(version) = &preference.version {
            debug!(%version, required = preference.required, "client version preference");
        }

        let available = ctx.table.available_versions();

        if preference.required {
            if let Some(version) = &preference.version {
                if !available.contains(version) {
                    return fail(&ctx, ProxyError::RequiredVersionUnavailable(version.clone()));
                }
            }
        }

        let mut version = preference.version.clone();
        let needs_placement = match &version {
            Some(v) => !available.contains(v),
            None => true,
        };
        if needs_placement {
            version = placement::place(&available, &ctx.table.weights());
        }

        let version = match version {
            Some(v) => v,
            None => return fail(&ctx, ProxyError::NoValidVersions),
        };

        let backend = match ctx.table.backend_for(&version) {
            Some(b) => b,
            None => return fail(&ctx, ProxyError::NoBackendForVersion(version)),
        };

        let upstream_uri = backend.url_for(req.path_and_query());

        let version_header_value = match HeaderValue::from_str(&version) {
            Ok(value) => value,
            Err(_) => return fail(&ctx, ProxyError::InvalidVersion),
        };

        let mut upstream_headers = req.headers.clone();
        upstream_headers.insert(HeaderName::from_static(VERSION_HEADER), version_header_value);

        let guard = ctx
            .table
            .track_request(req.source_host.clone(), upstream_uri.clone(), backend.clone());
        ctx.metrics.set_active_requests(ctx.table.activity_snapshot().len() as i64);

        let started = Instant::now();
        let mut builder = ctx.client.request(req.method.clone(), &upstream_uri).headers(upstream_headers);
        if req.method != Method::GET {
            builder = builder.body(req.body.clone());
        }

        let upstream_response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                drop(guard);
                ctx.metrics.set_active_requests(ctx.table.activity_snapshot().len() as i64);
                ctx.metrics.record_backend_request(&backend.to_string(), false, started.elapsed());
                return fail(&ctx, ProxyError::UpstreamTransport { backend: backend.to_string(), source: err });
            }
        };

        let status = upstream_response.status();
        let is_wrong_version = status == StatusCode::NOT_ACCEPTABLE
            && upstream_response.headers().get(WRONG_VERSION_HEADER).is_some();

        if is_wrong_version {
            drop(guard);
            ctx.metrics.set_active_requests(ctx.table.activity_snapshot().len() as i64);
            ctx.metrics.record_backend_request(&backend.to_string(), false, started.elapsed());
            ctx.metrics.record_outcome("retry");
            return proxy(ctx.clone(), req, tries - 1).await;
        }

        ctx.metrics.record_backend_request(&backend.to_string(), true, started.elapsed());

        let mut response_headers = upstream_response.headers().clone();
        response_headers.remove(VERSION_HEADER);
        response_headers.remove(BACKEND_HEADER);
        // re-check rather than reuse version_header_value: HeaderMap values aren't
        // Copy and the upstream response has already been committed to by this
        // point, so a bad value here is logged and skipped instead of aborting
        // a response we've otherwise already served.
        match HeaderValue::from_str(&version) {
            Ok(value) => {
                response_headers.insert(HeaderName::from_static(VERSION_HEADER), value);
            }
            Err(_) => tracing::warn!(%version, "could not set response version header"),
        }
        match HeaderValue::from_str(&backend.to_string()) {
            Ok(value) => {
                response_headers.insert(HeaderName::from_static(BACKEND_HEADER), value);
            }
            Err(_) => tracing::warn!(%backend, "could not set response backend header"),
        }

        if ctx.config.soft_sticky || ctx.config.hard_sticky {
            let cookie_name = if ctx.config.hard_sticky {
                "exproxyment_require_version"
            } else {
                "exproxyment_request_version"
            };
            let mut cookie_header = format!("{}={}", cookie_name, cookie::encode(&version));
            if let Some(domain) = &ctx.config.cookie_domain {
                cookie_header.push_str(&format!("; Domain={domain}"));
            }
            match HeaderValue::from_str(&cookie_header) {
                Ok(value) => {
                    response_headers.append(SET_COOKIE, value);
                }
                Err(_) => tracing::warn!(%version, "could not set stickiness cookie"),
            }
        }

        let body_bytes = upstream_response.bytes().await.unwrap_or_default();
        drop(guard);
        ctx.metrics.set_active_requests(ctx.table.activity_snapshot().len() as i64);
        ctx.metrics.record_outcome("ok");

        let mut response = Response::builder()
            .status(status)
            .body(Body::from(body_bytes))
            .expect("status copied from a real upstream response is always valid");
        *response.headers_mut() = response_headers;
        response
    })
}

fn fail(ctx: &ProxyContext, err: ProxyError) -> Response<Body> {
    ctx.metrics.record_outcome(err.metric_label());
    err.into_response()
}
