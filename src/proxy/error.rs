// src/proxy/error.rs
//
// Every failure mode the pipeline can hit. All of them render as a 504
// with a fixed plain-text reason, there is exactly one status code in
// this taxonomy, so `into_response` never branches past `Display`. The
// pipeline never lets one of these unwind into the request handler:
// every guard in `pipeline::proxy` converts straight into a response at
// the point of failure.
use hyper::{Body, Response, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("too many tries")]
    TooManyTries,

    #[error("no backends available")]
    NoBackendsAvailable,

    #[error("no backend available for {0}")]
    RequiredVersionUnavailable(String),

    #[error("no valid versions")]
    NoValidVersions,

    #[error("no backend for {0}")]
    NoBackendForVersion(String),

    #[error("bad connection to {backend} ({source})")]
    UpstreamTransport { backend: String, source: reqwest::Error },

    #[error("invalid version")]
    InvalidVersion,
}

impl ProxyError {
    /// Label used for the `exproxyment_proxy_outcomes_total` counter.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::TooManyTries => "too_many_tries",
            Self::NoBackendsAvailable => "no_backends",
            Self::RequiredVersionUnavailable(_) => "no_backend_for_version",
            Self::NoValidVersions => "no_valid_versions",
            Self::NoBackendForVersion(_) => "no_backend",
            Self::UpstreamTransport { .. } => "bad_connection",
            Self::InvalidVersion => "invalid_version",
        }
    }

    pub fn into_response(self) -> Response<Body> {
        Response::builder()
            .status(StatusCode::GATEWAY_TIMEOUT)
            .body(Body::from(self.to_string()))
            .expect("status/body are always valid")
    }
}
