// src/resolver/mod.rs
//
// Determines what version a client wants and how strongly they want it,
// in strict precedence: header, then query param, then cookie.
use crate::cookie;
use hyper::{HeaderMap, Uri};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPreference {
    pub required: bool,
    pub version: Option<String>,
}

impl VersionPreference {
    fn none() -> Self {
        Self {
            required: false,
            version: None,
        }
    }
}

const HEADER_REQUIRE: &str = "x-exproxyment-require-version";
const HEADER_REQUEST: &str = "x-exproxyment-request-version";
const PARAM_REQUIRE: &str = "exproxyment_require_version";
const PARAM_REQUEST: &str = "exproxyment_request_version";

/// Resolve (required, version) from headers, query string, then cookies,
/// returning the first non-empty match. A cookie that fails to decode is
/// treated as absent, never as an error.
pub fn resolve(headers: &HeaderMap, uri: &Uri) -> VersionPreference {
    for (required, name) in [(true, HEADER_REQUIRE), (false, HEADER_REQUEST)] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                return VersionPreference {
                    required,
                    version: Some(value.to_string()),
                };
            }
        }
    }

    let query_params: std::collections::HashMap<String, String> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    for (required, name) in [(true, PARAM_REQUIRE), (false, PARAM_REQUEST)] {
        if let Some(value) = query_params.get(name) {
            if !value.is_empty() {
                return VersionPreference {
                    required,
                    version: Some(value.clone()),
                };
            }
        }
    }

    let cookies = parse_cookie_header(headers);
    for (required, name) in [(true, PARAM_REQUIRE), (false, PARAM_REQUEST)] {
        if let Some(raw) = cookies.get(name) {
            if let Some(version) = cookie::decode(raw) {
                return VersionPreference {
                    required,
                    version: Some(version),
                };
            }
        }
    }

    VersionPreference::none()
}

fn parse_cookie_header(headers: &HeaderMap) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    for value in headers.get_all(hyper::header::COOKIE).iter() {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            let pair = pair.trim();
            if let Some((k, v)) = pair.split_once('=') {
                out.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }
    out
}
