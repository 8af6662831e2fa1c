// src/cookie/mod.rs
//
// Stickiness cookie payload codec. On write: percent-encode
// `json({"version": v})`. On read: percent-decode, then JSON-decode,
// extracting `.version`; any failure along the way degrades to "no
// cookie present" rather than an error.
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;

#[derive(Deserialize)]
struct CookiePayload {
    version: String,
}

// Mirrors Python 2's `urllib.quote` default safe set (letters, digits,
// '_.-' and '/' pass through unescaped).
const COOKIE_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Build the `Set-Cookie` value for `version`.
pub fn encode(version: &str) -> String {
    let escaped_version = serde_json::to_string(version).expect("strings always serialize");
    let json = format!("{{\"version\": {}}}", escaped_version);
    utf8_percent_encode(&json, COOKIE_SAFE).to_string()
}

/// Decode a cookie value into a version string. Any decode failure
/// (bad percent-encoding, invalid JSON, missing field) returns `None`,
/// never an error.
pub fn decode(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    serde_json::from_str::<CookiePayload>(&decoded).ok().map(|p| p.version)
}
