// src/proxy/request.rs
use hyper::body::Bytes;
use hyper::{Body, HeaderMap, Method, Request, Uri};

/// A fully-buffered inbound request. Buffering up front (rather than
/// streaming) is what makes the 406-retry branch possible: the same body
/// bytes are reused across every attempt without re-reading the original
/// connection.
#[derive(Clone)]
pub struct BufferedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source_host: String,
}

impl BufferedRequest {
    pub async fn from_hyper(req: Request<Body>, source_host: String) -> Result<Self, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = hyper::body::to_bytes(body).await?;
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            source_host,
        })
    }

    pub fn path_and_query(&self) -> &str {
        self.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/")
    }
}
