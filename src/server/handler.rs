// src/server/handler.rs
use hyper::{Body, Request, Response};
use std::sync::Arc;
use tower::Service;
use tracing::Instrument;

use crate::admin;
use crate::proxy::{proxy, BufferedRequest, ProxyContext, DEFAULT_TRIES};
use crate::server::builder::WithSourceHost;

#[derive(Clone)]
pub struct RequestHandler {
    ctx: Arc<ProxyContext>,
    source_host: String,
}

impl RequestHandler {
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self {
            ctx,
            source_host: String::new(),
        }
    }
}

impl WithSourceHost for RequestHandler {
    fn with_source_host(mut self, host: String) -> Self {
        self.source_host = host;
        self
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let ctx = self.ctx.clone();
        let source_host = self.source_host.clone();
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("request", %request_id, method = %req.method(), path = %req.uri().path());
        Box::pin(
            async move {
                let buffered = BufferedRequest::from_hyper(req, source_host).await?;

                if let Some(response) = admin::dispatch(&ctx.table, &buffered).await {
                    return Ok(response);
                }

                Ok(proxy(ctx, buffered, DEFAULT_TRIES).await)
            }
            .instrument(span),
        )
    }
}
