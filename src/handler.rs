//! The pluggable inbound dispatch seam, plus the default "no handler"
//! responder and a convenience per-endpoint router.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::connection::{IncomingRequest, ResponseBuilder};

#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle_request(&self, req: IncomingRequest, respond: ResponseBuilder);
}

/// The default handler installed on a freshly constructed `Channel`: every
/// inbound call gets a not-ok reply carrying `"no handler defined"`.
pub struct NoHandler;

#[async_trait]
impl RequestHandler for NoHandler {
    async fn handle_request(&self, _req: IncomingRequest, respond: ResponseBuilder) {
        let _ = respond
            .send_not_ok(Vec::new(), b"no handler defined".to_vec())
            .await;
    }
}

type EndpointFn = Box<
    dyn Fn(IncomingRequest) -> Pin<Box<dyn Future<Output = (bool, Vec<u8>, Vec<u8>)> + Send>>
        + Send
        + Sync,
>;

/// A `RequestHandler` that dispatches on `arg1` (the endpoint name) to a
/// table of registered closures, one per name. This is the handler
/// `Channel::register` installs the first time it is called; a second
/// `register` call on a channel whose handler is not an `EndpointRouter`
/// fails with `InvalidHandlerForRegistration`.
#[derive(Default)]
pub struct EndpointRouter {
    endpoints: RwLock<HashMap<String, EndpointFn>>,
}

impl EndpointRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(IncomingRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (bool, Vec<u8>, Vec<u8>)> + Send + 'static,
    {
        let boxed: EndpointFn = Box::new(move |req| Box::pin(f(req)));
        self.endpoints.write().unwrap().insert(name.into(), boxed);
    }
}

#[async_trait]
impl RequestHandler for EndpointRouter {
    async fn handle_request(&self, req: IncomingRequest, respond: ResponseBuilder) {
        let endpoint = String::from_utf8_lossy(&req.arg1).into_owned();
        let fut = {
            let endpoints = self.endpoints.read().unwrap();
            endpoints.get(&endpoint).map(|f| f(req))
        };
        match fut {
            Some(fut) => {
                let (ok, arg2, arg3) = fut.await;
                let result = if ok {
                    respond.send_ok(arg2, arg3).await
                } else {
                    respond.send_not_ok(arg2, arg3).await
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "failed to send response");
                }
            }
            None => {
                let _ = respond
                    .send_not_ok(Vec::new(), b"no handler defined".to_vec())
                    .await;
            }
        }
    }
}
