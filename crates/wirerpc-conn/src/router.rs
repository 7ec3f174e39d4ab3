//! Method registry for server connections.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use wirerpc_frame::{Code, Response};

use crate::context::{RequestReader, ResponseWriter};
use crate::error::Result;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A server-side method implementation.
///
/// Any `Fn(RequestReader, ResponseWriter) -> impl Future<Output = Result<()>>`
/// closure is a handler.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: RequestReader, response: ResponseWriter) -> BoxFuture<Result<()>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(RequestReader, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, request: RequestReader, response: ResponseWriter) -> BoxFuture<Result<()>> {
        Box::pin(self(request, response))
    }
}

/// Answers `ReqNoAuth` unless the session has logged in.
struct Guarded<H> {
    inner: H,
}

impl<H: Handler> Handler for Guarded<H> {
    fn call(&self, request: RequestReader, mut response: ResponseWriter) -> BoxFuture<Result<()>> {
        if request.session().is_authenticated() {
            return self.inner.call(request, response);
        }
        tracing::debug!(
            method = %request.request().method,
            session = request.session().id(),
            "rejecting unauthenticated request"
        );
        Box::pin(async move {
            response
                .write_response(Response::error(Code::ReqNoAuth, ""))
                .await
        })
    }
}

/// Maps method names to handlers.
#[derive(Clone, Default)]
pub struct Router {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any earlier one.
    pub fn register(&mut self, method: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.handlers.insert(method.into(), Arc::new(handler));
        self
    }

    /// Register `handler` for `method`, reachable only after login.
    pub fn register_guarded(
        &mut self,
        method: impl Into<String>,
        handler: impl Handler,
    ) -> &mut Self {
        self.register(method, Guarded { inner: handler })
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods())
            .finish()
    }
}
