use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use tower::ServiceExt;

use crate::ports::Router;

/// [`Router`] backed by an `axum::Router`.
#[derive(Clone, Debug, Default)]
pub struct AxumRouter {
    inner: axum::Router,
}

impl AxumRouter {
    pub fn new(router: axum::Router) -> Self {
        Self { inner: router }
    }

    pub fn as_axum(&self) -> &axum::Router {
        &self.inner
    }

    pub fn into_inner(self) -> axum::Router {
        self.inner
    }
}

impl From<axum::Router> for AxumRouter {
    fn from(router: axum::Router) -> Self {
        Self::new(router)
    }
}

#[async_trait]
impl Router for AxumRouter {
    /// An empty prefix or `/` returns this router unchanged. A missing leading `/` is
    /// added and trailing slashes are dropped.
    ///
    /// # Panics
    /// When `prefix` contains wildcards or captures, as `axum::Router::nest` does.
    fn nest(&self, prefix: &str) -> Arc<dyn Router> {
        let trimmed = prefix.trim_matches('/');
        if trimmed.is_empty() {
            return Arc::new(self.clone());
        }
        let prefix = format!("/{trimmed}");
        Arc::new(AxumRouter::new(
            axum::Router::new().nest(&prefix, self.inner.clone()),
        ))
    }

    async fn route(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        match self.inner.clone().oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}
