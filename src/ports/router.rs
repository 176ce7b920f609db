use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};

/// Router defines the port for the routing tree served by a [`Server`](crate::core::Server).
///
/// How routes are matched is up to the implementation; the server only needs to mount
/// a tree under a prefix and to hand requests to it.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// Return a new router whose routes are this router's routes re-rooted under `prefix`.
    ///
    /// An empty prefix or `/` mounts at the root: the result routes exactly like `self`. Other
    /// prefixes are expected to be valid context paths (see
    /// [`SettingsValidator::validate_context_path`](crate::config::SettingsValidator::validate_context_path)).
    fn nest(&self, prefix: &str) -> Arc<dyn Router>;

    /// Dispatch a request. Requests matching no route get a `404 Not Found` response.
    async fn route(&self, req: Request<AxumBody>) -> Response<AxumBody>;
}
