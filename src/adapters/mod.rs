pub mod axum_engine;
pub mod axum_router;
pub mod hyper_engine;
pub(crate) mod listener;
pub mod tls;

/// Re-export commonly used types from adapters
pub use axum_engine::AxumEngine;
pub use axum_router::AxumRouter;
pub use hyper_engine::HyperEngine;
