pub mod diagnostics;
pub mod exit_hooks;
pub mod server;

pub use diagnostics::StartupReport;
pub use exit_hooks::{ExitHookHandle, ExitHooks};
pub use server::{LifecycleState, Server, ServerBuilder, ServerError, ServerResult};
