pub mod router;
pub mod server_port;

pub use router::Router;
pub use server_port::{ServerPort, ServerPortError, ServerPortResult};
