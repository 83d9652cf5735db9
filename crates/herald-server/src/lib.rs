//! HTTP and WebSocket surface for the herald session service.

pub mod handlers;
pub mod observer;
pub mod routes;
pub mod rpc;
pub mod server;

pub use handlers::HandlerState;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
