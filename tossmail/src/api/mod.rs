//! Operator-facing HTTP API and WebSocket notifications

pub mod handlers;
pub mod server;
pub mod ws;

pub use handlers::AppState;
pub use server::ApiServer;
