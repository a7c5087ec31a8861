//! # Vitalis Gateway
//!
//! The network boundary: an axum HTTP surface, the SSE stream transport
//! multiplexer that fans bus events out to per-conversation subscribers,
//! and the turn runner that stamps conversation ids onto engine events
//! before they reach the bus.

pub mod multiplexer;
pub mod routes;
pub mod runner;
pub mod wire;

pub use multiplexer::StreamMultiplexer;
pub use routes::{router, AppState, SharedState};
pub use runner::TurnRunner;
pub use wire::WireFrame;
