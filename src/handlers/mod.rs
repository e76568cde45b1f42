//! HTTP and WebSocket request handlers
//!
//! - `health` - Health check endpoint
//! - `relay` - Voice relay WebSocket

pub mod health;
pub mod relay;

pub use health::health_check;
pub use relay::relay_handler;
