//! # chatflow-server
//!
//! HTTP and WebSocket front end of the ChatFlow hub.
//!
//! - `GET /ws` - WebSocket events (`?format=msgpack` for binary framing)
//! - `GET /api/messages`, `GET /api/users` - polling fallback
//! - `POST /api/upload`, `GET /files/{key}` - attachments
//! - `GET /health`

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod upload;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
