//! Tether Manager - hosts one connector store per kind and exposes them over HTTP.
//!
//! # Architecture
//!
//! ```text
//!       tether.toml / HTTP API
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       SupervisorManager                  │
//! │  - One ConnectorStore per kind           │
//! │  - Loads configured connectors           │
//! │  - Start / shutdown                      │
//! └─────────────────────────────────────────┘
//!          ↓
//!     tether::ConnectorStore
//! ```

pub mod api;
pub mod auth;
pub mod manager;

pub use manager::SupervisorManager;
