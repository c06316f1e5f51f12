//! # Sheets Core
//!
//! Shared, I/O-free logic for Sheets: data models, prompt tag/URL
//! extraction, prompt composition, completion event-stream decoding,
//! the rules file tree, and the key-value store abstraction.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Everything
//! here is deterministic and can be tested without a network.

pub mod commands;
pub mod compose;
pub mod error;
pub mod extract;
pub mod models;
pub mod sse;
pub mod store;
pub mod tree;

pub use error::SheetsError;
