//! # Sheets
//!
//! A prompt-to-report service. A prompt may tag stored context files
//! (`#path`) and embed URLs; Sheets loads the tagged context, fetches the
//! URLs (rewriting GitHub links to raw content), composes one prompt, and
//! relays the model's streamed answer to the caller as it is generated.
//!
//! ## Architecture
//!
//! ```text
//!  prompt ──▶ extract ──┬──▶ context loader ──┐
//!                       │    (kv: file:/context:)
//!                       └──▶ fetcher ─────────┤
//!                            (GitHub raw, URLs)│
//!                                              ▼
//!                                         composer ──▶ relay ──▶ deltas
//!                                                     (SSE decode)
//! ```
//!
//! Around the pipeline sit a rules store (shared context files), saved
//! sheets, GitHub OAuth sessions, and a static command catalog, all behind
//! one HTTP API.
//!
//! ## Quick Start
//!
//! ```bash
//! sheets init                       # create database
//! sheets rules put ./STYLE.md       # store a context file
//! sheets generate "review #STYLE.md against https://github.com/o/r"
//! sheets serve                      # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`kv`] | SQLite key-value store |
//! | [`context`] | Tagged context loading, per-user context |
//! | [`fetch`] | Remote URL fetching |
//! | [`relay`] | Streaming completion relay |
//! | [`generate`] | The prompt pipeline |
//! | [`analyze`] | GitHub repository analysis |
//! | [`rules`] | Rules files |
//! | [`import`] | Directory import into rules |
//! | [`sheets`] | Saved sheets |
//! | [`auth`] | Sessions and GitHub OAuth |
//! | [`render`] | Markdown rendering |
//! | [`server`] | HTTP server |

pub mod analyze;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod fetch;
pub mod generate;
pub mod import;
pub mod kv;
pub mod migrate;
pub mod relay;
pub mod render;
pub mod rules;
pub mod server;
pub mod sheets;
