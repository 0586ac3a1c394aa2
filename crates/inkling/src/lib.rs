//! # Inkling
//!
//! A personal idea-capture and creative-writing assistant. Short text
//! fragments are stored per user; an AI completion service groups them,
//! relates them to each other, orders them on a narrative timeline and
//! suggests where to take them next. Analysis results are streamed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  line protocol  ┌──────────┐  SSE   ┌────────────┐
//! │  client  │◀───────────────│  server  │◀───────│ completion │
//! │ (ink)    │  0:/3:/f: lines │  (axum)  │        │  provider  │
//! └────┬─────┘                 └────┬─────┘        └────────────┘
//!      │ interpreter                │ store
//!      ▼                            ▼
//! ┌──────────┐                 ┌──────────┐
//! │ history  │                 │  SQLite  │
//! └──────────┘                 └──────────┘
//! ```
//!
//! Prompt assembly, the stream decoder, extraction and the interpreter
//! live in `inkling-core`, which has no I/O of its own.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite datastore |
//! | [`completion`] | Completion service boundary |
//! | [`server`] | HTTP server |
//! | [`auth`] | Bearer-token authentication |
//! | [`client`] | HTTP client and analysis sessions |
//! | [`logging`] | Tracing subscriber setup |

pub mod analyze;
pub mod auth;
pub mod client;
pub mod completion;
pub mod config;
pub mod db;
pub mod fragments;
pub mod history;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
