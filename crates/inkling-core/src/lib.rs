//! # Inkling Core
//!
//! Runtime-free logic for Inkling: fragment and result models, prompt
//! assembly, the line-tagged stream decoder, tolerant structured
//! extraction, the stream interpreter state machine, and the store
//! abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP client, or filesystem I/O.
//! The application crate supplies the transport and persistence.
//!
//! ## Data Flow
//!
//! ```text
//! fragments ──▶ prompt::build_prompt ──▶ completion service
//!                                              │ (line-tagged stream)
//!                                              ▼
//!              extract ◀── interpreter::StreamInterpreter ◀── stream::StreamChunk
//!                 │
//!                 ▼
//!        AnalysisResult / RelationAnalysisResult ──▶ history record
//! ```

pub mod batch;
pub mod error;
pub mod extract;
pub mod interpreter;
pub mod models;
pub mod prompt;
pub mod search;
pub mod shape;
pub mod store;
pub mod stream;
