//! Prediction orchestration core for an NBA player-prop prediction platform.
//!
//! Exposes the slate/line, staged-write/consolidation, distributed-lock, and
//! grading/self-healing subsystems as a library so both the CLI in `main.rs`
//! and integration tests can drive them directly.

pub mod alerts;
pub mod cache;
pub mod config;
pub mod consolidate;
pub mod domain;
pub mod error;
pub mod grade;
pub mod healing;
pub mod lines;
pub mod lock;
pub mod retry;
pub mod slate;
pub mod staging;
pub mod store;
pub mod worker;
