//! # MindFlow Core
//!
//! Runtime-free logic shared by the MindFlow service: data models, the
//! task lifecycle state machine, prompt templates with their parse rules,
//! reminder formatting, and the [`store::Store`] abstraction with an
//! in-memory implementation.
//!
//! This crate contains no tokio, sqlx, HTTP client or other runtime
//! dependencies, so the pieces here can be exercised directly in tests.

pub mod lifecycle;
pub mod models;
pub mod prompts;
pub mod reminder;
pub mod store;
