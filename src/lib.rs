//! # MindFlow
//!
//! Chat with a generative text service, turn conversations into documents,
//! and get reminded by email when tasks fall due.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────┐
//! │   HTTP API   │──▶│ Chat / Organize  │──▶│  SQLite  │
//! │   (axum)     │   │ Tasks            │   │  Store   │
//! └──────────────┘   └────────┬─────────┘   └────▲─────┘
//!                             │                  │
//!                             ▼                  │
//!                    ┌──────────────────┐   ┌────┴─────────┐
//!                    │ Generative text  │   │  Reminder    │──▶ mail relay
//!                    │ (OpenAI-compat)  │   │  scheduler   │
//!                    └──────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mindflow init                 # create database
//! mindflow serve                # HTTP API + background reminders
//! mindflow tick                 # run one reminder pass and exit
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of [`store::Store`] |
//! | [`llm`] | Generative text client abstraction |
//! | [`assistant`] | Summary, document, tag, title and key-point generation |
//! | [`organize`] | Conversation to document pipeline |
//! | [`chat`] | Blocking and streamed chat turns |
//! | [`tasks`] | Task operations |
//! | [`scheduler`] | Due-task reminder scheduler |
//! | [`notify`] | Notification channel |
//! | [`auth`] | Passwords and session tokens |
//! | [`error`] | Service error type |
//! | [`server`] | HTTP API |
//!
//! Models, the task lifecycle, prompt templates and the store trait live in
//! `mindflow-core` and are re-exported here.

pub mod assistant;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod notify;
pub mod organize;
pub mod scheduler;
pub mod server;
pub mod sqlite_store;
pub mod tasks;

pub use mindflow_core::{lifecycle, models, prompts, reminder, store};
