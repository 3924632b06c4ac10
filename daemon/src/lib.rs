//! pushdeploy library
//!
//! Receives push webhooks, runs the configured command sequence for the
//! matching repository and branch, records every attempt in SQLite and
//! notifies operators of the outcome.

pub mod app;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod notify;
pub mod server;
pub mod store;
pub mod utils;
pub mod webhook;
