// Common library for shared code across the watcher binary and tests

pub mod config;
pub mod errors;
pub mod handler;
pub mod models;
pub mod notify;
pub mod retry;
pub mod role;
pub mod scheduler;
pub mod store;
pub mod telemetry;
