//! Survey Relay Library Crate
//!
//! Configuration, shared state, the completion relay itself, HTTP handlers and
//! routing. The `relay` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod relay;
pub mod router;
pub mod state;
