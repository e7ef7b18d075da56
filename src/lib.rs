//! Client data layer for a personal library tracker.
//!
//! `cache` holds the query engine, `api` the endpoint tables and HTTP
//! transport, `session` the persisted current user.

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
