pub mod client;
pub mod endpoints;
pub mod types;

pub use client::ApiClient;
pub use endpoints::{Mutation, Query};
