//! Client-side resource cache with tag-based invalidation.
//!
//! This module provides the data-synchronization layer between UI code and
//! the network:
//! - One cache entry per query descriptor, shared by all subscribers
//! - At most one fetch in flight per entry, last request wins
//! - Mutations invalidate entries by tag once they succeed
//! - Stale-while-error: failed refetches keep the last good data

pub mod key;
pub mod state;
mod store;
pub mod tags;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use key::{QueryKey, ResourceKind};
pub use state::{QueryState, QueryStatus};
pub use store::{
  MutationTrigger, QueryClient, QueryClientBuilder, Subscription, DEFAULT_KEEP_UNUSED_FOR,
};
pub use tags::{Tag, TagId, TagKind};
pub use traits::{ApiRequest, Transport};
