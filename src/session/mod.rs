//! The current-user singleton.
//!
//! Hydrated once from durable storage, mutated in place on login, logout
//! and profile edits, and written back to storage on every change.

mod storage;

pub use storage::{MemoryStorage, SqliteStorage, Storage};

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::api::types::User;

/// Storage key holding the persisted user
pub const CURRENT_USER_KEY: &str = "currentUser";

/// Shared handle to the selected user. Clones see the same user.
#[derive(Clone)]
pub struct CurrentUserStore {
  storage: Arc<dyn Storage>,
  current: Arc<RwLock<Option<User>>>,
}

impl CurrentUserStore {
  /// Read the persisted user, if any.
  ///
  /// An unreadable or corrupt record is logged and treated as logged out.
  pub fn hydrate(storage: Arc<dyn Storage>) -> Self {
    let current = match storage.get_item(CURRENT_USER_KEY) {
      Ok(Some(raw)) => match serde_json::from_str::<User>(&raw) {
        Ok(user) => {
          debug!(user_id = user.id, "restored current user");
          Some(user)
        }
        Err(e) => {
          warn!("Failed to parse stored user: {}", e);
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!("Failed to read stored user: {}", e);
        None
      }
    };

    Self {
      storage,
      current: Arc::new(RwLock::new(current)),
    }
  }

  /// Store with no persistence and no user, for tests and scripts
  pub fn in_memory() -> Self {
    Self::hydrate(Arc::new(MemoryStorage::new()))
  }

  pub fn current(&self) -> Option<User> {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn current_user_id(&self) -> Option<i64> {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .map(|u| u.id)
  }

  /// Replace the current user and persist the change. `None` logs out.
  pub fn set(&self, user: Option<User>) -> Result<()> {
    match &user {
      Some(user) => {
        let raw = serde_json::to_string(user)
          .map_err(|e| eyre!("Failed to serialize user {}: {}", user.id, e))?;
        self.storage.set_item(CURRENT_USER_KEY, &raw)?;
      }
      None => self.storage.remove_item(CURRENT_USER_KEY)?,
    }

    *self.current.write().unwrap_or_else(PoisonError::into_inner) = user;
    Ok(())
  }

  pub fn logout(&self) -> Result<()> {
    self.set(None)
  }
}
