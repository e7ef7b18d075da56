//! Snapshot of a cache entry as seen by subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

/// Lifecycle position of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Created but no fetch started yet
  Uninitialized,
  /// A fetch is scheduled or in flight
  Loading,
  /// The last fetch succeeded
  Success,
  /// The last fetch failed
  Error,
}

/// What a subscriber sees: status, the last good data and the last error.
///
/// `data` survives a failed refetch and is shown beside `status == Error`.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub status: QueryStatus,
  pub data: Option<T>,
  pub error: Option<ApiError>,
  /// When `data` was fetched
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> QueryState<T> {
  pub fn uninitialized() -> Self {
    Self {
      status: QueryStatus::Uninitialized,
      data: None,
      error: None,
      fetched_at: None,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Success or Error: nothing more will happen until the next refetch
  pub fn is_settled(&self) -> bool {
    self.is_success() || self.is_error()
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }
}

impl QueryState<Arc<Value>> {
  /// Decode the shared JSON payload into a typed state.
  ///
  /// A payload that does not fit `T` turns the state into an error carrying
  /// `ApiError::Parse`, leaving `data` empty. The entry itself stays
  /// Success: it holds the payload as the server sent it, and subscribers
  /// decoding into a fitting type still see it. Stale-while-error covers
  /// failed fetches only, not payloads a particular caller cannot read.
  pub fn decode<T: DeserializeOwned>(&self) -> QueryState<T> {
    let decoded = self
      .data
      .as_deref()
      .map(|value| T::deserialize(value).map_err(|e| ApiError::Parse(e.to_string())));

    match decoded {
      Some(Err(err)) => QueryState {
        status: QueryStatus::Error,
        data: None,
        error: Some(err),
        fetched_at: self.fetched_at,
      },
      Some(Ok(data)) => QueryState {
        status: self.status,
        data: Some(data),
        error: self.error.clone(),
        fetched_at: self.fetched_at,
      },
      None => QueryState {
        status: self.status,
        data: None,
        error: self.error.clone(),
        fetched_at: self.fetched_at,
      },
    }
  }
}
