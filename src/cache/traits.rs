//! The seam between the engine and the network.

use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::Value;

use crate::error::ApiError;

/// One HTTP call, fully derived from a query or mutation descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the API base, always starting with `/`
  pub path: String,
  pub query: Vec<(&'static str, String)>,
  pub body: Option<Value>,
  /// Current user id, sent as the `currentUserId` header when present
  pub user_id: Option<i64>,
}

impl ApiRequest {
  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::POST, path).with_body(body)
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::PUT, path).with_body(body)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
      user_id: None,
    }
  }

  pub fn with_query(mut self, name: &'static str, value: impl Into<String>) -> Self {
    self.query.push((name, value.into()));
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_user(mut self, user_id: Option<i64>) -> Self {
    self.user_id = user_id;
    self
  }
}

/// Executes requests for the engine.
///
/// A successful call yields `Some(body)` for JSON responses and `None` when
/// the server sent nothing to parse (204 or a non-JSON content type).
pub trait Transport: Send + Sync + 'static {
  fn execute(&self, request: ApiRequest) -> BoxFuture<'static, Result<Option<Value>, ApiError>>;
}
