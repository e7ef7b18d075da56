//! In-process backend for engine tests.
//!
//! Responses are computed when a request is sent; an optional delay is
//! applied afterwards, so a slow response carries the data as it was at
//! send time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use super::traits::{ApiRequest, Transport};
use crate::error::ApiError;

#[derive(Default)]
struct Db {
  books: Vec<Value>,
  tags: Vec<Value>,
  next_id: i64,
}

#[derive(Default)]
struct Calls {
  counts: HashMap<String, usize>,
  last: HashMap<String, ApiRequest>,
}

#[derive(Default)]
pub struct FakeBackend {
  db: Mutex<Db>,
  calls: Mutex<Calls>,
  failures: Mutex<VecDeque<ApiError>>,
  delays: Mutex<VecDeque<Duration>>,
}

impl FakeBackend {
  /// Backend holding one book per title, with ids counting from 1
  pub fn with_books(titles: &[&str]) -> Arc<Self> {
    let backend = Self::default();
    {
      let mut db = backend.db.lock().unwrap();
      for title in titles {
        db.next_id += 1;
        let id = db.next_id;
        db.books.push(json!({ "id": id, "title": title, "author": "Anon" }));
      }
    }
    Arc::new(backend)
  }

  /// Fail the next request with `err`
  pub fn fail_next(&self, err: ApiError) {
    self.failures.lock().unwrap().push_back(err);
  }

  /// Hold the next response for `delay`
  pub fn delay_next(&self, delay: Duration) {
    self.delays.lock().unwrap().push_back(delay);
  }

  /// How many times `"METHOD /path"` was requested
  pub fn calls(&self, route: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .counts
      .get(route)
      .copied()
      .unwrap_or(0)
  }

  pub fn last_query(&self, route: &str) -> Option<Vec<(&'static str, String)>> {
    self
      .calls
      .lock()
      .unwrap()
      .last
      .get(route)
      .map(|r| r.query.clone())
  }

  pub fn last_user(&self, route: &str) -> Option<Option<i64>> {
    self
      .calls
      .lock()
      .unwrap()
      .last
      .get(route)
      .map(|r| r.user_id)
  }

  fn respond(&self, request: &ApiRequest) -> Result<Option<Value>, ApiError> {
    let mut db = self.db.lock().unwrap();
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
    let search = request
      .query
      .iter()
      .find(|(name, _)| *name == "search")
      .map(|(_, v)| v.to_lowercase());

    match (request.method.as_str(), segments.as_slice()) {
      ("GET", ["books"]) => {
        let books = db
          .books
          .iter()
          .filter(|b| match &search {
            Some(term) => b["title"]
              .as_str()
              .is_some_and(|t| t.to_lowercase().contains(term)),
            None => true,
          })
          .cloned()
          .collect();
        Ok(Some(Value::Array(books)))
      }
      ("POST", ["books"]) => {
        db.next_id += 1;
        let mut book = request.body.clone().unwrap_or_else(|| json!({}));
        book["id"] = json!(db.next_id);
        db.books.push(book.clone());
        Ok(Some(book))
      }
      ("GET", ["books", id]) => find(&db.books, id).map(Some),
      ("PUT", ["books", id]) => {
        let id = parse_id(id)?;
        let book = db
          .books
          .iter_mut()
          .find(|b| b["id"] == id)
          .ok_or_else(not_found)?;
        if let Some(Value::Object(patch)) = &request.body {
          for (k, v) in patch {
            book[k] = v.clone();
          }
        }
        Ok(Some(book.clone()))
      }
      ("DELETE", ["books", id]) => {
        let id = parse_id(id)?;
        db.books.retain(|b| b["id"] != id);
        Ok(None)
      }
      ("GET", ["books", book_id, "status"]) => Ok(Some(match request.user_id {
        Some(user_id) => json!({ "id": 1, "user_id": user_id, "book_id": parse_id(book_id)?, "status_id": 2 }),
        None => Value::Null,
      })),
      ("GET", ["tags"]) => Ok(Some(Value::Array(db.tags.clone()))),
      ("POST", ["tags"]) => {
        db.next_id += 1;
        let mut tag = request.body.clone().unwrap_or_else(|| json!({}));
        tag["id"] = json!(db.next_id);
        db.tags.push(tag.clone());
        Ok(Some(tag))
      }
      ("POST", ["users", "select"]) => {
        let id = request
          .body
          .as_ref()
          .and_then(|b| b["id"].as_i64())
          .ok_or_else(not_found)?;
        Ok(Some(json!({
          "id": id,
          "name": format!("user {}", id),
          "avatar_color": "#3b82f6",
          "created_at": "2024-01-01 00:00:00",
          "updated_at": null,
        })))
      }
      _ => Err(not_found()),
    }
  }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
  raw.parse().map_err(|_| ApiError::Application {
    status: 400,
    message: format!("bad id {}", raw),
  })
}

fn find(items: &[Value], raw: &str) -> Result<Value, ApiError> {
  let id = parse_id(raw)?;
  items
    .iter()
    .find(|item| item["id"] == id)
    .cloned()
    .ok_or_else(not_found)
}

fn not_found() -> ApiError {
  ApiError::Application {
    status: 404,
    message: "not found".into(),
  }
}

impl Transport for FakeBackend {
  fn execute(&self, request: ApiRequest) -> BoxFuture<'static, Result<Option<Value>, ApiError>> {
    let route = format!("{} {}", request.method, request.path);
    {
      let mut calls = self.calls.lock().unwrap();
      *calls.counts.entry(route.clone()).or_default() += 1;
      calls.last.insert(route, request.clone());
    }

    let result = match self.failures.lock().unwrap().pop_front() {
      Some(err) => Err(err),
      None => self.respond(&request),
    };
    let delay = self.delays.lock().unwrap().pop_front();

    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      result
    }
    .boxed()
  }
}
