//! Query cache and tag invalidation engine.
//!
//! `QueryClient` owns one entry per `QueryKey`. Subscribing creates the entry
//! on first use and fetches it; mutations invalidate entries by tag after
//! they succeed. Entries nobody subscribes to are evicted after a grace
//! period.
//!
//! All entry bookkeeping happens under one mutex that is never held across
//! an await, so each transition is atomic with respect to the others.
//! Network calls run on spawned tasks and report back with the generation
//! they were started for; a response from a superseded generation is
//! dropped.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::key::QueryKey;
use super::state::{QueryState, QueryStatus};
use super::tags::{intersects, Tag};
use super::traits::Transport;
use crate::api::endpoints::{Mutation, Query, PER_USER_TAGS};
use crate::api::types::User;
use crate::error::ApiError;
use crate::session::CurrentUserStore;

/// Default grace period before an unsubscribed entry is evicted
pub const DEFAULT_KEEP_UNUSED_FOR: Duration = Duration::from_secs(60);

type Snapshot = QueryState<Arc<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchPhase {
  Idle,
  /// Spawned but the request has not been sent yet
  Scheduled,
  /// Request sent, awaiting the response
  InFlight,
}

struct Entry {
  query: Query,
  tags: Vec<Tag>,
  subscribers: usize,
  /// Invalidated while nobody was subscribed; refetch on next subscribe
  stale: bool,
  /// Drawn from the client-wide counter, so a task started for an evicted
  /// entry never matches the entry that replaces it
  generation: u64,
  fetch: FetchPhase,
  /// Bumped on every subscriber change so pending evictions can tell they
  /// are outdated
  epoch: u64,
  state: watch::Sender<Snapshot>,
}

impl Entry {
  fn new(query: Query) -> Self {
    let (state, _) = watch::channel(QueryState::uninitialized());
    Self {
      tags: query.provides_tags(None),
      query,
      subscribers: 0,
      stale: false,
      generation: 0,
      fetch: FetchPhase::Idle,
      epoch: 0,
      state,
    }
  }

  fn status(&self) -> QueryStatus {
    self.state.borrow().status
  }

  fn needs_fetch(&self) -> bool {
    self.fetch == FetchPhase::Idle
      && (self.stale || matches!(self.status(), QueryStatus::Uninitialized | QueryStatus::Error))
  }
}

struct Inner {
  transport: Arc<dyn Transport>,
  session: CurrentUserStore,
  keep_unused_for: Duration,
  next_generation: AtomicU64,
  entries: Mutex<HashMap<QueryKey, Entry>>,
}

/// Builder for a `QueryClient`.
pub struct QueryClientBuilder {
  transport: Arc<dyn Transport>,
  session: CurrentUserStore,
  keep_unused_for: Duration,
}

impl QueryClientBuilder {
  /// Grace period for entries without subscribers
  pub fn keep_unused_for(mut self, keep_unused_for: Duration) -> Self {
    self.keep_unused_for = keep_unused_for;
    self
  }

  pub fn build(self) -> QueryClient {
    QueryClient {
      inner: Arc::new(Inner {
        transport: self.transport,
        session: self.session,
        keep_unused_for: self.keep_unused_for,
        next_generation: AtomicU64::new(0),
        entries: Mutex::new(HashMap::new()),
      }),
    }
  }
}

/// Cache store and invalidation engine.
///
/// Cheap to clone; clones share the same cache. Must be used from within a
/// tokio runtime, which runs fetches and evictions.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl QueryClient {
  pub fn new(transport: Arc<dyn Transport>, session: CurrentUserStore) -> Self {
    Self::builder(transport, session).build()
  }

  pub fn builder(transport: Arc<dyn Transport>, session: CurrentUserStore) -> QueryClientBuilder {
    QueryClientBuilder {
      transport,
      session,
      keep_unused_for: DEFAULT_KEEP_UNUSED_FOR,
    }
  }

  pub fn session(&self) -> &CurrentUserStore {
    &self.inner.session
  }

  /// Subscribe to a query.
  ///
  /// Fetches when the entry is new, failed last time or was invalidated while
  /// unsubscribed; otherwise shares the cached data or the fetch already
  /// in flight. Dropping the subscription releases it.
  pub fn subscribe<T: DeserializeOwned>(&self, query: Query) -> Subscription<T> {
    let key = query.key();
    let mut entries = self.inner.entries();
    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| Entry::new(query));

    entry.subscribers += 1;
    entry.epoch += 1;
    if entry.needs_fetch() {
      self.inner.start_fetch(&key, entry);
    }
    let rx = entry.state.subscribe();
    drop(entries);

    Subscription {
      inner: Arc::clone(&self.inner),
      key,
      rx,
      _marker: PhantomData,
    }
  }

  /// Subscribe, wait for the first settled state and release.
  pub async fn fetch<T: DeserializeOwned>(&self, query: Query) -> QueryState<T> {
    let mut subscription = self.subscribe::<T>(query);
    subscription.settled().await
  }

  /// Cached snapshot without subscribing
  pub fn peek(&self, query: &Query) -> Option<QueryState<Arc<Value>>> {
    let entries = self.inner.entries();
    entries.get(&query.key()).map(|e| e.state.borrow().clone())
  }

  /// Number of live cache entries
  pub fn entry_count(&self) -> usize {
    self.inner.entries().len()
  }

  /// Make every entry whose tags intersect `tags` stale.
  ///
  /// Subscribed entries refetch immediately and show their old data while
  /// loading; unsubscribed ones refetch when next subscribed.
  pub fn invalidate(&self, tags: &[Tag]) {
    self.inner.invalidate(tags);
  }

  /// Run a write and invalidate its tags once it succeeds.
  ///
  /// The request runs on its own task, so dropping the returned future does
  /// not cancel a write that was already issued.
  pub async fn mutate(&self, mutation: Mutation) -> Result<Value, ApiError> {
    let inner = Arc::clone(&self.inner);
    let name = mutation.name();
    tokio::spawn(async move { inner.run_mutation(mutation).await })
      .await
      .map_err(|e| ApiError::Transport(format!("{} task failed: {}", name, e)))?
  }

  /// `mutate` with the response decoded into `T`
  pub async fn mutate_as<T: DeserializeOwned>(&self, mutation: Mutation) -> Result<T, ApiError> {
    let value = self.mutate(mutation).await?;
    serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))
  }

  /// Select a user on the server, persist it as the current user and
  /// invalidate everything scoped by the previous user.
  pub async fn select_user(&self, id: i64) -> color_eyre::Result<User> {
    let user: User = self.mutate_as(Mutation::SelectUser(id)).await?;
    self.inner.session.set(Some(user.clone()))?;
    info!(user_id = user.id, "selected user");
    self.invalidate(&PER_USER_TAGS);
    Ok(user)
  }

  /// Forget the current user and invalidate per-user data.
  pub fn logout(&self) -> color_eyre::Result<()> {
    self.inner.session.logout()?;
    info!("logged out");
    self.invalidate(&PER_USER_TAGS);
    Ok(())
  }
}

impl Inner {
  fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Move `entry` to Loading and spawn a fetch for a fresh generation.
  ///
  /// No-op while a fetch is scheduled but not yet sent: that fetch will
  /// already observe everything this call would.
  fn start_fetch(self: &Arc<Self>, key: &QueryKey, entry: &mut Entry) {
    if entry.fetch == FetchPhase::Scheduled {
      return;
    }

    let runtime = match Handle::try_current() {
      Ok(runtime) => runtime,
      Err(_) => {
        entry.state.send_modify(|s| {
          s.status = QueryStatus::Error;
          s.error = Some(ApiError::Transport("no async runtime to fetch on".into()));
        });
        return;
      }
    };

    entry.generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
    entry.fetch = FetchPhase::Scheduled;
    entry.stale = false;
    entry.state.send_modify(|s| s.status = QueryStatus::Loading);

    let inner = Arc::clone(self);
    let key = key.clone();
    let generation = entry.generation;
    runtime.spawn(async move { inner.run_fetch(key, generation).await });
  }

  async fn run_fetch(self: Arc<Self>, key: QueryKey, generation: u64) {
    let request = {
      let mut entries = self.entries();
      let Some(entry) = entries.get_mut(&key) else {
        return;
      };
      if entry.generation != generation {
        return;
      }
      entry.fetch = FetchPhase::InFlight;
      entry.query.request().with_user(self.session.current_user_id())
    };

    debug!(%key, generation, path = %request.path, "fetching");
    let result = self.transport.execute(request).await;

    let mut entries = self.entries();
    let Some(entry) = entries.get_mut(&key) else {
      debug!(%key, generation, "entry evicted, dropping response");
      return;
    };
    if entry.generation != generation {
      debug!(%key, generation, current = entry.generation, "superseded, dropping response");
      return;
    }

    entry.fetch = FetchPhase::Idle;
    match result {
      Ok(body) => {
        let value = body.unwrap_or(Value::Null);
        entry.tags = entry.query.provides_tags(Some(&value));
        let data = Arc::new(value);
        entry.state.send_modify(|s| {
          s.status = QueryStatus::Success;
          s.data = Some(data);
          s.error = None;
          s.fetched_at = Some(Utc::now());
        });
        debug!(%key, generation, "fetched");
      }
      Err(err) => {
        warn!(%key, generation, "fetch failed: {}", err);
        entry.state.send_modify(|s| {
          s.status = QueryStatus::Error;
          s.error = Some(err);
        });
      }
    }
  }

  async fn run_mutation(self: Arc<Self>, mutation: Mutation) -> Result<Value, ApiError> {
    mutation.validate()?;
    let request = mutation
      .request()?
      .with_user(self.session.current_user_id());

    debug!(mutation = mutation.name(), path = %request.path, "mutating");
    let body = match self.transport.execute(request).await {
      Ok(body) => body,
      Err(err) => {
        warn!(mutation = mutation.name(), "mutation failed: {}", err);
        return Err(err);
      }
    };

    let tags = mutation.invalidates_tags(body.as_ref());
    info!(mutation = mutation.name(), invalidated = tags.len(), "mutation succeeded");
    self.invalidate(&tags);
    Ok(body.unwrap_or(Value::Null))
  }

  fn invalidate(self: &Arc<Self>, tags: &[Tag]) {
    let mut entries = self.entries();
    for (key, entry) in entries.iter_mut() {
      if !intersects(tags, &entry.tags) {
        continue;
      }
      if entry.subscribers > 0 {
        debug!(%key, "invalidated, refetching");
        self.start_fetch(key, entry);
      } else {
        debug!(%key, "invalidated while unused");
        entry.stale = true;
      }
    }
  }

  fn refetch(self: &Arc<Self>, key: &QueryKey) {
    let mut entries = self.entries();
    if let Some(entry) = entries.get_mut(key) {
      self.start_fetch(key, entry);
    }
  }

  fn release(self: &Arc<Self>, key: &QueryKey) {
    let mut entries = self.entries();
    let Some(entry) = entries.get_mut(key) else {
      return;
    };

    entry.subscribers = entry.subscribers.saturating_sub(1);
    entry.epoch += 1;
    if entry.subscribers > 0 {
      return;
    }

    let delay = entry.query.keep_unused_for().unwrap_or(self.keep_unused_for);
    let epoch = entry.epoch;
    let runtime = match Handle::try_current() {
      Ok(runtime) if !delay.is_zero() => runtime,
      _ => {
        entries.remove(key);
        debug!(%key, "evicted");
        return;
      }
    };

    let inner = Arc::clone(self);
    let key = key.clone();
    runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      let mut entries = inner.entries();
      let unused = entries
        .get(&key)
        .is_some_and(|e| e.subscribers == 0 && e.epoch == epoch);
      if unused {
        entries.remove(&key);
        debug!(%key, "evicted");
      }
    });
  }
}

/// Live binding to one cache entry.
///
/// Reads are decoded into `T` on access. Dropping the subscription
/// decrements the entry's subscriber count; an in-flight fetch is not
/// cancelled.
pub struct Subscription<T> {
  inner: Arc<Inner>,
  key: QueryKey,
  rx: watch::Receiver<Snapshot>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Current state
  pub fn state(&self) -> QueryState<T> {
    self.rx.borrow().decode()
  }

  /// Wait for the next change and return it.
  ///
  /// `None` once the entry has been evicted; nothing will change after that.
  pub async fn changed(&mut self) -> Option<QueryState<T>> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().decode())
  }

  /// Wait until the entry is Success or Error.
  pub async fn settled(&mut self) -> QueryState<T> {
    loop {
      let snapshot = self.rx.borrow_and_update().clone();
      if snapshot.is_settled() {
        return snapshot.decode();
      }
      if self.rx.changed().await.is_err() {
        return self.rx.borrow().decode();
      }
    }
  }

  /// Refetch now, keeping the current data on display.
  pub fn refetch(&self) {
    self.inner.refetch(&self.key);
  }
}

impl<T> Drop for Subscription<T> {
  fn drop(&mut self) {
    self.inner.release(&self.key);
  }
}

/// Write primitive for UI code: `trigger` plus an `is_loading` flag.
#[derive(Clone)]
pub struct MutationTrigger {
  client: QueryClient,
  pending: Arc<AtomicUsize>,
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

impl MutationTrigger {
  pub fn new(client: QueryClient) -> Self {
    Self {
      client,
      pending: Arc::new(AtomicUsize::new(0)),
    }
  }

  /// Whether an invocation through this trigger is still running
  pub fn is_loading(&self) -> bool {
    self.pending.load(Ordering::SeqCst) > 0
  }

  pub async fn trigger(&self, mutation: Mutation) -> Result<Value, ApiError> {
    self.pending.fetch_add(1, Ordering::SeqCst);
    let _guard = PendingGuard(Arc::clone(&self.pending));
    self.client.mutate(mutation).await
  }

  pub async fn trigger_as<T: DeserializeOwned>(&self, mutation: Mutation) -> Result<T, ApiError> {
    let value = self.trigger(mutation).await?;
    serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{BookWithDetails, CreateBookRequest, LabelInput, Tag as LabelTag};
  use crate::cache::testing::FakeBackend;
  use crate::cache::tags::TagKind;
  use crate::session::{MemoryStorage, SqliteStorage, Storage, CURRENT_USER_KEY};

  fn client(backend: &Arc<FakeBackend>) -> QueryClient {
    QueryClient::new(backend.clone(), CurrentUserStore::in_memory())
  }

  fn client_keeping(backend: &Arc<FakeBackend>, keep_unused_for: Duration) -> QueryClient {
    QueryClient::builder(backend.clone(), CurrentUserStore::in_memory())
      .keep_unused_for(keep_unused_for)
      .build()
  }

  fn titles(books: &[BookWithDetails]) -> Vec<&str> {
    books.iter().map(|b| b.title.as_str()).collect()
  }

  fn ids(books: &[BookWithDetails]) -> Vec<i64> {
    books.iter().map(|b| b.id).collect()
  }

  #[tokio::test]
  async fn test_subscribe_fetches_and_settles() {
    let backend = FakeBackend::with_books(&["Dune", "Emma"]);
    let client = client(&backend);

    let mut books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    assert!(books.state().is_loading());

    let state = books.settled().await;
    assert!(state.is_success());
    assert_eq!(titles(state.data().unwrap()), vec!["Dune", "Emma"]);
    assert!(state.fetched_at.is_some());
  }

  #[tokio::test]
  async fn test_same_tick_subscriptions_share_one_fetch() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    let mut a = client.subscribe::<BookWithDetails>(Query::Book(1));
    let mut b = client.subscribe::<BookWithDetails>(Query::Book(1));
    a.settled().await;
    b.settled().await;

    assert_eq!(backend.calls("GET /books/1"), 1);
    assert_eq!(client.entry_count(), 1);
  }

  #[tokio::test]
  async fn test_update_refetches_only_matching_detail() {
    let backend = FakeBackend::with_books(&["a", "b", "c", "d", "e", "f"]);
    let client = client(&backend);

    let mut five = client.subscribe::<BookWithDetails>(Query::Book(5));
    let mut six = client.subscribe::<BookWithDetails>(Query::Book(6));
    five.settled().await;
    six.settled().await;

    client
      .mutate(Mutation::UpdateBook {
        id: 5,
        book: crate::api::types::UpdateBookRequest {
          title: Some("renamed".into()),
          ..Default::default()
        },
      })
      .await
      .unwrap();

    assert!(five.state().is_loading());
    assert!(six.state().is_success());

    let state = five.settled().await;
    assert_eq!(state.data().unwrap().title, "renamed");
    assert_eq!(backend.calls("GET /books/5"), 2);
    assert_eq!(backend.calls("GET /books/6"), 1);
  }

  #[tokio::test]
  async fn test_add_book_refetches_list() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    let mut books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    books.settled().await;

    let created: BookWithDetails = client
      .mutate_as(Mutation::AddBook(CreateBookRequest {
        title: "Emma".into(),
        author: "Austen".into(),
        cover_image: None,
        series: None,
        tags: vec![],
        genres: vec![],
      }))
      .await
      .unwrap();

    let state = books.settled().await;
    assert!(ids(state.data().unwrap()).contains(&created.id));
    assert_eq!(backend.calls("GET /books"), 2);
  }

  #[tokio::test]
  async fn test_failed_refetch_keeps_data() {
    let backend = FakeBackend::with_books(&["Dune", "Emma"]);
    let client = client(&backend);

    let mut books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    books.settled().await;

    backend.fail_next(ApiError::Transport("connection refused".into()));
    books.refetch();
    let state = books.settled().await;

    assert!(state.is_error());
    assert_eq!(
      state.error(),
      Some(&ApiError::Transport("connection refused".into()))
    );
    assert_eq!(titles(state.data().unwrap()), vec!["Dune", "Emma"]);
  }

  #[tokio::test]
  async fn test_failed_mutation_invalidates_nothing() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    let mut books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    books.settled().await;

    backend.fail_next(ApiError::Application {
      status: 500,
      message: "boom".into(),
    });
    let err = client.mutate(Mutation::DeleteBook(1)).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert!(books.state().is_success());
    assert_eq!(backend.calls("GET /books"), 1);
  }

  #[tokio::test]
  async fn test_delete_then_read_never_shows_deleted_book() {
    let backend = FakeBackend::with_books(&["a", "b", "c", "d"]);
    let client = client(&backend);

    let mut books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    books.settled().await;

    let response = client.mutate(Mutation::DeleteBook(3)).await.unwrap();
    assert_eq!(response, Value::Null);

    // Either loading towards the new list, or already there
    let now = books.state();
    assert!(now.is_loading() || !ids(now.data().unwrap()).contains(&3));

    let state = books.settled().await;
    assert_eq!(ids(state.data().unwrap()), vec![1, 2, 4]);
  }

  #[tokio::test]
  async fn test_late_response_does_not_overwrite_newer_one() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    // First list fetch is slow and carries the pre-write list
    backend.delay_next(Duration::from_millis(80));
    let mut books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    tokio::task::yield_now().await;

    client
      .mutate(Mutation::AddBook(CreateBookRequest {
        title: "Emma".into(),
        author: "Austen".into(),
        cover_image: None,
        series: None,
        tags: vec![],
        genres: vec![],
      }))
      .await
      .unwrap();

    let state = books.settled().await;
    assert_eq!(titles(state.data().unwrap()), vec!["Dune", "Emma"]);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(titles(books.state().data().unwrap()), vec!["Dune", "Emma"]);
    assert_eq!(backend.calls("GET /books"), 2);
  }

  #[tokio::test]
  async fn test_repeated_invalidation_before_dispatch_coalesces() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    let mut book = client.subscribe::<BookWithDetails>(Query::Book(1));
    book.settled().await;

    let tags = [Tag::id(TagKind::Book, 1)];
    client.invalidate(&tags);
    client.invalidate(&tags);
    book.settled().await;

    assert_eq!(backend.calls("GET /books/1"), 2);
  }

  #[tokio::test]
  async fn test_unsubscribed_entry_goes_stale_lazily() {
    let backend = FakeBackend::with_books(&[]);
    let client = client_keeping(&backend, Duration::from_secs(5));

    let state = client.fetch::<Vec<LabelTag>>(Query::tags(None)).await;
    assert!(state.data().unwrap().is_empty());
    assert_eq!(client.entry_count(), 1);

    let created: LabelTag = client
      .mutate_as(Mutation::CreateTag(LabelInput {
        name: "Favorites".into(),
        color: "#3b82f6".into(),
      }))
      .await
      .unwrap();
    assert_eq!(created.name, "Favorites");

    tokio::task::yield_now().await;
    assert_eq!(backend.calls("GET /tags"), 1);
    let cached = client.peek(&Query::tags(None)).unwrap();
    assert!(cached.is_success());
    assert!(cached.data().unwrap().as_array().unwrap().is_empty());

    let state = client.fetch::<Vec<LabelTag>>(Query::tags(None)).await;
    assert_eq!(backend.calls("GET /tags"), 2);
    assert_eq!(state.data().unwrap(), &vec![created]);
  }

  #[tokio::test]
  async fn test_created_tag_appears_in_subscribed_list() {
    let backend = FakeBackend::with_books(&[]);
    let client = client(&backend);

    let mut tags = client.subscribe::<Vec<LabelTag>>(Query::tags(None));
    tags.settled().await;

    let trigger = MutationTrigger::new(client.clone());
    let created: LabelTag = trigger
      .trigger_as(Mutation::CreateTag(LabelInput {
        name: "Favorites".into(),
        color: "#3b82f6".into(),
      }))
      .await
      .unwrap();
    assert!(!trigger.is_loading());
    assert!(created.id > 0);

    let state = tags.settled().await;
    assert!(state.data().unwrap().iter().any(|t| t.id == created.id));
  }

  #[tokio::test]
  async fn test_cached_entry_is_reused_within_grace() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client_keeping(&backend, Duration::from_secs(5));

    client.fetch::<BookWithDetails>(Query::Book(1)).await;
    let state = client.fetch::<BookWithDetails>(Query::Book(1)).await;

    assert_eq!(state.data().unwrap().title, "Dune");
    assert_eq!(backend.calls("GET /books/1"), 1);
  }

  #[tokio::test]
  async fn test_unused_entry_is_evicted_after_grace() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client_keeping(&backend, Duration::from_millis(20));

    client.fetch::<BookWithDetails>(Query::Book(1)).await;
    assert_eq!(client.entry_count(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(client.entry_count(), 0);
  }

  #[tokio::test]
  async fn test_resubscribe_cancels_pending_eviction() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client_keeping(&backend, Duration::from_millis(30));

    client.fetch::<BookWithDetails>(Query::Book(1)).await;
    let held = client.subscribe::<BookWithDetails>(Query::Book(1));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(client.entry_count(), 1);
    assert!(held.state().is_success());
  }

  #[tokio::test]
  async fn test_book_listing_is_evicted_at_once() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    client.fetch::<Vec<BookWithDetails>>(Query::books(None)).await;
    assert_eq!(client.entry_count(), 0);
  }

  #[tokio::test]
  async fn test_search_filters_and_blank_search_is_unfiltered() {
    let mut titles_owned: Vec<String> = (1..=24).map(|i| format!("Filler {}", i)).collect();
    titles_owned.push("Pride and Prejudice".into());
    let all: Vec<&str> = titles_owned.iter().map(String::as_str).collect();
    let backend = FakeBackend::with_books(&all);
    let client = client(&backend);

    let found = client
      .fetch::<Vec<BookWithDetails>>(Query::books(Some("Pride and Prejudice")))
      .await;
    let found = found.data().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Pride and Prejudice");

    let unfiltered = client
      .fetch::<Vec<BookWithDetails>>(Query::books(Some("")))
      .await;
    assert!(unfiltered.data().unwrap().len() > 20);
    assert_eq!(backend.last_query("GET /books"), Some(vec![]));
  }

  #[tokio::test]
  async fn test_current_user_header_is_injected() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    client.fetch::<BookWithDetails>(Query::Book(1)).await;
    assert_eq!(backend.last_user("GET /books/1"), Some(None));

    client.select_user(1).await.unwrap();
    client.mutate(Mutation::DeleteBook(1)).await.unwrap();
    assert_eq!(backend.last_user("DELETE /books/1"), Some(Some(1)));
  }

  #[tokio::test]
  async fn test_user_switch_invalidates_per_user_data() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    let mut status = client.subscribe::<Value>(Query::Statuses(1));
    status.settled().await;

    client.select_user(2).await.unwrap();
    status.settled().await;
    assert_eq!(backend.calls("GET /books/1/status"), 2);
    assert_eq!(backend.last_user("GET /books/1/status"), Some(Some(2)));

    client.logout().unwrap();
    status.settled().await;
    assert_eq!(backend.calls("GET /books/1/status"), 3);
    assert_eq!(backend.last_user("GET /books/1/status"), Some(None));
  }

  #[tokio::test]
  async fn test_selected_user_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.db");
    let backend = FakeBackend::with_books(&[]);

    {
      let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_at(&path).unwrap());
      let client = QueryClient::new(backend.clone(), CurrentUserStore::hydrate(storage.clone()));
      let user = client.select_user(1).await.unwrap();
      assert_eq!(user.id, 1);

      let raw = storage.get_item(CURRENT_USER_KEY).unwrap().unwrap();
      let stored: Value = serde_json::from_str(&raw).unwrap();
      assert_eq!(stored["id"], 1);
    }

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open_at(&path).unwrap());
    let session = CurrentUserStore::hydrate(storage);
    assert_eq!(session.current_user_id(), Some(1));
    assert_eq!(session.current().unwrap().name, "user 1");
  }

  #[tokio::test]
  async fn test_invalid_rating_never_reaches_network() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = QueryClient::new(
      backend.clone(),
      CurrentUserStore::hydrate(Arc::new(MemoryStorage::new())),
    );

    let err = client
      .mutate(Mutation::UpsertRating {
        book_id: 1,
        rating: 4.2,
      })
      .await
      .unwrap_err();

    assert!(matches!(err, ApiError::InvalidRequest(_)));
    assert_eq!(backend.calls("POST /books/1/ratings"), 0);
  }

  #[tokio::test]
  async fn test_error_entry_retries_on_resubscribe() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client_keeping(&backend, Duration::from_secs(5));

    backend.fail_next(ApiError::Timeout(Duration::from_secs(1)));
    let state = client.fetch::<BookWithDetails>(Query::Book(1)).await;
    assert!(state.error().unwrap().is_timeout());

    let state = client.fetch::<BookWithDetails>(Query::Book(1)).await;
    assert!(state.is_success());
    assert_eq!(backend.calls("GET /books/1"), 2);
  }

  #[tokio::test]
  async fn test_response_for_evicted_entry_never_reaches_its_replacement() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    // Slow first fetch carries the pre-write list
    backend.delay_next(Duration::from_millis(80));
    let books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    tokio::task::yield_now().await;
    drop(books);
    assert_eq!(client.entry_count(), 0);

    client
      .mutate(Mutation::AddBook(CreateBookRequest {
        title: "Emma".into(),
        author: "Austen".into(),
        cover_image: None,
        series: None,
        tags: vec![],
        genres: vec![],
      }))
      .await
      .unwrap();

    let mut books = client.subscribe::<Vec<BookWithDetails>>(Query::books(None));
    let state = books.settled().await;
    assert_eq!(titles(state.data().unwrap()), vec!["Dune", "Emma"]);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let state = books.state();
    assert!(state.is_success());
    assert_eq!(titles(state.data().unwrap()), vec!["Dune", "Emma"]);
  }

  #[tokio::test]
  async fn test_changed_reports_each_transition() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    let mut book = client.subscribe::<BookWithDetails>(Query::Book(1));
    book.settled().await;

    client.invalidate(&[Tag::id(TagKind::Book, 1)]);
    let loading = book.changed().await.unwrap();
    assert!(loading.is_loading());
    assert_eq!(loading.data().unwrap().title, "Dune");

    let done = book.changed().await.unwrap();
    assert!(done.is_success());
    assert_eq!(backend.calls("GET /books/1"), 2);
  }

  #[tokio::test]
  async fn test_equivalent_filters_share_one_entry() {
    let backend = FakeBackend::with_books(&[]);
    let client = client(&backend);

    let mut padded = client.subscribe::<Vec<LabelTag>>(Query::tags(Some(" fav ")));
    let mut trimmed = client.subscribe::<Vec<LabelTag>>(Query::tags(Some("fav")));
    assert_eq!(padded.key(), trimmed.key());
    assert_eq!(client.entry_count(), 1);

    let mut blank = client.subscribe::<Vec<LabelTag>>(Query::tags(Some("   ")));
    let mut none = client.subscribe::<Vec<LabelTag>>(Query::tags(None));
    assert_eq!(client.entry_count(), 2);

    padded.settled().await;
    trimmed.settled().await;
    blank.settled().await;
    none.settled().await;
    assert_eq!(backend.calls("GET /tags"), 2);
  }

  #[tokio::test]
  async fn test_mismatched_type_is_parse_error_for_that_subscriber_only() {
    let backend = FakeBackend::with_books(&["Dune"]);
    let client = client(&backend);

    let mut wrong = client.subscribe::<Vec<BookWithDetails>>(Query::Book(1));
    let state = wrong.settled().await;
    assert!(matches!(state.error(), Some(ApiError::Parse(_))));
    assert!(state.data().is_none());

    assert!(client.peek(&Query::Book(1)).unwrap().is_success());
    let right = client.subscribe::<BookWithDetails>(Query::Book(1));
    assert_eq!(right.state().data().unwrap().title, "Dune");
    assert_eq!(backend.calls("GET /books/1"), 1);
  }

  #[test]
  fn test_builder_sets_grace_before_sharing() {
    let backend = FakeBackend::with_books(&[]);
    let client = client_keeping(&backend, Duration::from_millis(250));
    let clone = client.clone();
    assert_eq!(clone.inner.keep_unused_for, Duration::from_millis(250));
    assert_eq!(
      QueryClient::new(backend.clone(), CurrentUserStore::in_memory())
        .inner
        .keep_unused_for,
      DEFAULT_KEEP_UNUSED_FOR
    );
  }
}
