//! Declarative endpoint tables.
//!
//! Every read and write the client can issue is a variant here. Each variant
//! knows its HTTP request, the tags it provides (queries) or invalidates
//! (mutations), and nothing else; the engine in `cache::store` is driven
//! purely by these tables.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::api::types::{
  CreateBookRequest, CreateListRequest, LabelInput, NewJournalEntry, UpdateBookRequest,
  UpdateJournalRequest, UpdateListRequest, UpdateUserRequest,
};
use crate::cache::{ApiRequest, QueryKey, ResourceKind, Tag, TagKind};
use crate::error::ApiError;

/// Read descriptor. One variant per cached resource kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  Books { search: Option<String> },
  Book(i64),
  Journals,
  Journal(i64),
  BookJournals(i64),
  Tags { name: Option<String> },
  Tag(i64),
  Genres { name: Option<String> },
  Genre(i64),
  Users,
  Lists,
  List(i64),
  /// Current user's rating of a book
  Ratings(i64),
  /// Current user's reading status of a book
  Statuses(i64),
}

/// Trimmed filter term, or `None` when it is empty or whitespace.
///
/// Used for both slot identity and the wire format, so `""`, `"  "` and no
/// term at all are the same unfiltered query.
fn filter_term(term: &Option<String>) -> Option<&str> {
  term.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

impl Query {
  pub fn books(search: Option<&str>) -> Self {
    Self::Books {
      search: search.map(String::from),
    }
  }

  pub fn tags(name: Option<&str>) -> Self {
    Self::Tags {
      name: name.map(String::from),
    }
  }

  pub fn genres(name: Option<&str>) -> Self {
    Self::Genres {
      name: name.map(String::from),
    }
  }

  pub fn kind(&self) -> ResourceKind {
    match self {
      Self::Books { .. } => ResourceKind::Books,
      Self::Book(_) => ResourceKind::Book,
      Self::Journals => ResourceKind::Journals,
      Self::Journal(_) => ResourceKind::Journal,
      Self::BookJournals(_) => ResourceKind::BookJournals,
      Self::Tags { .. } => ResourceKind::Tags,
      Self::Tag(_) => ResourceKind::Tag,
      Self::Genres { .. } => ResourceKind::Genres,
      Self::Genre(_) => ResourceKind::Genre,
      Self::Users => ResourceKind::Users,
      Self::Lists => ResourceKind::Lists,
      Self::List(_) => ResourceKind::List,
      Self::Ratings(_) => ResourceKind::Ratings,
      Self::Statuses(_) => ResourceKind::Statuses,
    }
  }

  pub fn key(&self) -> QueryKey {
    let args = match self {
      Self::Books { search } => json!({ "search": filter_term(search) }),
      Self::Tags { name } | Self::Genres { name } => json!({ "name": filter_term(name) }),
      Self::Book(id)
      | Self::Journal(id)
      | Self::BookJournals(id)
      | Self::Tag(id)
      | Self::Genre(id)
      | Self::List(id)
      | Self::Ratings(id)
      | Self::Statuses(id) => json!(id),
      Self::Journals | Self::Users | Self::Lists => Value::Null,
    };
    QueryKey::from_value(self.kind(), args)
  }

  pub fn request(&self) -> ApiRequest {
    match self {
      Self::Books { search } => with_filter(ApiRequest::get("/books"), "search", search),
      Self::Book(id) => ApiRequest::get(format!("/books/{}", id)),
      Self::Journals => ApiRequest::get("/journals"),
      Self::Journal(id) => ApiRequest::get(format!("/journals/{}", id)),
      Self::BookJournals(book_id) => ApiRequest::get(format!("/books/{}/journals", book_id)),
      Self::Tags { name } => with_filter(ApiRequest::get("/tags"), "name", name),
      Self::Tag(id) => ApiRequest::get(format!("/tags/{}", id)),
      Self::Genres { name } => with_filter(ApiRequest::get("/genres"), "name", name),
      Self::Genre(id) => ApiRequest::get(format!("/genres/{}", id)),
      Self::Users => ApiRequest::get("/users"),
      Self::Lists => ApiRequest::get("/lists"),
      Self::List(id) => ApiRequest::get(format!("/lists/{}", id)),
      Self::Ratings(book_id) => ApiRequest::get(format!("/books/{}/ratings", book_id)),
      Self::Statuses(book_id) => ApiRequest::get(format!("/books/{}/status", book_id)),
    }
  }

  /// Tags this query's data depends on.
  ///
  /// The argument-derived part is fixed for the query; collection queries
  /// also tag every item id found in `response`.
  pub fn provides_tags(&self, response: Option<&Value>) -> Vec<Tag> {
    match self {
      Self::Books { .. } => collection(TagKind::Book, response),
      Self::Book(id) => vec![Tag::kind(TagKind::Book), Tag::id(TagKind::Book, *id)],
      Self::Journals => collection(TagKind::Journal, response),
      Self::Journal(id) => vec![Tag::id(TagKind::Journal, *id)],
      Self::BookJournals(book_id) => {
        let mut tags = vec![Tag::of_book(TagKind::Journal, *book_id)];
        tags.extend(item_ids(TagKind::Journal, response));
        tags
      }
      Self::Tags { .. } => collection(TagKind::Tag, response),
      Self::Tag(id) => vec![Tag::id(TagKind::Tag, *id)],
      Self::Genres { .. } => collection(TagKind::Genre, response),
      Self::Genre(id) => vec![Tag::id(TagKind::Genre, *id)],
      Self::Users => {
        let mut tags = vec![Tag::kind(TagKind::User)];
        tags.extend(item_ids(TagKind::User, response));
        tags
      }
      Self::Lists => collection(TagKind::List, response),
      Self::List(id) => vec![Tag::id(TagKind::List, *id)],
      Self::Ratings(book_id) => vec![Tag::of_book(TagKind::Rating, *book_id)],
      Self::Statuses(book_id) => vec![Tag::of_book(TagKind::Status, *book_id)],
    }
  }

  /// How long an entry with no subscribers survives, when it differs from the
  /// client default. Book listings are search-keyed and never reused.
  pub fn keep_unused_for(&self) -> Option<Duration> {
    match self {
      Self::Books { .. } => Some(Duration::ZERO),
      _ => None,
    }
  }
}

fn with_filter(request: ApiRequest, name: &'static str, term: &Option<String>) -> ApiRequest {
  match filter_term(term) {
    Some(term) => request.with_query(name, term),
    None => request,
  }
}

fn collection(kind: TagKind, response: Option<&Value>) -> Vec<Tag> {
  let mut tags = vec![Tag::kind(kind), Tag::list(kind)];
  tags.extend(item_ids(kind, response));
  tags
}

fn item_ids(kind: TagKind, response: Option<&Value>) -> impl Iterator<Item = Tag> + '_ {
  response
    .and_then(Value::as_array)
    .into_iter()
    .flatten()
    .filter_map(|item| item.get("id").and_then(Value::as_i64))
    .map(move |id| Tag::id(kind, id))
}

/// Write descriptor. Never cached; each invocation is independent.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
  AddBook(CreateBookRequest),
  UpdateBook { id: i64, book: UpdateBookRequest },
  DeleteBook(i64),
  AddJournalEntry { book_id: i64, entry: NewJournalEntry },
  UpdateJournalEntry { book_id: i64, id: i64, entry: UpdateJournalRequest },
  CreateTag(LabelInput),
  UpdateTag { id: i64, tag: LabelInput },
  DeleteTag(i64),
  CreateGenre(LabelInput),
  UpdateGenre { id: i64, genre: LabelInput },
  DeleteGenre(i64),
  SelectUser(i64),
  UpdateUser { id: i64, user: UpdateUserRequest },
  UpsertRating { book_id: i64, rating: f64 },
  DeleteRating(i64),
  UpsertStatus { book_id: i64, status_id: i64 },
  DeleteStatus(i64),
  CreateList(CreateListRequest),
  UpdateList { id: i64, list: UpdateListRequest },
  DeleteList(i64),
}

impl Mutation {
  pub fn name(&self) -> &'static str {
    match self {
      Self::AddBook(_) => "add_book",
      Self::UpdateBook { .. } => "update_book",
      Self::DeleteBook(_) => "delete_book",
      Self::AddJournalEntry { .. } => "add_journal_entry",
      Self::UpdateJournalEntry { .. } => "update_journal_entry",
      Self::CreateTag(_) => "create_tag",
      Self::UpdateTag { .. } => "update_tag",
      Self::DeleteTag(_) => "delete_tag",
      Self::CreateGenre(_) => "create_genre",
      Self::UpdateGenre { .. } => "update_genre",
      Self::DeleteGenre(_) => "delete_genre",
      Self::SelectUser(_) => "select_user",
      Self::UpdateUser { .. } => "update_user",
      Self::UpsertRating { .. } => "upsert_rating",
      Self::DeleteRating(_) => "delete_rating",
      Self::UpsertStatus { .. } => "upsert_status",
      Self::DeleteStatus(_) => "delete_status",
      Self::CreateList(_) => "create_list",
      Self::UpdateList { .. } => "update_list",
      Self::DeleteList(_) => "delete_list",
    }
  }

  /// Local checks the backend would reject anyway
  pub fn validate(&self) -> Result<(), ApiError> {
    match self {
      Self::UpsertRating { rating, .. } => {
        if !(0.0..=5.0).contains(rating) {
          return Err(ApiError::InvalidRequest(format!(
            "rating {} is outside 0 to 5",
            rating
          )));
        }
        if (rating * 2.0).fract() != 0.0 {
          return Err(ApiError::InvalidRequest(format!(
            "rating {} is not a half-star step",
            rating
          )));
        }
        Ok(())
      }
      Self::CreateTag(label) | Self::CreateGenre(label) if label.name.trim().is_empty() => {
        Err(ApiError::InvalidRequest("name must not be empty".to_string()))
      }
      _ => Ok(()),
    }
  }

  pub fn request(&self) -> Result<ApiRequest, ApiError> {
    let request = match self {
      Self::AddBook(book) => ApiRequest::post("/books", body(book)?),
      Self::UpdateBook { id, book } => ApiRequest::put(format!("/books/{}", id), body(book)?),
      Self::DeleteBook(id) => ApiRequest::delete(format!("/books/{}", id)),
      Self::AddJournalEntry { book_id, entry } => {
        ApiRequest::post(format!("/books/{}/journals", book_id), body(entry)?)
      }
      Self::UpdateJournalEntry { book_id, id, entry } => ApiRequest::put(
        format!("/books/{}/journals/{}", book_id, id),
        body(entry)?,
      ),
      Self::CreateTag(tag) => ApiRequest::post("/tags", body(tag)?),
      Self::UpdateTag { id, tag } => ApiRequest::put(format!("/tags/{}", id), body(tag)?),
      Self::DeleteTag(id) => ApiRequest::delete(format!("/tags/{}", id)),
      Self::CreateGenre(genre) => ApiRequest::post("/genres", body(genre)?),
      Self::UpdateGenre { id, genre } => {
        ApiRequest::put(format!("/genres/{}", id), body(genre)?)
      }
      Self::DeleteGenre(id) => ApiRequest::delete(format!("/genres/{}", id)),
      Self::SelectUser(id) => ApiRequest::post("/users/select", json!({ "id": id })),
      Self::UpdateUser { id, user } => ApiRequest::put(format!("/users/{}", id), body(user)?),
      Self::UpsertRating { book_id, rating } => ApiRequest::post(
        format!("/books/{}/ratings", book_id),
        json!({ "rating": rating }),
      ),
      Self::DeleteRating(book_id) => ApiRequest::delete(format!("/books/{}/ratings", book_id)),
      Self::UpsertStatus { book_id, status_id } => ApiRequest::post(
        format!("/books/{}/status", book_id),
        json!({ "status_id": status_id }),
      ),
      Self::DeleteStatus(book_id) => ApiRequest::delete(format!("/books/{}/status", book_id)),
      Self::CreateList(list) => ApiRequest::post("/lists", body(list)?),
      Self::UpdateList { id, list } => ApiRequest::put(format!("/lists/{}", id), body(list)?),
      Self::DeleteList(id) => ApiRequest::delete(format!("/lists/{}", id)),
    };
    Ok(request)
  }

  /// Tags made stale once this write has succeeded.
  pub fn invalidates_tags(&self, _response: Option<&Value>) -> Vec<Tag> {
    match self {
      Self::AddBook(_) => vec![Tag::kind(TagKind::Book)],
      Self::UpdateBook { id, .. } => {
        vec![Tag::id(TagKind::Book, *id), Tag::list(TagKind::Book)]
      }
      Self::DeleteBook(id) => vec![
        Tag::id(TagKind::Book, *id),
        Tag::list(TagKind::Book),
        Tag::of_book(TagKind::Journal, *id),
        Tag::kind(TagKind::List),
      ],
      Self::AddJournalEntry { book_id, .. } => vec![
        Tag::of_book(TagKind::Journal, *book_id),
        Tag::list(TagKind::Journal),
        Tag::id(TagKind::Book, *book_id),
      ],
      Self::UpdateJournalEntry { book_id, id, .. } => vec![
        Tag::id(TagKind::Journal, *id),
        Tag::of_book(TagKind::Journal, *book_id),
        Tag::list(TagKind::Journal),
      ],
      Self::CreateTag(_) => vec![Tag::kind(TagKind::Tag)],
      Self::UpdateTag { id, .. } | Self::DeleteTag(id) => vec![
        Tag::id(TagKind::Tag, *id),
        Tag::kind(TagKind::Tag),
        Tag::list(TagKind::Book),
      ],
      Self::CreateGenre(_) => vec![Tag::kind(TagKind::Genre)],
      Self::UpdateGenre { id, .. } | Self::DeleteGenre(id) => vec![
        Tag::id(TagKind::Genre, *id),
        Tag::kind(TagKind::Genre),
        Tag::list(TagKind::Book),
      ],
      Self::SelectUser(_) | Self::UpdateUser { .. } => vec![Tag::kind(TagKind::User)],
      Self::UpsertRating { book_id, .. } | Self::DeleteRating(book_id) => vec![
        Tag::of_book(TagKind::Rating, *book_id),
        Tag::id(TagKind::Book, *book_id),
        Tag::list(TagKind::Book),
      ],
      Self::UpsertStatus { book_id, .. } | Self::DeleteStatus(book_id) => vec![
        Tag::of_book(TagKind::Status, *book_id),
        Tag::id(TagKind::Book, *book_id),
        Tag::list(TagKind::Book),
      ],
      Self::CreateList(_) => vec![Tag::list(TagKind::List)],
      Self::UpdateList { id, .. } | Self::DeleteList(id) => {
        vec![Tag::id(TagKind::List, *id), Tag::list(TagKind::List)]
      }
    }
  }
}

/// Tags whose data is scoped by the `currentUserId` header
pub const PER_USER_TAGS: [Tag; 5] = [
  Tag::kind(TagKind::User),
  Tag::kind(TagKind::Book),
  Tag::kind(TagKind::Rating),
  Tag::kind(TagKind::Status),
  Tag::kind(TagKind::List),
];

fn body<T: Serialize>(value: &T) -> Result<Value, ApiError> {
  serde_json::to_value(value).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}
