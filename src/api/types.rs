//! Serde models for the library backend.
//!
//! Timestamps stay as the server's strings; the client never does date math.

use serde::{Deserialize, Serialize};

/// Book as returned by `/books` and `/books/:id`, with the current user's
/// reading status and the attached tags and genres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookWithDetails {
  pub id: i64,
  #[serde(default)]
  pub user_id: Option<i64>,
  pub title: String,
  #[serde(default)]
  pub author: String,
  #[serde(default)]
  pub cover_image: Option<String>,
  #[serde(default)]
  pub rating: Option<f64>,
  #[serde(default)]
  pub series: Option<String>,
  #[serde(default)]
  pub status_name: Option<String>,
  #[serde(default)]
  pub tags: Vec<Tag>,
  #[serde(default)]
  pub genres: Vec<Genre>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBookRequest {
  pub title: String,
  pub author: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cover_image: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub series: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<i64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub genres: Vec<i64>,
}

/// Partial update: absent fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBookRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub author: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cover_image: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub series: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tags: Option<Vec<i64>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub genres: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
  pub id: i64,
  pub book_id: i64,
  #[serde(default)]
  pub user_id: Option<i64>,
  pub title: String,
  pub content: String,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
  pub title: String,
  pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateJournalRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
  pub id: i64,
  #[serde(default)]
  pub user_id: Option<i64>,
  pub name: String,
  pub color: String,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
  pub id: i64,
  pub name: String,
  pub color: String,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

/// Body for creating or renaming a tag or genre
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelInput {
  pub name: String,
  pub color: String,
}

/// A selectable library user. Also the persisted current-user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub name: String,
  #[serde(alias = "avatar_color")]
  pub color: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub avatar_image: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateUserRequest {
  pub name: String,
  pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
  pub id: i64,
  pub user_id: i64,
  pub book_id: i64,
  pub rating: Option<f64>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingStatus {
  pub id: i64,
  pub user_id: i64,
  pub book_id: i64,
  pub status_id: i64,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookInList {
  pub id: i64,
  #[serde(default)]
  pub cover_image: Option<String>,
  #[serde(default)]
  pub status_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListUser {
  pub id: i64,
  pub name: String,
  pub color: String,
  #[serde(default)]
  pub avatar_image: Option<String>,
}

/// Ordered, user-curated list of books
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListWithBooks {
  pub id: i64,
  pub user_id: i64,
  pub type_id: i64,
  pub name: String,
  #[serde(default)]
  pub books: Vec<BookInList>,
  pub user: ListUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateListRequest {
  pub type_id: i64,
  pub name: String,
  /// Book ids in list order
  pub books: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateListRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub type_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub books: Option<Vec<i64>>,
}
