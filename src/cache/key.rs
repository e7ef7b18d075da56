//! Cache slot identity for query descriptors.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Resource families the engine knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
  Books,
  Book,
  Journals,
  Journal,
  BookJournals,
  Tags,
  Tag,
  Genres,
  Genre,
  Users,
  Lists,
  List,
  Ratings,
  Statuses,
}

impl ResourceKind {
  pub fn name(self) -> &'static str {
    match self {
      Self::Books => "books",
      Self::Book => "book",
      Self::Journals => "journals",
      Self::Journal => "journal",
      Self::BookJournals => "book_journals",
      Self::Tags => "tags",
      Self::Tag => "tag",
      Self::Genres => "genres",
      Self::Genre => "genre",
      Self::Users => "users",
      Self::Lists => "lists",
      Self::List => "list",
      Self::Ratings => "ratings",
      Self::Statuses => "statuses",
    }
  }
}

/// Identity of one cache slot: the resource kind plus a canonical rendering
/// of the descriptor arguments.
///
/// Arguments are rendered through `serde_json::Value`, whose maps are ordered
/// by key, so structurally equal arguments always produce the same slot
/// regardless of field order. Absent arguments and `null` are the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  kind: ResourceKind,
  args: String,
}

impl QueryKey {
  pub fn new<A: Serialize>(kind: ResourceKind, args: &A) -> Self {
    let value = serde_json::to_value(args).unwrap_or(Value::Null);
    Self::from_value(kind, value)
  }

  pub fn from_value(kind: ResourceKind, args: Value) -> Self {
    Self {
      kind,
      args: canonicalize(args).to_string(),
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.args == "null" {
      write!(f, "{}", self.kind.name())
    } else {
      write!(f, "{}({})", self.kind.name(), self.args)
    }
  }
}

/// Drop `null` members and collapse empty objects to `null`, so `{}`,
/// `{"search": null}` and no arguments at all name the same slot.
fn canonicalize(value: Value) -> Value {
  match value {
    Value::Object(map) => {
      let map: serde_json::Map<String, Value> = map
        .into_iter()
        .map(|(k, v)| (k, canonicalize(v)))
        .filter(|(_, v)| !v.is_null())
        .collect();
      if map.is_empty() {
        Value::Null
      } else {
        Value::Object(map)
      }
    }
    Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
    other => other,
  }
}
