//! Invalidation tags connecting mutations to the queries they make stale.

use std::fmt;

/// Entity family a tag refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKind {
  Book,
  Journal,
  Tag,
  Genre,
  User,
  List,
  Rating,
  Status,
}

/// Discriminator narrowing a tag to part of its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagId {
  /// A single entity by server id
  Id(i64),
  /// Every collection query of the family
  List,
  /// Entities hanging off one book (journals, ratings, statuses)
  OfBook(i64),
}

/// Dependency label. Never persisted or sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
  pub kind: TagKind,
  pub id: Option<TagId>,
}

impl Tag {
  pub const fn kind(kind: TagKind) -> Self {
    Self { kind, id: None }
  }

  pub const fn id(kind: TagKind, id: i64) -> Self {
    Self {
      kind,
      id: Some(TagId::Id(id)),
    }
  }

  pub const fn list(kind: TagKind) -> Self {
    Self {
      kind,
      id: Some(TagId::List),
    }
  }

  pub const fn of_book(kind: TagKind, book_id: i64) -> Self {
    Self {
      kind,
      id: Some(TagId::OfBook(book_id)),
    }
  }

  /// Whether invalidating `self` makes an entry that provided `provided` stale.
  ///
  /// A bare kind matches every tag of that kind; a tag with an id matches
  /// only the identical tag.
  pub fn invalidates(&self, provided: &Tag) -> bool {
    self.kind == provided.kind && (self.id.is_none() || self.id == provided.id)
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.id {
      None => write!(f, "{:?}", self.kind),
      Some(TagId::Id(id)) => write!(f, "{:?}:{}", self.kind, id),
      Some(TagId::List) => write!(f, "{:?}:LIST", self.kind),
      Some(TagId::OfBook(id)) => write!(f, "{:?}:book-{}", self.kind, id),
    }
  }
}

/// Whether any tag in `invalidated` hits any tag in `provided`.
pub fn intersects(invalidated: &[Tag], provided: &[Tag]) -> bool {
  invalidated
    .iter()
    .any(|inv| provided.iter().any(|p| inv.invalidates(p)))
}
