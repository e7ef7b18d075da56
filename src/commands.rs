//! Command-line front end over the query client.
//!
//! Reads subscribe, wait for the first settled state and print JSON. Writes
//! go through a `MutationTrigger` so tag invalidation runs as it would in UI
//! code.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;

use crate::api::endpoints::{Mutation, Query};
use crate::api::types::{
  BookWithDetails, Genre, JournalEntry, LabelInput, ListWithBooks, Rating, ReadingStatus, Tag,
  User,
};
use crate::cache::{MutationTrigger, QueryClient};

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// List books, optionally filtered by title
  Books {
    #[arg(short, long)]
    search: Option<String>,
  },
  /// Show one book
  Book { id: i64 },
  /// List journal entries, optionally for one book
  Journals {
    #[arg(short, long)]
    book: Option<i64>,
  },
  /// List tags, optionally filtered by name
  Tags {
    #[arg(short, long)]
    name: Option<String>,
  },
  /// Create a tag
  AddTag {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "#6b7280")]
    color: String,
  },
  /// Delete a tag
  DeleteTag { id: i64 },
  /// List genres, optionally filtered by name
  Genres {
    #[arg(short, long)]
    name: Option<String>,
  },
  /// List reading lists
  Lists,
  /// Show one reading list
  List { id: i64 },
  /// List users
  Users,
  /// Select the current user
  Login { id: i64 },
  /// Show the current user
  Whoami,
  /// Forget the current user
  Logout,
  /// Rate a book as the current user (0 to 5 in half steps)
  Rate { book: i64, rating: f64 },
  /// Show the current user's reading status of a book
  Status { book: i64 },
}

/// Run `command`, writing its JSON result to `out`.
pub async fn run(client: &QueryClient, command: Command, out: &mut impl Write) -> Result<()> {
  match command {
    Command::Books { search } => {
      read::<Vec<BookWithDetails>>(client, Query::books(search.as_deref()), out).await
    }
    Command::Book { id } => read::<BookWithDetails>(client, Query::Book(id), out).await,
    Command::Journals { book } => {
      let query = match book {
        Some(book_id) => Query::BookJournals(book_id),
        None => Query::Journals,
      };
      read::<Vec<JournalEntry>>(client, query, out).await
    }
    Command::Tags { name } => read::<Vec<Tag>>(client, Query::tags(name.as_deref()), out).await,
    Command::AddTag { name, color } => {
      let tag: Tag = write(client, Mutation::CreateTag(LabelInput { name, color })).await?;
      print(out, &tag)
    }
    Command::DeleteTag { id } => {
      write::<serde_json::Value>(client, Mutation::DeleteTag(id)).await?;
      writeln!(out, "deleted tag {}", id).map_err(|e| eyre!("Failed to write output: {}", e))
    }
    Command::Genres { name } => {
      read::<Vec<Genre>>(client, Query::genres(name.as_deref()), out).await
    }
    Command::Lists => read::<Vec<ListWithBooks>>(client, Query::Lists, out).await,
    Command::List { id } => read::<ListWithBooks>(client, Query::List(id), out).await,
    Command::Users => read::<Vec<User>>(client, Query::Users, out).await,
    Command::Login { id } => {
      let user = client.select_user(id).await?;
      print(out, &user)
    }
    Command::Whoami => print(out, &client.session().current()),
    Command::Logout => {
      client.logout()?;
      writeln!(out, "logged out").map_err(|e| eyre!("Failed to write output: {}", e))
    }
    Command::Rate { book, rating } => {
      if client.session().current_user_id().is_none() {
        return Err(eyre!("Failed to rate book {}: no user selected", book));
      }
      let rating: Rating = write(
        client,
        Mutation::UpsertRating {
          book_id: book,
          rating,
        },
      )
      .await?;
      print(out, &rating)
    }
    Command::Status { book } => {
      read::<Option<ReadingStatus>>(client, Query::Statuses(book), out).await
    }
  }
}

async fn read<T>(client: &QueryClient, query: Query, out: &mut impl Write) -> Result<()>
where
  T: DeserializeOwned + Serialize,
{
  let key = query.key();
  let state = client.fetch::<T>(query).await;
  if let Some(err) = state.error() {
    return Err(eyre!("Failed to load {}: {}", key, err));
  }
  match state.data() {
    Some(data) => print(out, data),
    None => Err(eyre!("Failed to load {}: no data", key)),
  }
}

async fn write<T: DeserializeOwned>(client: &QueryClient, mutation: Mutation) -> Result<T> {
  let name = mutation.name();
  let trigger = MutationTrigger::new(client.clone());
  trigger
    .trigger_as(mutation)
    .await
    .map_err(|e| eyre!("Failed to {}: {}", name.replace('_', " "), e))
}

fn print<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  writeln!(out, "{}", json).map_err(|e| eyre!("Failed to write output: {}", e))
}
