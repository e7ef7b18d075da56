use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use libris::api::ApiClient;
use libris::cache::QueryClient;
use libris::commands::{self, Command};
use libris::config::Config;
use libris::logging;
use libris::session::{CurrentUserStore, SqliteStorage};

#[derive(Parser, Debug)]
#[command(name = "libris")]
#[command(about = "Command line for a personal library tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/libris/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = match logging::default_log_dir().and_then(|dir| logging::init(&dir)) {
    Ok(guard) => Some(guard),
    Err(e) => {
      eprintln!("logging disabled: {}", e);
      None
    }
  };
  info!("starting libris");

  let storage = SqliteStorage::open_at(&config.storage.resolved_path()?)?;
  let session = CurrentUserStore::hydrate(Arc::new(storage));
  debug!(user_id = ?session.current_user_id(), "restored session");

  let transport = ApiClient::new(&config.api)?;
  info!(base_url = %transport.base_url(), "using API");
  let client = QueryClient::builder(Arc::new(transport), session)
    .keep_unused_for(config.cache.keep_unused_for())
    .build();

  let mut stdout = std::io::stdout().lock();
  commands::run(&client, args.command, &mut stdout).await?;

  Ok(())
}
