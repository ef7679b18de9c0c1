use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use frontdesk::cache::ValueCache;
use frontdesk::config::{Config, LoggingConfig};
use frontdesk::hotel::{Bill, Client, Collection, Reservation, Room};
use frontdesk::netcache::{NetRequest, RoutePolicy};
use frontdesk::remote::HttpRemote;
use frontdesk::store::{Record, SqliteKeyValueStore};
use frontdesk::sync::SyncEngine;
use frontdesk::worker::{ComputeWorker, OperationKind};

type Engine = SyncEngine<SqliteKeyValueStore>;

#[derive(Parser, Debug)]
#[command(name = "frontdesk")]
#[command(about = "Offline-first data tools for the hotel front desk")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/frontdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print a collection, merged with the remote when reachable
  Load { collection: Collection },
  /// Save a JSON record and print its id
  Save { collection: Collection, json: String },
  /// Delete a record locally
  Delete { collection: Collection, id: String },
  /// Retry queued remote writes (all collections if none given)
  Flush { collections: Vec<Collection> },
  /// List ids still waiting for remote confirmation
  Pending { collection: Collection },
  /// Run one compute operation on a JSON file
  Compute {
    #[arg(value_enum)]
    operation: OperationKind,
    file: PathBuf,
  },
  /// Show which caching strategy serves a request
  Route { method: String, url: String },
}

fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
  // RUST_LOG controls the level, e.g. RUST_LOG=frontdesk=debug
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let (file_layer, guard) = match &logging.directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "frontdesk.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr))
    .with(file_layer)
    .with(filter)
    .init();
  guard
}

fn open_engine(config: &Config) -> Result<Engine> {
  let storage = match &config.storage.path {
    Some(path) => SqliteKeyValueStore::open_at(path)?,
    None => SqliteKeyValueStore::open()?,
  };
  let remote = HttpRemote::new(&config.remote)?;
  let cache = Arc::new(ValueCache::from_config(&config.cache));
  Ok(SyncEngine::new(storage, Arc::new(remote)).with_cache(cache))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

async fn load<T: Record>(engine: &Engine) -> Result<()> {
  let records: Vec<T> = engine.load().await?;
  print_json(&records)
}

async fn save<T: Record>(engine: &Engine, json: &str) -> Result<()> {
  let record: T = serde_json::from_str(json)
    .map_err(|e| eyre!("Invalid {} record: {}", T::collection(), e))?;
  let id = engine.save(record)?;
  engine.settle().await;
  println!("{}", id);
  Ok(())
}

fn delete<T: Record>(engine: &Engine, id: &str) -> Result<()> {
  if engine.delete::<T>(id)? {
    println!("deleted {}", id);
  } else {
    println!("no {} record with id {}", T::collection(), id);
  }
  Ok(())
}

async fn compute(config: &Config, operation: OperationKind, file: &Path) -> Result<()> {
  let contents = std::fs::read_to_string(file)
    .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
  let data: Value = serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse {}: {}", file.display(), e))?;

  let mut worker = ComputeWorker::new(&config.worker).spawn()?;
  for response in worker.call(operation, data).await? {
    print_json(&response)?;
  }
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_tracing(&config.logging);
  info!("frontdesk starting");

  match args.command {
    Command::Load { collection } => {
      let engine = open_engine(&config)?;
      match collection {
        Collection::Rooms => load::<Room>(&engine).await,
        Collection::Clients => load::<Client>(&engine).await,
        Collection::Reservations => load::<Reservation>(&engine).await,
        Collection::Bills => load::<Bill>(&engine).await,
      }
    }
    Command::Save { collection, json } => {
      let engine = open_engine(&config)?;
      match collection {
        Collection::Rooms => save::<Room>(&engine, &json).await,
        Collection::Clients => save::<Client>(&engine, &json).await,
        Collection::Reservations => save::<Reservation>(&engine, &json).await,
        Collection::Bills => save::<Bill>(&engine, &json).await,
      }
    }
    Command::Delete { collection, id } => {
      let engine = open_engine(&config)?;
      match collection {
        Collection::Rooms => delete::<Room>(&engine, &id),
        Collection::Clients => delete::<Client>(&engine, &id),
        Collection::Reservations => delete::<Reservation>(&engine, &id),
        Collection::Bills => delete::<Bill>(&engine, &id),
      }
    }
    Command::Flush { collections } => {
      let engine = open_engine(&config)?;
      let collections = if collections.is_empty() {
        Collection::ALL.to_vec()
      } else {
        collections
      };
      for collection in collections {
        let report = engine.flush_outbox(collection.name()).await?;
        println!(
          "{}: sent {}, failed {}",
          collection.name(),
          report.sent,
          report.failed
        );
      }
      Ok(())
    }
    Command::Pending { collection } => {
      let engine = open_engine(&config)?;
      for id in engine.pending(collection.name())? {
        println!("{}", id);
      }
      Ok(())
    }
    Command::Compute { operation, file } => compute(&config, operation, &file).await,
    Command::Route { method, url } => {
      let request = NetRequest::parse(&method, &url)?;
      let policy = RoutePolicy::new(&config.network);
      println!("{}", policy.classify(&request).as_str());
      Ok(())
    }
  }
}
