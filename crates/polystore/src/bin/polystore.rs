//! Polystore command line client
//!
//! Runs single key-value or document operations against any registered
//! driver, addressed by connection string or by a name from the config file.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use tracing::info;

use polystore::{Config, Document, DriverRegistry, Filter, KeyValueOptions, Record, Relation, Value};
use polystore_common::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "polystore")]
#[command(author, version, about = "Polystore - uniform key-value and document store client", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, env = "POLYSTORE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Key-value operations
    Kv {
        /// Connection string or configured connection name
        connection: String,

        /// Driver options as a JSON object, e.g. '{"KeyName":"id"}'
        #[arg(short, long)]
        options: Option<String>,

        #[command(subcommand)]
        action: KvAction,
    },

    /// Document operations
    Doc {
        /// Connection string or configured connection name
        connection: String,

        /// Collection to operate on
        #[arg(short = 'C', long)]
        collection: String,

        #[command(subcommand)]
        action: DocAction,
    },
}

#[derive(Subcommand)]
enum KvAction {
    Get { key: String },
    Put { key: String, value: String },
    Remove { key: String },
    Has { key: String },
    /// List records according to the options
    List,
    /// Write one chunk of a value to stdout
    Chunk {
        key: String,
        #[arg(long)]
        size: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
}

#[derive(Subcommand)]
enum DocAction {
    /// Documents matching every `field=value` clause
    Find {
        #[arg(long = "where")]
        clauses: Vec<String>,
    },
    Get { id: String },
    Delete { id: String },
    /// Set `field=value` pairs on every matching document
    Update {
        #[arg(long = "where")]
        clauses: Vec<String>,
        #[arg(long = "set", required = true)]
        fields: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = Config::default();
            config.apply_env();
            config
        }
    };
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Kv {
            connection,
            options,
            action,
        } => {
            let uri = config.connection(&connection)?;
            let options = match options {
                Some(json) => KeyValueOptions::from_json(serde_json::from_str(&json).context("parsing --options")?)?,
                None => KeyValueOptions::default(),
            };
            info!(action = kv_action_name(&action), "running key-value command");
            run_kv(uri, &config, &options, action).await
        }
        Commands::Doc {
            connection,
            collection,
            action,
        } => {
            let uri = config.connection(&connection)?;
            run_doc(uri, &config, &collection, action).await
        }
    }
}

async fn run_kv(uri: &str, config: &Config, options: &KeyValueOptions, action: KvAction) -> Result<()> {
    let store = DriverRegistry::shared().open_key_value(uri, config).await?;
    match action {
        KvAction::Get { key } => {
            let value = store.get(&parse_value(&key), options).await?;
            print_json(&value)?;
        }
        KvAction::Put { key, value } => {
            store.put(&parse_value(&key), parse_value(&value), options).await?;
        }
        KvAction::Remove { key } => store.remove(&parse_value(&key), options).await?,
        KvAction::Has { key } => {
            let found = store.has(&parse_value(&key), options).await?;
            print_json(&found)?;
        }
        KvAction::List => {
            let mut records = store.iter(options)?;
            while let Some(record) = records.try_next().await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        KvAction::Chunk { key, size, offset } => {
            let chunk = store.get_chunk(&parse_value(&key), options, size, offset).await?;
            std::io::stdout().lock().write_all(&chunk)?;
        }
    }
    Ok(())
}

async fn run_doc(uri: &str, config: &Config, collection: &str, action: DocAction) -> Result<()> {
    let store = DriverRegistry::shared().open_document(uri, config).await?;
    let collection = Some(collection);
    match action {
        DocAction::Find { clauses } => {
            let documents = store.get_documents(&parse_filter(&clauses)?, collection).await?;
            print_json(&documents)?;
        }
        DocAction::Get { id } => {
            let document: Option<Document> = store.get_document_by_id(&id, collection).await?;
            print_json(&document)?;
        }
        DocAction::Delete { id } => {
            let deleted = store.delete_document_by_id(&id, collection).await?;
            print_json(&deleted)?;
        }
        DocAction::Update { clauses, fields } => {
            let mut data = Record::new();
            for pair in &fields {
                let (field, value) = split_pair(pair)?;
                data.insert(field.to_string(), parse_value(value));
            }
            let updated = store
                .update_documents(&parse_filter(&clauses)?, data, collection)
                .await?;
            print_json(&updated)?;
        }
    }
    Ok(())
}

fn kv_action_name(action: &KvAction) -> &'static str {
    match action {
        KvAction::Get { .. } => "get",
        KvAction::Put { .. } => "put",
        KvAction::Remove { .. } => "remove",
        KvAction::Has { .. } => "has",
        KvAction::List => "list",
        KvAction::Chunk { .. } => "chunk",
    }
}

/// JSON literals keep their type; anything else is a string.
fn parse_value(text: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(text).map_or_else(|_| Value::from(text), Value::from)
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    pair.split_once('=')
        .filter(|(field, _)| !field.is_empty())
        .with_context(|| format!("expected field=value, got '{pair}'"))
}

fn parse_filter(clauses: &[String]) -> Result<Filter> {
    let mut filter = Filter::new();
    for clause in clauses {
        let (field, value) = split_pair(clause)?;
        filter = filter.and(field, Relation::Equal, parse_value(value));
    }
    Ok(filter)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
