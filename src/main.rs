//! Sonicstore CLI - inspect and edit a store file from the command line

use clap::{Parser, Subcommand};
use crossbeam::channel::Receiver;
use owo_colors::OwoColorize;
use sonicstore::config;
use sonicstore::ui::{self, Icons, TableBuilder};
use sonicstore::{
    ChangeBus, Collection, ContentValues, Database, Filter, RecordStore, ResourceUri, Row,
    SortOrder,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sonicstore")]
#[command(version)]
#[command(about = "Local store for queued uploads and cached track metadata")]
#[command(long_about = r#"
Sonicstore keeps two collections in a single SQLite file and addresses them
by identifier:
  uploads      every queued upload
  uploads/<id> one upload
  tracks       every cached track
  tracks/<id>  one cached track

Example usage:
  sonicstore insert uploads --set title=demo.mp3 --set path=/sdcard/demo.mp3
  sonicstore query uploads/1
  sonicstore update uploads/1 --set status=uploading
  sonicstore delete uploads --where "status = ?" --arg done
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Path to the database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a row into a collection
    Insert {
        /// Collection identifier (`uploads` or `tracks`)
        uri: String,

        /// Field assignment, repeatable
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
    },

    /// List rows of a collection or a single row
    Query {
        /// Resource identifier
        uri: String,

        /// Columns to show, comma separated
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Filter clause with `?` placeholders
        #[arg(short = 'w', long = "where", value_name = "CLAUSE")]
        filter: Option<String>,

        /// Filter parameter, repeatable, in placeholder order
        #[arg(short, long = "arg", value_name = "VALUE")]
        args: Vec<String>,

        /// Sort order, e.g. "title DESC, _id"
        #[arg(long)]
        sort: Option<String>,
    },

    /// Update a single row
    Update {
        /// Item identifier (`uploads/<id>` or `tracks/<id>`)
        uri: String,

        /// Field assignment, repeatable
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,

        /// Filter clause with `?` placeholders
        #[arg(short = 'w', long = "where", value_name = "CLAUSE")]
        filter: Option<String>,

        /// Filter parameter, repeatable
        #[arg(short, long = "arg", value_name = "VALUE")]
        args: Vec<String>,
    },

    /// Delete a row or matching rows of a collection
    Delete {
        /// Resource identifier
        uri: String,

        /// Filter clause with `?` placeholders
        #[arg(short = 'w', long = "where", value_name = "CLAUSE")]
        filter: Option<String>,

        /// Filter parameter, repeatable
        #[arg(short, long = "arg", value_name = "VALUE")]
        args: Vec<String>,
    },

    /// Show the type marker of an identifier
    Type {
        /// Resource identifier
        uri: String,
    },

    /// Show schema version and row counts
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    fn is_human(&self) -> bool {
        *self == OutputMode::Human
    }
}

fn emit_success(mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        let out = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    }
    Ok(())
}

fn parse_assignments(uri: &str, set: &[String]) -> anyhow::Result<ContentValues> {
    let collection = ResourceUri::parse(uri)?.target().collection();
    let mut pairs = Vec::with_capacity(set.len());
    for assignment in set {
        let Some(pair) = assignment.split_once('=') else {
            anyhow::bail!("expected FIELD=VALUE, got '{}'", assignment);
        };
        pairs.push(pair);
    }
    Ok(collection.coerce_values(pairs)?)
}

fn parse_filter(filter: Option<String>, args: Vec<String>) -> Option<Filter> {
    match filter {
        Some(clause) => Some(Filter::sql(clause, args)),
        None => {
            if !args.is_empty() {
                tracing::warn!("--arg given without --where; ignoring {} parameter(s)", args.len());
            }
            None
        }
    }
}

/// Receivers for every change in either collection
fn watch_all(bus: &ChangeBus) -> Vec<Receiver<ResourceUri>> {
    Collection::all()
        .iter()
        .map(|c| bus.subscribe(ResourceUri::collection(*c), true))
        .collect()
}

fn drain_changes(receivers: &[Receiver<ResourceUri>]) -> Vec<ResourceUri> {
    receivers.iter().flat_map(|rx| rx.try_iter()).collect()
}

fn report_changes(mode: OutputMode, changes: &[ResourceUri]) {
    if mode.is_human() {
        for uri in changes {
            ui::change(uri);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };

    if let Err(e) = run(cli, mode) {
        if mode.is_human() {
            ui::error(&e.to_string());
        } else {
            let out = serde_json::json!({ "ok": false, "error": e.to_string() });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli, mode: OutputMode) -> anyhow::Result<()> {
    // no store needed
    if let Commands::Type { uri } = &cli.command {
        let marker = sonicstore::uri::get_type(uri)?;
        if mode.is_human() {
            ui::info(uri, marker);
        }
        return emit_success(mode, "type", serde_json::json!({ "uri": uri, "type": marker }));
    }

    let settings = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    let database = settings.database_path(cli.database.as_deref(), &std::env::current_dir()?);
    config::ensure_db_dir(&database)?;

    let bus = Arc::new(ChangeBus::new());
    let receivers = watch_all(&bus);
    let db = Database::open_with(&database, settings.store.clone())?;
    let store = RecordStore::with_notifier(db, bus.clone());

    match cli.command {
        Commands::Insert { uri, set } => {
            let values = parse_assignments(&uri, &set)?;
            let created = store.insert(&uri, &values)?;
            let changes = drain_changes(&receivers);

            if mode.is_human() {
                ui::success(&format!("{} Inserted {}", Icons::NEW, created));
                report_changes(mode, &changes);
            }
            emit_success(
                mode,
                "insert",
                serde_json::json!({ "uri": created, "changes": changes }),
            )?;
        }

        Commands::Query { uri, columns, filter, args, sort } => {
            let projection: Vec<&str> = columns.iter().map(String::as_str).collect();
            let projection = (!projection.is_empty()).then_some(projection.as_slice());
            let sort = sort.as_deref().map(SortOrder::parse).transpose()?;

            let cursor = store.query(&uri, projection, parse_filter(filter, args), sort.as_ref())?;
            let columns = cursor.columns().to_vec();
            let rows: Vec<Row> = cursor.collect::<sonicstore::Result<_>>()?;

            if mode.is_human() {
                if rows.is_empty() {
                    println!("{} No rows for {}.", Icons::CROSS, uri);
                } else {
                    println!("{}", ui::rows_table(&columns, &rows));
                    println!("{}", ui::dim(&format!("{} row(s)", rows.len())));
                }
            }
            emit_success(mode, "query", serde_json::json!({ "uri": uri, "rows": rows }))?;
        }

        Commands::Update { uri, set, filter, args } => {
            let values = parse_assignments(&uri, &set)?;
            let count = store.update(&uri, &values, parse_filter(filter, args))?;
            let changes = drain_changes(&receivers);

            if mode.is_human() {
                ui::success(&format!("{} Updated {} row(s) of {}", Icons::MOD, count, uri));
                report_changes(mode, &changes);
            }
            emit_success(
                mode,
                "update",
                serde_json::json!({ "uri": uri, "count": count, "changes": changes }),
            )?;
        }

        Commands::Delete { uri, filter, args } => {
            let count = store.delete(&uri, parse_filter(filter, args))?;
            let changes = drain_changes(&receivers);

            if mode.is_human() {
                ui::success(&format!("{} Deleted {} row(s) of {}", Icons::DEL, count, uri));
                report_changes(mode, &changes);
            }
            emit_success(
                mode,
                "delete",
                serde_json::json!({ "uri": uri, "count": count, "changes": changes }),
            )?;
        }

        Commands::Info => {
            let db = store.database();
            let version = db.version()?;
            let mut counts = serde_json::Map::new();
            for collection in Collection::all() {
                counts.insert(
                    collection.to_string(),
                    serde_json::Value::from(db.count_rows(*collection)?),
                );
            }

            if mode.is_human() {
                ui::header(
                    Icons::STATS,
                    &format!("Sonicstore {}", env!("CARGO_PKG_VERSION").bold()),
                );
                ui::info(&format!("{} Database", Icons::DATABASE), &database.display().to_string());
                let mut table = TableBuilder::new();
                table.add_row("schema version", &version.to_string());
                table.add_row("page size", &db.options().page_size.to_string());
                for (name, count) in &counts {
                    table.add_row(name, &count.to_string());
                }
                println!("{}", table.build());
            }
            emit_success(
                mode,
                "info",
                serde_json::json!({
                    "database": database.display().to_string(),
                    "schema_version": version,
                    "rows": counts,
                }),
            )?;
        }

        Commands::Type { .. } => unreachable!("handled before opening the store"),
    }

    Ok(())
}
