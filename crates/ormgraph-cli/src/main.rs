//! ormgraph command-line tools.
//!
//! Provides the `ormgraph` binary, working from a JSON schema file:
//! - `explain` prints the SQL a loader runs for one entity or hierarchy
//! - `load` loads graphs by id from a SQLite database and prints them as JSON
//!
//! Logs go to stderr so stdout stays machine-readable.

use std::process;

use clap::{Parser, Subcommand};

use ormgraph_core::Id;
use ormgraph_storage::{Registry, SqliteExecutor};

/// Graph persistence tools.
#[derive(Parser)]
#[command(name = "ormgraph", about = "Inspect and load ormgraph entity graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the SQL run to load an entity.
    Explain {
        /// Path to the JSON schema file.
        #[arg(short, long)]
        schema: String,

        /// Entity or hierarchy name.
        #[arg(short, long)]
        entity: String,
    },
    /// Load entities by id and print their graphs as JSON.
    Load {
        /// Path to the JSON schema file.
        #[arg(short, long)]
        schema: String,

        /// Path to the SQLite database file.
        #[arg(short, long)]
        db: String,

        /// Entity or hierarchy name.
        #[arg(short, long)]
        entity: String,

        /// Identifier to load; repeat for several. Integers are bound as
        /// integers, anything else as text.
        #[arg(short, long = "id", required = true)]
        ids: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Explain { schema, entity } => run_explain(&schema, &entity),
        Commands::Load {
            schema,
            db,
            entity,
            ids,
        } => run_load(&schema, &db, &entity, &ids),
    };
    process::exit(exit_code);
}

/// Read and build the registry of a schema file.
///
/// Exit code on failure: 1 = invalid schema, 3 = I/O error.
fn open_registry(path: &str) -> Result<Registry, i32> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read schema '{}': {}", path, e);
        3
    })?;
    Registry::from_json(&json).map_err(|e| {
        eprintln!("Error: invalid schema '{}': {}", path, e);
        1
    })
}

/// Execute the explain subcommand.
///
/// Returns exit code: 0 = success, 1 = schema error, 3 = I/O error.
fn run_explain(schema_path: &str, entity: &str) -> i32 {
    let registry = match open_registry(schema_path) {
        Ok(r) => r,
        Err(code) => return code,
    };
    match registry.get(entity) {
        Ok(loader) => {
            println!("{}", loader.explain());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// Execute the load subcommand.
///
/// Returns exit code: 0 = success, 1 = schema error, 2 = load error,
/// 3 = I/O error.
fn run_load(schema_path: &str, db_path: &str, entity: &str, ids: &[String]) -> i32 {
    let registry = match open_registry(schema_path) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let loader = match registry.get(entity) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let exec = match SqliteExecutor::new(db_path) {
        Ok(exec) => exec,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", db_path, e);
            return 3;
        }
    };

    let ids: Vec<Id> = ids.iter().map(|raw| parse_id(raw)).collect();
    let loaded = match loader.select(&exec, &ids) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", entity, e);
            return 2;
        }
    };
    tracing::info!(entity, requested = ids.len(), loaded = loaded.len(), "load complete");

    let graphs = serde_json::Value::Array(loaded.iter().map(|e| e.to_json()).collect());
    let json = serde_json::to_string_pretty(&graphs)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
    0
}

/// Parse a command-line identifier: integer when it parses as one.
fn parse_id(raw: &str) -> Id {
    match raw.parse::<i64>() {
        Ok(n) => Id::from(n),
        Err(_) => Id::from(raw),
    }
}
