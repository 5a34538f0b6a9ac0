//! entistore CLI
//!
//! Command-line access to an embedded entity store.

use clap::{Parser, Subcommand};
use entistore_core::config::MEMORY_LOCATION;
use entistore_core::{default_log_level, init_logging, LogTarget, Location, StoreConfig};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "entistore")]
#[command(about = "entistore - transactional entity storage on embedded SQLite", long_about = None)]
struct Cli {
    /// Database file path, or `:memory:`
    #[arg(long, env = "ENTISTORE_DB", default_value = MEMORY_LOCATION, global = true)]
    db: String,

    /// Pooled connections for file databases
    #[arg(long, default_value_t = 4, global = true)]
    pool_size: u32,

    /// Absolute directory for rolling log files; logs go to stderr otherwise
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Store and read back a greeting on a worker thread
    Hello,
    /// Register an entity type: name:kind[:required][:unique]...
    Define(commands::DefineArgs),
    /// List registered entity types
    Types,
    /// Create an entity from field=value pairs
    Create(commands::WriteArgs),
    /// Print one entity
    Get(commands::IdArgs),
    /// Replace named fields of one entity
    Update(commands::UpdateArgs),
    /// Delete one entity (no error when absent)
    Delete(commands::IdArgs),
    /// List entities in ascending id order
    List(commands::ListArgs),
    /// Print the core crate version
    Version,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Commands::Version = cli.command {
        println!("entistore_core version={}", entistore_core::core_version());
        return Ok(());
    }

    let (target, fallback_level) = match cli.log_dir.as_deref() {
        Some(dir) => (LogTarget::directory(dir)?, default_log_level()),
        None => (LogTarget::Stderr, "warn"),
    };
    init_logging(cli.log_level.as_deref().unwrap_or(fallback_level), target)?;

    let config = match Location::parse(&cli.db) {
        Location::Memory => StoreConfig::in_memory(),
        Location::File(path) => StoreConfig::file(path).with_pool_size(cli.pool_size),
    };
    let db = entistore_core::Database::open(&config)?;

    match cli.command {
        Commands::Hello => commands::hello(&db),
        Commands::Define(args) => commands::define(&db, args),
        Commands::Types => commands::types(&db),
        Commands::Create(args) => commands::create(&db, args),
        Commands::Get(args) => commands::get(&db, args),
        Commands::Update(args) => commands::update(&db, args),
        Commands::Delete(args) => commands::delete(&db, args),
        Commands::List(args) => commands::list(&db, args),
        Commands::Version => Ok(()),
    }
}
