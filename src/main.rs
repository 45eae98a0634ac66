//! CinderDB operator CLI.
//!
//! Opens one engine instance, performs a single operation, and closes the
//! engine (flushing any volatile state) before exit. Exits non-zero on any
//! error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cinderdb::{open_engine, Engine, EngineKind, Error, Result};

#[derive(Parser)]
#[command(name = "cinderdb")]
#[command(version)]
#[command(about = "Single-node key/value store with log, hash, and sstable engines")]
struct Cli {
    /// Path to the database file (log, hash) or directory (sstable).
    #[arg(long)]
    file: PathBuf,

    /// The storage engine to use.
    #[arg(long = "type", default_value = "log")]
    engine: EngineKind,

    /// The operation to perform.
    #[arg(long)]
    op: Op,

    /// The key for the operation.
    #[arg(long)]
    key: Option<String>,

    /// The value for a write operation.
    #[arg(long)]
    value: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Op {
    Read,
    Write,
    Delete,
    Compact,
    Flush,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let engine = open_engine(cli.engine, &cli.file)?;
    let result = dispatch(cli, engine.as_ref());
    // Close even when the operation failed; for the sstable engine this
    // flushes the memtable.
    let closed = engine.close();
    result?;
    closed
}

fn dispatch(cli: &Cli, engine: &dyn Engine) -> Result<()> {
    match cli.op {
        Op::Write => {
            let key = require(&cli.key, "write requires --key")?;
            let value = require(&cli.value, "write requires --value")?;
            engine.write(key, value)?;
            println!("Write successful.");
        }
        Op::Read => {
            let key = require(&cli.key, "read requires --key")?;
            let value = engine.read(key)?;
            println!("{value}");
        }
        Op::Delete => {
            let key = require(&cli.key, "delete requires --key")?;
            engine.delete(key)?;
            println!("Delete successful.");
        }
        Op::Compact => {
            engine.compact()?;
            println!("Compact successful.");
        }
        Op::Flush => {
            engine.flush()?;
            println!("Flush successful.");
        }
    }
    Ok(())
}

fn require<'a>(arg: &'a Option<String>, message: &str) -> Result<&'a str> {
    arg.as_deref()
        .ok_or_else(|| Error::InvalidInput(message.to_string()))
}
