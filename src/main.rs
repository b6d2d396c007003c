//! MYDB engine command line

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser as ClapParser, Subcommand};
use mydb::config::{parse_memory, DbConfig, DEFAULT_MEMORY};
use mydb::Database;
use std::path::PathBuf;

/// MYDB - a transactional storage engine
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty database file set
    Create(Target),
    /// Open a database, recovering it if needed, then close it cleanly
    Open(Target),
}

#[derive(ClapArgs, Debug)]
struct Target {
    /// Base path of the file set (`<path>.xid`, `<path>.db`, `<path>.log`)
    #[arg(short, long)]
    path: PathBuf,

    /// Page cache budget, e.g. 64MB
    #[arg(short, long)]
    mem: Option<String>,
}

impl Target {
    fn config(&self) -> Result<DbConfig> {
        let memory = match &self.mem {
            Some(text) => {
                parse_memory(text).ok_or_else(|| anyhow!("Invalid memory size: {}", text))?
            }
            None => DEFAULT_MEMORY,
        };
        Ok(DbConfig::new(&self.path).with_memory(memory))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Command::Create(target) => {
            let config = target.config()?;
            let db = Database::create(&config).context("Failed to create database")?;
            db.close().context("Failed to close database")?;
            println!("Created database at {}", config.path.display());
        }
        Command::Open(target) => {
            let config = target.config()?;
            let db = Database::open(&config).context("Failed to open database")?;
            println!(
                "Opened database at {} ({} transactions on record)",
                config.path.display(),
                db.tm().xid_count()
            );
            db.close().context("Failed to close database")?;
        }
    }

    Ok(())
}
