//! gridorm command-line client
//!
//! Generates migration files and applies or rolls them back against a
//! database.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// gridorm migration tool
#[derive(Parser, Debug)]
#[command(name = "gridorm")]
#[command(version, about = "gridorm migration tool")]
pub struct Args {
    /// Root directory holding database files
    #[arg(long, global = true, default_value = ".gridorm")]
    pub data_dir: PathBuf,

    /// Log more detail (repeat for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new migration file after the current last migration
    Generate {
        /// Migration name
        name: String,
        /// Directory holding migration files
        #[arg(long, default_value = gridorm_core::migration::DEFAULT_DIRECTORY)]
        directory: PathBuf,
    },
    /// Apply pending migrations
    Migrate {
        /// Instance name
        instance: String,
        /// Database name
        database: String,
        /// Directory holding migration files
        #[arg(long, default_value = gridorm_core::migration::DEFAULT_DIRECTORY)]
        directory: PathBuf,
        /// Stop after this migration
        #[arg(long)]
        target: Option<String>,
    },
    /// Roll back applied migrations down to and including NAME
    Rollback {
        /// Migration id to roll back to
        name: String,
        /// Instance name
        instance: String,
        /// Database name
        database: String,
        /// Directory holding migration files
        #[arg(long, default_value = gridorm_core::migration::DEFAULT_DIRECTORY)]
        directory: PathBuf,
    },
    /// List migrations and whether each is applied
    Showmigrations {
        /// Instance name
        instance: String,
        /// Database name
        database: String,
        /// Directory holding migration files
        #[arg(long, default_value = gridorm_core::migration::DEFAULT_DIRECTORY)]
        directory: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "gridorm=info,gridorm_core=info",
        1 => "gridorm=debug,gridorm_core=debug",
        _ => "gridorm=trace,gridorm_core=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match commands::run(&args) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
