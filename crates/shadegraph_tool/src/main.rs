// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shadegraph command-line driver.
//!
//! Builds, inspects, evaluates and re-saves graph files with the built-in
//! node library. Logging goes through `tracing`; set `RUST_LOG` to change
//! the level.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shadegraph_graph::config::CONFIG_FILE_NAME;
use shadegraph_graph::{Session, SessionConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "shadegraph")]
#[command(version, about = "Build, inspect and evaluate shader graph files", long_about = None)]
struct Cli {
    /// Session settings (RON)
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample graph
    Demo {
        /// Output file
        file: PathBuf,
    },
    /// Print the nodes, sockets and links of a graph
    Inspect {
        /// Graph file
        file: PathBuf,
    },
    /// Evaluate an output of a root-level node
    Eval {
        /// Graph file
        file: PathBuf,
        /// Index of the node in the root space
        #[arg(short, long)]
        node: usize,
        /// Index of the output on that node
        #[arg(short, long, default_value_t = 0)]
        output: usize,
    },
    /// Load a graph and save it again
    Resave {
        /// Graph file to read
        input: PathBuf,
        /// File to write
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shadegraph=info,shadegraph_graph=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();
    let config = SessionConfig::load(&config)
        .with_context(|| format!("Failed to read settings from {}", config.display()))?;
    let session = Session::new(config);

    tracing::debug!("Starting shadegraph v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Demo { file } => {
            commands::demo(&session, &file)?;
            println!("Wrote {}", file.display());
        }
        Commands::Inspect { file } => {
            let mut stdout = std::io::stdout().lock();
            commands::inspect(&session, &file, &mut stdout)?;
        }
        Commands::Eval { file, node, output } => {
            let (value, statistics) = commands::eval(&session, &file, node, output)?;
            println!("{}", commands::format_property(&value));
            println!(
                "cache: {} hits, {} misses, {} computations, {} invalidations",
                statistics.hits, statistics.misses, statistics.computations, statistics.invalidations
            );
        }
        Commands::Resave { input, output } => {
            let report = commands::resave(&session, &input, &output)?;
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}
