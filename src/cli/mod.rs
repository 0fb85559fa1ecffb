//! CLI module for cloud-storage
//!
//! Provides subcommands for exercising a configured backend:
//! - `probe`: round-trips a blob, a table entity and a queue message

pub mod probe;

use clap::{Parser, Subcommand};

/// Cloud storage - Blob, table and queue providers behind one builder
#[derive(Parser)]
#[command(name = "cloud-storage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Round-trip a value through every provider of the selected backend
    Probe(probe::ProbeArgs),
}
