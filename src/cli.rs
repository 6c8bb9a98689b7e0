//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Cascading task orchestrator
#[derive(Parser, Debug)]
#[command(name = "cascade")]
#[command(version)]
#[command(about = "Drive work through intake, specification, synthesis and execution tiers")]
#[command(
    long_about = "Each tier runs in its own short-lived worker with a deadline. Validation gates stop risky output, any failure tears down the whole cascade, and completed cascades leave work items under a deterministic cascade key."
)]
pub struct Cli {
    /// Configuration file (falls back to $CASCADE_CONFIG, then built-in defaults)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// What a cascade produces.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Epic,
    Assessment,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a cascade and wait for its outcome
    Run {
        /// Repository name
        #[arg(long)]
        repo: String,

        /// Branch name
        #[arg(long)]
        branch: String,

        /// Kind of work item to produce
        #[arg(long, value_enum, default_value_t = TargetKind::Epic)]
        kind: TargetKind,

        /// Work item id (no '-')
        #[arg(long)]
        id: String,

        /// Work item name
        #[arg(long)]
        name: String,

        /// Tier 0 payload as inline JSON
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// Tier 0 payload read from a JSON file
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },

    /// List every indexed work item key
    Keys,

    /// Show a work item
    Show {
        /// Cascade key
        key: String,
    },

    /// Mirror work items into the issue tracker
    Sync,

    /// Tear down the cascade a worker belongs to
    Cleanup {
        /// Worker id, e.g. 01J...-tier2
        worker_id: String,
    },

    /// Delete expired state
    Purge,

    /// Split a cascade key into its components
    ParseKey {
        /// Cascade key
        key: String,
    },
}
