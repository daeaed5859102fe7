//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// userop - reconcile declared users into a persistence backend
#[derive(Parser, Debug)]
#[command(name = "userop")]
#[command(version)]
#[command(about = "Reconcile declared users into a SurrealDB-backed store")]
#[command(
    long_about = "userop reads declared users from a YAML manifest, runs bounded reconciliation passes against the configured database, and writes the observed status back to the manifest."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every resource in a manifest
    Reconcile {
        /// YAML manifest of resources; statuses are written back in place
        #[arg(short, long)]
        manifest: PathBuf,

        /// TOML or JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum passes per resource while a pass asks for an immediate requeue
        #[arg(long, default_value_t = 5)]
        max_passes: usize,
    },

    /// Define the users table and its indexes
    InitSchema {
        /// TOML or JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show a backend record by id
    Get {
        /// Backend record id
        backend_id: String,

        /// TOML or JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reconcile() {
        let cli = Cli::try_parse_from([
            "userop",
            "reconcile",
            "--manifest",
            "users.yaml",
            "--max-passes",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Reconcile {
                manifest,
                config,
                max_passes,
            } => {
                assert_eq!(manifest, PathBuf::from("users.yaml"));
                assert!(config.is_none());
                assert_eq!(max_passes, 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_get() {
        let cli = Cli::try_parse_from(["userop", "get", "abc", "-c", "userop.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Get { ref backend_id, config: Some(_) } if backend_id == "abc"
        ));
    }

    #[test]
    fn test_reconcile_requires_manifest() {
        assert!(Cli::try_parse_from(["userop", "reconcile"]).is_err());
    }
}
