//! Tcapflow CLI - inspection tool for TCAP programs.
//!
//! Parses, validates, and explains TCAP text without running it: the
//! statements, the producer/consumer graph, the physical plan a server would
//! run, and the stages of a single pipeline.

mod commands;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// TCAP program inspection tool.
///
/// Reads a TCAP program from a file (or `-` for stdin) and reports on its
/// structure.
#[derive(Parser)]
#[command(name = "tcapflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    /// Suppress progress and info messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

/// Output format options.
#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table format (default for TTY)
    #[default]
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the atomic computations of a program
    Parse {
        /// Path to the TCAP program
        file: PathBuf,
    },

    /// Check that a program parses and every tuple set is consumed
    Validate {
        /// Path to the TCAP program
        file: PathBuf,
    },

    /// Show scan sources, the producer/consumer graph, and optionally the
    /// physical plan
    Explain {
        /// Path to the TCAP program
        file: PathBuf,

        /// Also plan the program into job stages
        #[arg(long)]
        physical: bool,

        /// Set sizes for the planner, as a JSON list of
        /// `{db, set, num_bytes, num_pages}`
        #[arg(long, requires = "physical")]
        stats: Option<PathBuf>,

        /// Engine configuration for the planner, as JSON
        #[arg(long, requires = "physical")]
        config: Option<PathBuf>,

        /// Database for intermediate sets
        #[arg(long, default_value = "job")]
        job_id: String,
    },

    /// Show the stages of the pipeline over a path of tuple sets
    Pipeline {
        /// Path to the TCAP program
        file: PathBuf,

        /// Computation consuming the last tuple set
        #[arg(long, short)]
        target: String,

        /// Tuple sets, source first
        #[arg(required = true)]
        path: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else if !cli.quiet {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match cli.command {
        Commands::Parse { file } => commands::parse::run(&file, cli.format, cli.quiet),
        Commands::Validate { file } => commands::validate::run(&file, cli.format, cli.quiet),
        Commands::Explain {
            file,
            physical,
            stats,
            config,
            job_id,
        } => commands::explain::run(
            &file,
            commands::explain::PlanOptions {
                physical,
                stats: stats.as_deref(),
                config: config.as_deref(),
                job_id: &job_id,
            },
            cli.format,
            cli.quiet,
        ),
        Commands::Pipeline { file, target, path } => {
            commands::pipeline::run(&file, &target, &path, cli.format, cli.quiet)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_belongs_to_explain() {
        let cli = Cli::try_parse_from([
            "tcapflow", "explain", "prog.tcap", "--physical", "--config", "engine.json",
        ])
        .unwrap();
        let Commands::Explain { config, .. } = cli.command else {
            panic!("expected explain");
        };
        assert_eq!(config, Some(PathBuf::from("engine.json")));

        // Other commands do not plan, so they take no configuration.
        assert!(
            Cli::try_parse_from(["tcapflow", "validate", "prog.tcap", "--config", "engine.json"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["tcapflow", "explain", "prog.tcap", "--config", "engine.json"])
                .is_err()
        );
    }
}
