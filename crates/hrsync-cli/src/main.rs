//! # hrsync CLI
//!
//! Synchronization experiments on networks of Hindmarsh-Rose neurons.
//!
//! # Commands
//!
//! - `run`: integrate a coupled network, detect spikes, write results
//! - `grid`: build a 2-D lattice coupling graph file
//! - `model`: print model constants and the default configuration
//!
//! Exit status is 0 on success, 1 for I/O and unexpected failures, 2 for
//! configuration errors and 3 when storage cannot be reserved.

use clap::{Parser, Subcommand};
use colored::Colorize;
use hrsync_core::{ErrorKind, HrsyncError};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod run;

use config::SimulationConfig;

#[derive(Parser)]
#[command(name = "hrsync")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Hindmarsh-Rose neuron network synchronization", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Integrate a coupled network and analyse its spikes
    Run(run::RunArgs),

    /// Write a rows x columns grid coupling graph
    Grid {
        /// Number of rows
        rows: usize,
        /// Number of columns
        columns: usize,
        /// Weight of every lattice edge, normally <= 1
        strength: f64,
        /// Destination file (default: Graph/<rows>x<columns>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show model constants and the default configuration
    Model,
}

/// Process exit status for a failed command
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<HrsyncError>().map(HrsyncError::kind) {
        Some(ErrorKind::Configuration) => 2,
        Some(ErrorKind::Resource) => 3,
        Some(ErrorKind::Io) | None => 1,
    }
}

fn grid(rows: usize, columns: usize, strength: f64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(|| hrsync_io::default_grid_path(rows, columns));
    let graph = hrsync_io::grid_graph(rows, columns, strength)?;
    hrsync_io::write_graph(&path, &graph)?;
    println!("{} {}", "Graph has been saved to:".green().bold(), path.display());
    Ok(())
}

fn model() -> anyhow::Result<()> {
    println!("{}", "Hindmarsh-Rose neuron".green().bold());
    println!("  dx/dt = y - x^3 + 3x^2 - z + I - sum_j w_ij (x_i - x_j)");
    println!("  dy/dt = 1 - 5x^2 - y");
    println!("  dz/dt = r (s_i (x - x_R) - z)");
    println!();
    println!("  {} = {}", "x_R".cyan(), hrsync_hindmarsh::X_REST);
    println!("  {} = {}", "r".cyan(), hrsync_hindmarsh::R);
    println!("  {} = {}", "I".cyan(), hrsync_hindmarsh::CURRENT);
    println!();
    println!("{}", "Default configuration:".green().bold());
    println!("{}", serde_json::to_string_pretty(&SimulationConfig::default())?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run::execute(args).map(|_| ()),
        Commands::Grid {
            rows,
            columns,
            strength,
            output,
        } => grid(rows, columns, strength, output),
        Commands::Model => model(),
    };

    if let Err(err) = result {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(exit_code_for(&err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "hrsync",
            "run",
            "--x-end",
            "800",
            "--method",
            "euler",
            "--initial",
            "-1.6,4,2",
            "--s",
            "4",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.x_end, Some(800.0));
                assert_eq!(args.method, Some(run::MethodArg::Euler));
                assert_eq!(args.initial, Some(vec![-1.6, 4.0, 2.0]));
                assert_eq!(args.s, Some(4.0));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_exit_codes() {
        let config: anyhow::Error = HrsyncError::Configuration("bad".into()).into();
        assert_eq!(exit_code_for(&config), 2);

        let resource = Err::<(), _>(HrsyncError::ResourceExhausted("big".into()))
            .context("integration failed")
            .unwrap_err();
        assert_eq!(exit_code_for(&resource), 3);

        let disk = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let io: anyhow::Error = HrsyncError::IoError(disk).into();
        assert_eq!(exit_code_for(&io), 1);

        assert_eq!(exit_code_for(&anyhow::anyhow!("unexpected")), 1);
    }

    #[test]
    fn test_grid_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Graph").join("2x2");
        grid(2, 2, 0.5, Some(path.clone())).unwrap();

        let graph = hrsync_io::read_graph(&path).unwrap();
        assert_eq!(graph.vertex_count(), 4);
        assert_eq!(graph.weight(0, 1), 0.5);
        assert_eq!(graph.weight(0, 3), 0.0);
    }
}
