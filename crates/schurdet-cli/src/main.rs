//! Schurdet command-line interface.
//!
//! Run determinant jobs from TOML configuration files:
//! ```sh
//! schurdet-cli run job.toml --processes 3
//! schurdet-cli validate job.toml
//! schurdet-cli laplace matriz.txt
//! schurdet-cli policies
//! ```
//!
//! Built with the `distributed` feature, one rank per MPI process:
//! ```sh
//! mpirun -n 3 schurdet-cli mpi job.toml
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use schurdet_core::ShapePolicy;

#[derive(Parser)]
#[command(name = "schurdet-cli")]
#[command(about = "Schurdet: distributed block determinant via the Schur complement")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a determinant job from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Total process count, coordinator included (overrides config file setting).
        #[arg(short = 'n', long)]
        processes: Option<usize>,
    },
    /// Check the job and its matrix without starting the process group.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Total process count to validate against.
        #[arg(short = 'n', long)]
        processes: Option<usize>,
    },
    /// Determinant of a matrix file by cofactor expansion.
    Laplace {
        /// Path to the matrix file.
        matrix: PathBuf,
    },
    /// List the available shape policies.
    Policies,
    /// Run one rank of a job launched under `mpirun`.
    #[cfg(feature = "distributed")]
    Mpi {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output,
            processes,
        } => {
            println!("Schurdet Block Determinant");
            println!("==========================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());
            println!("Matrix file: {}", job.input.matrix.display());

            let result = runner::run_job(&job, processes)?;
            runner::print_report(&result, job.output.precision);

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));
            if job.output.save_json {
                runner::write_report_json(&result, &out_dir.join("report.json"))?;
            }

            println!("Run complete.");
            Ok(())
        }
        Commands::Validate { config, processes } => {
            let job = config::load_config(&config)?;
            let assignment = runner::validate_job(&job, processes)?;
            println!("Rows of C per worker: {:?}", assignment.counts());
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Laplace { matrix } => {
            let (det, elapsed) = runner::run_laplace(&matrix)?;
            println!("Laplace determinant: {}", det);
            println!("Elapsed: {:.6} s", elapsed.as_secs_f64());
            Ok(())
        }
        #[cfg(feature = "distributed")]
        Commands::Mpi { config, output } => {
            let job = config::load_config(&config)?;
            if let Some(result) = runner::run_job_mpi(&job)? {
                runner::print_report(&result, job.output.precision);
                let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));
                if job.output.save_json {
                    runner::write_report_json(&result, &out_dir.join("report.json"))?;
                }
                println!("Run complete.");
            }
            Ok(())
        }
        Commands::Policies => {
            println!("Available shape policies:");
            println!();
            for policy in ShapePolicy::ALL {
                println!("  {:<14} {}", policy.to_string(), policy.description());
            }
            Ok(())
        }
    }
}
