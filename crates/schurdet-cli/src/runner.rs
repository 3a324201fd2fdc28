//! Job runner: loads the matrix, runs the process group, prints and saves
//! the results.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::Serialize;

use schurdet_compute::distributed::ProcessTopology;
use schurdet_compute::{
    ComputeBackend, CpuBackend, DistributedError, SchurReport, Supervisor, Termination,
};
use schurdet_core::laplace::{laplace_determinant, LAPLACE_WARN_ORDER};
use schurdet_core::linalg::determinant;
use schurdet_core::parsers::load_matrix;
use schurdet_core::partition::split_blocks;
use schurdet_core::{Matrix, WorkAssignment};

use crate::config::JobConfig;

/// Results from a job run.
pub struct RunOutput {
    pub report: SchurReport,
    /// Determinant of the whole matrix without the block method.
    pub direct: Option<f64>,
}

/// Run the distributed determinant for a parsed job configuration.
pub fn run_job(job: &JobConfig, processes: Option<usize>) -> Result<RunOutput> {
    let backend = create_backend(job.run.threads)?;
    println!("Backend: {}", backend.device_info().name);

    let config = job.run.to_run_config(processes);
    println!(
        "Processes: {} (1 coordinator + {} worker(s)), policy {}, inversion {:?}, product {:?}",
        config.processes,
        config.processes.saturating_sub(1),
        config.shape_policy,
        config.inversion,
        config.product
    );

    debug!("{:?}", config);
    let supervisor = Supervisor::new(config, backend);
    let matrix_path = job.input.matrix.clone();
    let result = supervisor.run(move || load_matrix(&matrix_path));
    finish(job, result)
}

/// Run this process's rank of a job launched under `mpirun`.
///
/// Only the coordinator returns a [`RunOutput`]; workers return `None` once
/// their share is done or the run was aborted.
#[cfg(feature = "distributed")]
pub fn run_job_mpi(job: &JobConfig) -> Result<Option<RunOutput>> {
    use log::info;
    use schurdet_compute::distributed::mpi_comm::connect_world;
    use schurdet_compute::RankOutcome;

    let (_universe, comm) = connect_world()?;
    let backend = create_backend(job.run.threads)?;
    let config = job.run.to_run_config(Some(comm.size()));
    if comm.rank() == 0 {
        println!("Backend: {}", backend.device_info().name);
        println!("Processes: {} (mpirun)", comm.size());
    }
    debug!("rank {}: {:?}", comm.rank(), config);

    let supervisor = Supervisor::new(config, backend);
    let matrix_path = job.input.matrix.clone();
    match supervisor.run_rank(comm, move || load_matrix(&matrix_path)) {
        RankOutcome::Coordinator(result) => finish(job, result).map(Some),
        RankOutcome::Worker(result) => {
            let summary = result.context("Worker rank failed")?;
            info!(
                "rank {} done: {} row(s){}",
                summary.rank,
                summary.rows,
                if summary.cancelled { ", cancelled" } else { "" }
            );
            Ok(None)
        }
    }
}

/// Turn the coordinator's result into a [`RunOutput`], logging the state an
/// aborted run failed in.
fn finish(job: &JobConfig, result: Result<SchurReport, DistributedError>) -> Result<RunOutput> {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(state) = e.state() {
                error!("Run aborted in {}", state);
            }
            return Err(anyhow::Error::new(e)
                .context(format!("Run on {} failed", job.input.matrix.display())));
        }
    };

    let direct = if job.run.compare_direct {
        Some(determinant(&report.matrix)?)
    } else {
        None
    };
    Ok(RunOutput { report, direct })
}

/// Check the job and its matrix against the shape policy and process count
/// without starting any rank.
pub fn validate_job(job: &JobConfig, processes: Option<usize>) -> Result<WorkAssignment> {
    let config = job.run.to_run_config(processes);
    let matrix = load_matrix(&job.input.matrix)
        .with_context(|| format!("Cannot load {}", job.input.matrix.display()))?;
    let blocks = split_blocks(&matrix, config.shape_policy)?;
    let topology = ProcessTopology::new(config.processes, blocks.half(), config.shape_policy)?;
    println!(
        "Matrix {}x{} splits into {}x{} blocks under {}",
        matrix.nrows(),
        matrix.ncols(),
        blocks.half(),
        blocks.half(),
        config.shape_policy
    );
    Ok(topology.worker_assignment())
}

/// Print every intermediate value of a run.
pub fn print_report(output: &RunOutput, precision: usize) {
    let report = &output.report;
    println!();
    println!("Matrix M ({}x{}):", report.matrix.nrows(), report.matrix.ncols());
    print!("{}", format_matrix(&report.matrix, precision));
    for (name, block) in [
        ("A", &report.blocks.a),
        ("B", &report.blocks.b),
        ("C", &report.blocks.c),
        ("D", &report.blocks.d),
    ] {
        println!("Block {}:", name);
        print!("{}", format_matrix(block, precision));
    }

    println!("det(A) = {:.*}", precision, report.det_a);
    println!("A^-1:");
    print!("{}", format_matrix(&report.a_inv, precision));
    println!("Rows per slot: {:?}", report.assignment.counts());
    println!("T = C A^-1 B:");
    print!("{}", format_matrix(&report.t, precision));
    println!("S = D - T:");
    print!("{}", format_matrix(&report.s, precision));
    println!("det(S) = {:.*}", precision, report.det_s);
    println!("Elapsed: {:.6} s", report.elapsed.as_secs_f64());

    match (report.termination, report.det_m) {
        (Termination::Completed, Some(det)) => {
            println!("det(M) = det(A) * det(S) = {:.*}", precision, det);
            if let Some(direct) = output.direct {
                println!(
                    "Direct det(M) = {:.*} (relative difference {:.3e})",
                    precision,
                    direct,
                    relative_difference(det, direct)
                );
            }
        }
        _ => {
            println!("det(S) is zero within {:.1e}; det(M) not formed", report.tolerance);
        }
    }

    if report.is_singular() {
        println!("The matrix is singular.");
    } else {
        println!("The matrix is non-singular.");
    }
}

fn relative_difference(value: f64, reference: f64) -> f64 {
    (value - reference).abs() / reference.abs().max(f64::MIN_POSITIVE)
}

/// Render a matrix one row per line with a fixed number of decimals.
pub fn format_matrix(m: &Matrix, precision: usize) -> String {
    let cells: Vec<String> = m.iter().map(|v| format!("{:.*}", precision, v)).collect();
    let width = cells.iter().map(String::len).max().unwrap_or(0);
    let mut out = String::new();
    for row in cells.chunks(m.ncols().max(1)) {
        let line: Vec<String> = row.iter().map(|c| format!("{:>width$}", c)).collect();
        out.push_str("  [ ");
        out.push_str(&line.join("  "));
        out.push_str(" ]\n");
    }
    out
}

/// Serialisable form of a run.
#[derive(Serialize)]
struct JsonReport<'a> {
    matrix: Vec<Vec<f64>>,
    a: Vec<Vec<f64>>,
    b: Vec<Vec<f64>>,
    c: Vec<Vec<f64>>,
    d: Vec<Vec<f64>>,
    det_a: f64,
    a_inv: Vec<Vec<f64>>,
    assignment: &'a WorkAssignment,
    t: Vec<Vec<f64>>,
    s: Vec<Vec<f64>>,
    det_s: f64,
    det_m: Option<f64>,
    direct_det: Option<f64>,
    elapsed_seconds: f64,
    termination: Termination,
    singular: bool,
    processes: usize,
}

fn rows(m: &Matrix) -> Vec<Vec<f64>> {
    m.outer_iter().map(|row| row.to_vec()).collect()
}

/// Write the full report to a JSON file.
pub fn write_report_json(output: &RunOutput, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let report = &output.report;
    let json = JsonReport {
        matrix: rows(&report.matrix),
        a: rows(&report.blocks.a),
        b: rows(&report.blocks.b),
        c: rows(&report.blocks.c),
        d: rows(&report.blocks.d),
        det_a: report.det_a,
        a_inv: rows(&report.a_inv),
        assignment: &report.assignment,
        t: rows(&report.t),
        s: rows(&report.s),
        det_s: report.det_s,
        det_m: report.det_m,
        direct_det: output.direct,
        elapsed_seconds: report.elapsed.as_secs_f64(),
        termination: report.termination,
        singular: report.is_singular(),
        processes: report.processes,
    };
    let text = serde_json::to_string_pretty(&json)
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, text)?;

    println!("Report (JSON) written to: {}", path.display());
    Ok(())
}

/// Laplace expansion of a matrix file, with its wall time.
pub fn run_laplace(path: &Path) -> Result<(f64, Duration)> {
    let matrix =
        load_matrix(path).with_context(|| format!("Cannot load {}", path.display()))?;
    if matrix.nrows() > LAPLACE_WARN_ORDER {
        println!(
            "Warning: order {} takes factorial time with cofactor expansion",
            matrix.nrows()
        );
    }
    let started = Instant::now();
    let det = laplace_determinant(&matrix)?;
    Ok((det, started.elapsed()))
}

/// Create the CPU backend, on a dedicated pool when `threads` is set.
fn create_backend(threads: Option<usize>) -> Result<Arc<dyn ComputeBackend>> {
    let backend = match threads {
        Some(n) => CpuBackend::with_threads(n)?,
        None => CpuBackend::new(),
    };
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_format_matrix_aligns_columns() {
        let text = format_matrix(&array![[1.0, -2.5], [10.0, 0.0]], 2);
        assert_eq!(text, "  [  1.00  -2.50 ]\n  [ 10.00   0.00 ]\n");
    }

    #[test]
    fn test_run_job_from_file() {
        let dir = std::env::temp_dir().join(format!("schurdet-cli-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let matrix = dir.join("matriz.txt");
        std::fs::write(&matrix, "2 3 1 0\n1 4 2 1\n5 1 3 2\n0 2 1 1\n").unwrap();

        let mut job = parse_config("[input]\nmatrix = \"matriz.txt\"\n").unwrap();
        job.input.matrix = matrix.clone();
        let output = run_job(&job, Some(3)).unwrap();
        assert_relative_eq!(output.report.det_m.unwrap(), 9.0, epsilon = 1e-10);
        assert_relative_eq!(output.direct.unwrap(), 9.0, epsilon = 1e-10);

        let json_path = dir.join("report.json");
        write_report_json(&output, &json_path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value["termination"], "completed");
        assert_eq!(value["singular"], false);

        let (laplace, _) = run_laplace(&matrix).unwrap();
        assert_relative_eq!(laplace, 9.0, epsilon = 1e-12);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
