//! TOML configuration deserialisation for determinant jobs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use schurdet_compute::{InversionMode, ProductMode, RunConfig};
use schurdet_core::ShapePolicy;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where the matrix comes from.
#[derive(Debug, Deserialize)]
pub struct InputConfig {
    /// Matrix file. Relative paths are resolved against the job file.
    pub matrix: PathBuf,
}

/// Run parameters from TOML.
#[derive(Debug, Deserialize)]
pub struct RunSection {
    /// Total process count, coordinator included.
    #[serde(default = "default_processes")]
    pub processes: usize,
    #[serde(default)]
    pub shape_policy: ShapePolicy,
    #[serde(default)]
    pub inversion: InversionMode,
    #[serde(default)]
    pub product: ProductMode,
    #[serde(default = "default_singular_tolerance")]
    pub singular_tolerance: f64,
    #[serde(default)]
    pub short_circuit_singular: bool,
    /// Rayon threads for the CPU backend. Default: the global pool.
    #[serde(default)]
    pub threads: Option<usize>,
    /// Also compute the determinant directly and print the difference.
    #[serde(default = "default_true")]
    pub compare_direct: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            shape_policy: ShapePolicy::default(),
            inversion: InversionMode::default(),
            product: ProductMode::default(),
            singular_tolerance: default_singular_tolerance(),
            short_circuit_singular: false,
            threads: None,
            compare_direct: true,
        }
    }
}

impl RunSection {
    /// Run configuration, with an optional process count override.
    pub fn to_run_config(&self, processes: Option<usize>) -> RunConfig {
        RunConfig {
            processes: processes.unwrap_or(self.processes),
            shape_policy: self.shape_policy,
            inversion: self.inversion,
            product: self.product,
            singular_tolerance: self.singular_tolerance,
            short_circuit_singular: self.short_circuit_singular,
        }
    }
}

fn default_processes() -> usize {
    2
}
fn default_singular_tolerance() -> f64 {
    1e-8
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to write the full report as JSON (default: false).
    #[serde(default)]
    pub save_json: bool,
    /// Decimal places when printing matrices (default: 4).
    #[serde(default = "default_precision")]
    pub precision: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_json: false,
            precision: default_precision(),
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_precision() -> usize {
    4
}
fn default_true() -> bool {
    true
}

/// Parse a job from TOML text. Paths are left as written.
pub fn parse_config(content: &str) -> anyhow::Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    if config.run.singular_tolerance < 0.0 {
        anyhow::bail!(
            "singular_tolerance must be non-negative, got {}",
            config.run.singular_tolerance
        );
    }
    Ok(config)
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read job file {}", path.display()))?;
    let mut config =
        parse_config(&content).with_context(|| format!("Invalid job file {}", path.display()))?;
    if config.input.matrix.is_relative() {
        if let Some(dir) = path.parent() {
            config.input.matrix = dir.join(&config.input.matrix);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_job_uses_defaults() {
        let job = parse_config("[input]\nmatrix = \"matriz.txt\"\n").unwrap();
        assert_eq!(job.input.matrix, PathBuf::from("matriz.txt"));
        assert_eq!(job.run.processes, 2);
        assert_eq!(job.run.shape_policy, ShapePolicy::EvenBalanced);
        assert_eq!(job.run.inversion, InversionMode::Local);
        assert_eq!(job.run.product, ProductMode::PointToPoint);
        assert_eq!(job.run.singular_tolerance, 1e-8);
        assert!(job.run.compare_direct);
        assert_eq!(job.run.threads, None);
        assert_eq!(job.output.directory, "./output");
        assert_eq!(job.output.precision, 4);
        assert!(!job.output.save_json);
    }

    #[test]
    fn test_full_job() {
        let job = parse_config(
            r#"
            [input]
            matrix = "data/m.txt"

            [run]
            processes = 5
            shape_policy = "even-exact"
            inversion = "distributed"
            product = "collective"
            singular_tolerance = 1e-10
            short_circuit_singular = true
            threads = 2
            compare_direct = false

            [output]
            directory = "out"
            save_json = true
            precision = 6
            "#,
        )
        .unwrap();

        let run = job.run.to_run_config(None);
        assert_eq!(run.processes, 5);
        assert_eq!(run.shape_policy, ShapePolicy::EvenExact);
        assert_eq!(run.inversion, InversionMode::Distributed);
        assert_eq!(run.product, ProductMode::Collective);
        assert_eq!(run.singular_tolerance, 1e-10);
        assert!(run.short_circuit_singular);
        assert_eq!(job.run.threads, Some(2));
        assert!(!job.run.compare_direct);
        assert!(job.output.save_json);
        assert_eq!(job.output.precision, 6);
    }

    #[test]
    fn test_process_override() {
        let job = parse_config("[input]\nmatrix = \"m.txt\"\n[run]\nprocesses = 3\n").unwrap();
        assert_eq!(job.run.to_run_config(Some(9)).processes, 9);
        assert_eq!(job.run.to_run_config(None).processes, 3);
    }

    #[test]
    fn test_rejects_unknown_policy_and_negative_tolerance() {
        assert!(parse_config("[input]\nmatrix = \"m\"\n[run]\nshape_policy = \"odd\"\n").is_err());
        assert!(
            parse_config("[input]\nmatrix = \"m\"\n[run]\nsingular_tolerance = -1.0\n").is_err()
        );
        assert!(parse_config("[run]\nprocesses = 2\n").is_err());
    }
}
