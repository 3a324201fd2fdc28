//! Plain-text matrix files.
//!
//! One matrix row per line; values are separated by whitespace and/or `;`:
//! ```text
//! # comment lines and blank lines are skipped
//! 2 3 1 0
//! 1;4;2;1
//! 5 1 3 2
//! 0 2 1 1
//! ```
//! Every row must have the same number of values. Squareness is checked
//! later by the shape policy, not here.

use std::path::Path;

use thiserror::Error;

use crate::types::Matrix;

/// Errors while reading a matrix file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read matrix file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    FormatError { line: usize, message: String },

    #[error("Line {line} has {found} values, expected {expected}")]
    Ragged {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Matrix file contains no rows")]
    Empty,
}

/// Parse a matrix from its text form.
pub fn parse_matrix(content: &str) -> Result<Matrix, ParseError> {
    let mut data = Vec::new();
    let mut width: Option<usize> = None;
    let mut rows = 0;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut count = 0;
        for token in line
            .split(|c: char| c.is_whitespace() || c == ';')
            .filter(|t| !t.is_empty())
        {
            let value: f64 = token.parse().map_err(|_| ParseError::FormatError {
                line: idx + 1,
                message: format!("Invalid number '{}'", token),
            })?;
            data.push(value);
            count += 1;
        }

        match width {
            None => width = Some(count),
            Some(expected) if expected != count => {
                return Err(ParseError::Ragged {
                    line: idx + 1,
                    expected,
                    found: count,
                });
            }
            Some(_) => {}
        }
        rows += 1;
    }

    let cols = width.ok_or(ParseError::Empty)?;
    Matrix::from_shape_vec((rows, cols), data).map_err(|e| ParseError::FormatError {
        line: 0,
        message: e.to_string(),
    })
}

/// Read and parse a matrix file.
pub fn load_matrix(path: &Path) -> Result<Matrix, ParseError> {
    let content = std::fs::read_to_string(path)?;
    parse_matrix(&content)
}
