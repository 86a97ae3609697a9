//! Text formats for corpora and fitted matrices.
//!
//! Corpus lines are whitespace separated:
//!
//! ```text
//! doc_id  num_unique  tok:count  tok:count ...
//! ```
//!
//! Matrices are written one row per line as `row_index\tv0\tv1...` with six
//! decimals.

use crate::document::Document;
use crate::matrix::Matrix;
use crate::partition::partition_ranges;
use crate::stages::Estimate;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FormatError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, FormatError>;

fn parse_error(line: usize, reason: impl Into<String>) -> FormatError {
    FormatError::Parse {
        line,
        reason: reason.into(),
    }
}

/// Reads one document per line. Lines with fewer than two fields are skipped.
///
/// The second field (number of unique tokens) is informational and only
/// checked for being a number.
pub fn read_documents<R: BufRead>(reader: R) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = n + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= 1 {
            continue;
        }

        let id: u64 = fields[0]
            .parse()
            .map_err(|e| parse_error(line_no, format!("document id {:?}: {e}", fields[0])))?;
        let unique: usize = fields[1]
            .parse()
            .map_err(|e| parse_error(line_no, format!("token count {:?}: {e}", fields[1])))?;
        if unique != fields.len() - 2 {
            warn!(
                line = line_no,
                declared = unique,
                found = fields.len() - 2,
                "unique token count disagrees with the record"
            );
        }

        let pairs = fields[2..]
            .iter()
            .map(|field| {
                let (token, count) = field
                    .split_once(':')
                    .ok_or_else(|| parse_error(line_no, format!("expected tok:count, got {field:?}")))?;
                let token = token
                    .parse::<u32>()
                    .map_err(|e| parse_error(line_no, format!("token {token:?}: {e}")))?;
                let count = count
                    .parse::<f64>()
                    .map_err(|e| parse_error(line_no, format!("count {count:?}: {e}")))?;
                Ok((token, count))
            })
            .collect::<Result<Vec<_>>>()?;
        documents.push(Document::from_pairs(id, pairs));
    }
    debug!(documents = documents.len(), "corpus read");
    Ok(documents)
}

/// Writes `matrix` one row per line, each prefixed by its row index.
pub fn write_matrix<W: Write>(matrix: &Matrix, mut writer: W) -> Result<()> {
    for r in 0..matrix.rows() {
        write!(writer, "{r}")?;
        for v in matrix.row(r) {
            write!(writer, "\t{v:.6}")?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a matrix in the format produced by [`write_matrix`].
///
/// Rows may appear in any order but every index in `0..rows` must be present
/// exactly once.
pub fn read_matrix<R: BufRead>(reader: R) -> Result<Matrix> {
    let mut rows: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    let mut cols = None;

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = n + 1;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let index: usize = fields
            .next()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|e| parse_error(line_no, format!("row index: {e}")))?;
        let values = fields
            .map(|f| {
                f.trim()
                    .parse::<f64>()
                    .map_err(|e| parse_error(line_no, format!("value {f:?}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        match cols {
            None => cols = Some(values.len()),
            Some(c) if c != values.len() => {
                return Err(parse_error(
                    line_no,
                    format!("expected {c} values, got {}", values.len()),
                ))
            }
            Some(_) => {}
        }
        if rows.insert(index, values).is_some() {
            return Err(parse_error(line_no, format!("row {index} appears twice")));
        }
    }

    // Keys are sorted and unique, so they are 0..len exactly when each key
    // equals its position.
    if let Some(index) = rows.keys().enumerate().find_map(|(i, &k)| (i != k).then_some(i)) {
        return Err(parse_error(0, format!("row {index} is missing")));
    }

    let cols = cols.unwrap_or(0);
    let shape = [rows.len(), cols];
    let data = rows.into_values().flatten().collect();
    Ok(Matrix::from_raw(data, shape))
}

/// Splits a corpus into `parts` contiguous chunks, larger chunks first.
pub fn split_documents(mut documents: Vec<Document>, parts: usize) -> Vec<Vec<Document>> {
    let ranges = partition_ranges(documents.len(), parts);
    let mut chunks = Vec::with_capacity(ranges.len());
    for range in ranges.iter().rev() {
        chunks.push(documents.split_off(range.start));
    }
    chunks.reverse();
    chunks
}

impl Estimate {
    /// Writes `<prefix>.alpha` and `<prefix>.beta`, returning both paths.
    pub fn write_to(&self, prefix: &Path) -> Result<(PathBuf, PathBuf)> {
        let alpha_path = with_suffix(prefix, "alpha");
        let beta_path = with_suffix(prefix, "beta");
        write_matrix(&self.alpha, BufWriter::new(File::create(&alpha_path)?))?;
        write_matrix(&self.beta, BufWriter::new(File::create(&beta_path)?))?;
        debug!(alpha = %alpha_path.display(), beta = %beta_path.display(), "estimate written");
        Ok((alpha_path, beta_path))
    }

    /// Reads back what [`Estimate::write_to`] wrote.
    pub fn read_from(prefix: &Path) -> Result<Self> {
        let alpha = read_matrix(BufReader::new(File::open(with_suffix(prefix, "alpha"))?))?;
        let beta = read_matrix(BufReader::new(File::open(with_suffix(prefix, "beta"))?))?;
        Ok(Self { alpha, beta })
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
