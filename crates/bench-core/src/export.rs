//! Result-file export.
//!
//! One comma-separated file per unit, LF line endings, header first and
//! then one row per size in request order.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::identity::{Identity, VectorConfig, SCALAR_LMUL, SCALAR_VLEN};
use crate::sample::{ResultSet, Sample};
use crate::unit::TransitionError;

/// Header row of every result file.
pub const HEADER: [&str; 10] = [
    "Benchmark",
    "Iterations",
    "VLEN",
    "LMUL",
    "Std",
    "Size",
    "Icount",
    "Time",
    "Icnt/iter",
    "ns/inst",
];

/// A result file could not be written.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Creating or writing the file failed.
    #[error("unable to write results to {}: {source}", path.display())]
    Csv {
        /// Result file.
        path: PathBuf,
        /// Underlying writer error.
        #[source]
        source: csv::Error,
    },
    /// Flushing the file failed.
    #[error("unable to flush results to {}: {source}", path.display())]
    Flush {
        /// Result file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The unit has no successful run to export.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Shortest round-trip float text with `.0` on integral values.
fn float_field(value: f64) -> String {
    format!("{value:?}")
}

fn row(identity: &Identity, size: u64, sample: &Sample) -> [String; 10] {
    let (vlen, lmul, std) = match identity.config {
        VectorConfig::Scalar => (SCALAR_VLEN, SCALAR_LMUL, "True"),
        VectorConfig::Vector { vlen, lmul } => (vlen, lmul, "False"),
    };
    [
        identity.benchmark.to_string(),
        sample.iterations.to_string(),
        vlen.to_string(),
        lmul.to_string(),
        std.to_owned(),
        size.to_string(),
        sample.icount.to_string(),
        float_field(sample.time),
        float_field(sample.icount_per_iteration()),
        float_field(sample.ns_per_instruction().unwrap_or(f64::NAN)),
    ]
}

/// Writes `results` for `identity` to `path`, replacing any existing file.
///
/// # Errors
///
/// Returns [`ExportError`] when the file cannot be created or written.
pub fn write_results(
    path: &Path,
    identity: &Identity,
    results: &ResultSet,
) -> Result<(), ExportError> {
    let csv_err = |source: csv::Error| ExportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Necessary)
        .from_path(path)
        .map_err(csv_err)?;

    writer.write_record(HEADER).map_err(csv_err)?;
    for (size, sample) in results.iter() {
        writer
            .write_record(row(identity, size, sample))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|source| ExportError::Flush {
        path: path.to_path_buf(),
        source,
    })
}
