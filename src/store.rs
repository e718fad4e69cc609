//! JSON persistence of transform chains, one file per input stack.
//!
//! ```json
//! {
//!   "source": "sample_1.ome.tif",
//!   "frame_count": 2,
//!   "frames": [
//!     { "matrix": [[1.0, -0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], "outcome": { "kind": "reference" } },
//!     { "matrix": [[1.0, -0.0, -2.01], [0.0, 1.0, 0.03], [0.0, 0.0, 1.0]], "outcome": { "kind": "estimated", "correlation": 0.993 } }
//!   ]
//! }
//! ```

use crate::transform::{FrameTransform, Outcome, Transform, TransformChain};
use crate::{PrepError, utils};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fs, io};

/// Appended to the input file name to name its transform file.
pub const TRANSFORM_SUFFIX: &str = ".tmats.json";

#[derive(Debug, Serialize, Deserialize)]
struct FrameRecord {
    /// 3×3 homogeneous matrix, row major
    matrix: [[f64; 3]; 3],
    outcome: Outcome,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransformFile {
    source: String,
    frame_count: usize,
    frames: Vec<FrameRecord>,
}

/// `<output_dir>/<source_name>.tmats.json`
pub fn transform_path(output_dir: &Path, source_name: &str) -> PathBuf {
    output_dir.join(format!("{source_name}{TRANSFORM_SUFFIX}"))
}

/// Writes `chain` to `destination` as pretty printed JSON. The file is
/// replaced atomically.
pub fn save(chain: &TransformChain, destination: &Path, source_name: &str) -> Result<(), PrepError> {
    let file = TransformFile {
        source: source_name.to_string(),
        frame_count: chain.len(),
        frames: chain
            .iter()
            .map(|entry| FrameRecord {
                matrix: entry.transform.matrix(),
                outcome: entry.outcome.clone(),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file).map_err(io::Error::from)?;
    utils::write_atomic(destination, json.as_bytes())?;
    log::debug!(
        "Saved {} transforms to {}",
        chain.len(),
        destination.display()
    );
    Ok(())
}

/// Reads a chain written by [`save()`].
///
/// # Errors
/// - `IoError` if the file cannot be read or is not valid JSON for this format
/// - `SchemaError` if `frame_count` disagrees with the stored frames, a matrix
///   is not rigid, or the chain does not start with the identity
pub fn load(source: &Path) -> Result<TransformChain, PrepError> {
    read(source).map(|(_, chain)| chain)
}

/// [`load()`] for the stack `source_name` of `expected_len` frames. A file
/// written for another stack or for a different frame count is a
/// `SchemaError`.
pub fn load_for(
    source: &Path,
    source_name: &str,
    expected_len: usize,
) -> Result<TransformChain, PrepError> {
    let (stored_name, chain) = read(source)?;
    if stored_name != source_name {
        return Err(PrepError::SchemaError(format!(
            "{} was written for {}, not {}",
            source.display(),
            stored_name,
            source_name
        )));
    }
    chain.validate_len(expected_len)?;
    Ok(chain)
}

fn read(source: &Path) -> Result<(String, TransformChain), PrepError> {
    let content = fs::read_to_string(source)?;
    let file: TransformFile = serde_json::from_str(&content)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if file.frame_count != file.frames.len() {
        return Err(PrepError::SchemaError(format!(
            "{} declares {} frames but stores {}",
            source.display(),
            file.frame_count,
            file.frames.len()
        )));
    }
    let entries = file
        .frames
        .into_iter()
        .map(|record| {
            Ok(FrameTransform {
                transform: Transform::from_matrix(&record.matrix)?,
                outcome: record.outcome,
            })
        })
        .collect::<Result<Vec<_>, PrepError>>()?;
    Ok((file.source, TransformChain::new(entries)?))
}
