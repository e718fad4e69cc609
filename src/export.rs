//! PNG and metadata outputs.

use crate::stack::{FrameStack, depth_name};
use crate::transform::TransformChain;
use crate::utils::{self, MatExt};
use crate::PrepError;
use opencv::core::{self, Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Converts a frame to 8-bit unsigned samples.
///
/// - `CV_8U` is copied
/// - `CV_16U` is scaled by 1/257 (full 16 bit range onto 0..=255)
/// - `CV_32F`/`CV_64F` are expected in `[0, 1]` and scaled by 255
/// - other depths are saturated as they are
pub fn to_u8(frame: &Mat) -> Result<Mat, PrepError> {
    match frame.depth() {
        core::CV_8U => Ok(frame.try_clone()?),
        core::CV_16U => frame.convert(core::CV_8U, 1.0 / 257.0, 0.0),
        core::CV_32F | core::CV_64F => frame.convert(core::CV_8U, 255.0, 0.0),
        _ => frame.convert(core::CV_8U, 1.0, 0.0),
    }
}

/// `<output_dir>/<source_name>_t0003.png`
pub fn png_path(output_dir: &Path, source_name: &str, time: usize) -> PathBuf {
    output_dir.join(format!("{source_name}_t{time:04}.png"))
}

/// Encodes `frame` as an 8-bit PNG and writes it atomically to `destination`.
pub fn write_png(frame: &Mat, destination: &Path) -> Result<(), PrepError> {
    let frame_u8 = to_u8(frame)?;
    let mut buf = Vector::<u8>::new();
    if !imgcodecs::imencode(".png", &frame_u8, &mut buf, &Vector::new())? {
        return Err(PrepError::IoError(io::Error::other(format!(
            "PNG encoding failed for {}",
            destination.display()
        ))));
    }
    utils::write_atomic(destination, &buf.to_vec())?;
    Ok(())
}

/// Geometry and registration summary of one stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackMetadata {
    pub source: String,
    pub time_count: usize,
    pub channel_count: usize,
    pub height: i32,
    pub width: i32,
    pub pixel_depth: &'static str,
    pub registered: bool,
    pub fallback_frames: Vec<usize>,
    pub min_correlation: Option<f64>,
}

impl StackMetadata {
    pub fn describe(source_name: &str, stack: &FrameStack, chain: Option<&TransformChain>) -> Self {
        Self {
            source: source_name.to_string(),
            time_count: stack.time_count(),
            channel_count: stack.channel_count(),
            height: stack.height(),
            width: stack.width(),
            pixel_depth: depth_name(stack.depth()),
            registered: chain.is_some(),
            fallback_frames: chain.map(TransformChain::fallback_frames).unwrap_or_default(),
            min_correlation: chain.and_then(TransformChain::min_correlation),
        }
    }
}

/// `<output_dir>/<source_name>.metadata.json`
pub fn metadata_path(output_dir: &Path, source_name: &str) -> PathBuf {
    output_dir.join(format!("{source_name}.metadata.json"))
}

pub fn write_metadata(metadata: &StackMetadata, destination: &Path) -> Result<(), PrepError> {
    let json = serde_json::to_string_pretty(metadata).map_err(io::Error::from)?;
    utils::write_atomic(destination, json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn constant(value: f64, typ: i32) -> Mat {
        Mat::new_rows_cols_with_default(3, 5, typ, core::Scalar::all(value)).unwrap()
    }

    #[test]
    fn test_to_u8_scaling() {
        let cases = [
            (constant(200.0, core::CV_8U), 200u8),
            (constant(65535.0, core::CV_16U), 255),
            (constant(257.0 * 100.0, core::CV_16U), 100),
            (constant(0.5, core::CV_32F), 128),
            (constant(3.0, core::CV_32F), 255),
        ];
        for (frame, expected) in cases {
            let out = to_u8(&frame).unwrap();
            assert_eq!(out.typ(), core::CV_8U);
            assert_eq!(*out.at_2d::<u8>(1, 1).unwrap(), expected);
        }
    }

    #[test]
    fn test_write_png_decodes_back() {
        let dir = tempdir().unwrap();
        let path = png_path(dir.path(), "s.ome.tif", 3);
        assert!(path.ends_with("s.ome.tif_t0003.png"));

        write_png(&constant(257.0 * 42.0, core::CV_16U), &path).unwrap();
        let decoded =
            imgcodecs::imread(path.to_str().unwrap(), imgcodecs::IMREAD_UNCHANGED).unwrap();
        assert_eq!(decoded.typ(), core::CV_8U);
        assert_eq!((decoded.cols(), decoded.rows()), (5, 3));
        assert_eq!(*decoded.at_2d::<u8>(2, 4).unwrap(), 42);
    }

    #[test]
    fn test_metadata_describes_stack() {
        let stack = FrameStack::from_pages(
            (0..4).map(|_| constant(1.0, core::CV_16U)).collect(),
            2,
        )
        .unwrap();
        let chain = TransformChain::identity(2).unwrap();
        let meta = StackMetadata::describe("s.ome.tif", &stack, Some(&chain));
        assert_eq!(meta.time_count, 2);
        assert_eq!(meta.channel_count, 2);
        assert_eq!((meta.width, meta.height), (5, 3));
        assert_eq!(meta.pixel_depth, "u16");
        assert!(meta.registered);
        assert_eq!(meta.min_correlation, None);

        let dir = tempdir().unwrap();
        let path = metadata_path(dir.path(), "s.ome.tif");
        write_metadata(&meta, &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["pixel_depth"], "u16");
        assert_eq!(value["time_count"], 2);
    }
}
