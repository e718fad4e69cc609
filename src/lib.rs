// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2021,2025 lacklustr@protonmail.com https://github.com/eadf

//! Preprocessing of OME-TIFF hyperstacks from microscopy acquisitions,
//! based on OpenCV <https://crates.io/crates/opencv> and Rayon <https://crates.io/crates/rayon>.
//!
//! Each stack is a `time × channel × height × width` dataset. The library can
//! register the frames of a stack against stage drift and export the
//! bright field channel as 8-bit PNG files for labeling pipelines.
//!
//! Registration works "to the previous frame": frame `t` is aligned onto the
//! raw frame `t-1` with OpenCV's Enhanced Correlation Coefficient (ECC)
//! maximization restricted to rigid-body motion. The resulting
//! [`TransformChain`] is computed once from the reference channel and then
//! applied identically to every channel, which keeps the channels of a frame
//! spatially consistent.
//!
//! ```rust,no_run
//! # use ometiff_prep::prelude::*;
//! # fn f(frames: Vec<opencv::core::Mat>) -> Result<(), PrepError> {
//! let chain = estimate_chain(&frames, EccMatchParameters::default())?;
//! let registered = apply_chain(&frames, &chain)?;
//! assert_eq!(registered.len(), frames.len());
//! # Ok(())}
//! ```
//!
//! Read more about image alignment with OpenCV here:
//! <https://learnopencv.com/image-alignment-ecc-in-opencv-c-python>

pub mod batch;
pub mod export;
pub mod reader;
pub mod registration;
pub mod stack;
pub mod store;
pub mod transform;
pub mod utils;

pub use opencv;
use std::path::PathBuf;
use thiserror::Error;

pub use batch::{BatchPreprocessor, BatchReport, FileReport, PreprocessConfig};
pub use registration::{EccMatchParameters, MotionType, apply_chain, estimate_chain};
pub use stack::FrameStack;
pub use transform::{FrameTransform, Outcome, Transform, TransformChain};

#[derive(Error, Debug)]
pub enum PrepError {
    #[error(transparent)]
    OpenCvError(#[from] opencv::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Input error: {0}")]
    InputError(String),
    #[error("Frame {index} is {}x{}, expected {}x{}", found.0, found.1, expected.0, expected.1)]
    DimensionMismatch {
        index: usize,
        expected: (i32, i32),
        found: (i32, i32),
    },
    #[error("Registration of frame {frame} did not converge: {reason}")]
    ConvergenceError { frame: usize, reason: String },
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Invalid stack: {0}")]
    InvalidStack(String),
    #[error("Invalid path encoding {0}")]
    InvalidPathEncoding(PathBuf),
    #[error("Invalid parameter(s) {0}")]
    InvalidParams(String),
    #[error("Not enough frames")]
    NotEnoughFrames,
}

pub mod prelude {
    pub use super::{
        BatchPreprocessor, EccMatchParameters, FrameStack, MotionType, Outcome, PrepError,
        PreprocessConfig, Transform, TransformChain, apply_chain, estimate_chain,
    };
}
