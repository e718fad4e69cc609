//! Rigid registration of a frame sequence with OpenCV's Enhanced Correlation
//! Coefficient (ECC) algorithm.
//!
//! [`estimate_chain()`] aligns each frame onto its raw predecessor,
//! [`apply_chain()`] resamples any channel through such a chain.

use crate::stack::FrameStack;
use crate::transform::{FrameTransform, Transform, TransformChain};
use crate::utils::{MatExt, UnsafeMatSyncWrapper};
use crate::PrepError;
use opencv::core::{self, Mat};
use opencv::{imgproc, prelude::*};
use rayon::prelude::*;

/// Motion models of `find_transform_ecc()` that keep the rigid-body
/// constraint.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MotionType {
    /// Rotation + translation
    #[default]
    Euclidean = opencv::video::MOTION_EUCLIDEAN as isize,
    /// Translation only
    Translation = opencv::video::MOTION_TRANSLATION as isize,
}

/// Structure containing the opencv parameters needed by `estimate_chain()`
#[derive(Debug, Copy, Clone)]
pub struct EccMatchParameters {
    pub motion_type: MotionType,
    /// parameter used as `opencv::core::TermCriteria::max_count`, caps the
    /// ECC iterations of every frame pair
    pub max_count: i32,
    /// parameter used as `opencv::core::TermCriteria::epsilon`
    pub epsilon: Option<f64>,
    /// parameter used in `opencv::video::find_transform_ecc()`
    pub gauss_filt_size: i32,
    /// A converged pair below this correlation coefficient is treated as a
    /// registration failure
    pub min_correlation: f64,
}

impl Default for EccMatchParameters {
    fn default() -> Self {
        Self {
            motion_type: MotionType::Euclidean,
            max_count: 200,
            epsilon: Some(1e-6),
            gauss_filt_size: 5,
            min_correlation: 0.5,
        }
    }
}

impl EccMatchParameters {
    pub fn validate(&self) -> Result<(), PrepError> {
        if self.max_count <= 0 {
            return Err(PrepError::InvalidParams(format!(
                "max_count must be positive, got {}",
                self.max_count
            )));
        }
        if let Some(epsilon) = self.epsilon {
            if !(epsilon.is_finite() && epsilon >= 0.0) {
                return Err(PrepError::InvalidParams(format!(
                    "epsilon must be a non-negative number, got {epsilon}"
                )));
            }
        }
        if self.gauss_filt_size < 0 || (self.gauss_filt_size > 0 && self.gauss_filt_size % 2 == 0)
        {
            return Err(PrepError::InvalidParams(format!(
                "gauss_filt_size must be 0 or an odd positive number, got {}",
                self.gauss_filt_size
            )));
        }
        if !(0.0..1.0).contains(&self.min_correlation) {
            return Err(PrepError::InvalidParams(format!(
                "min_correlation must be in [0, 1), got {}",
                self.min_correlation
            )));
        }
        Ok(())
    }
}

/// Checks that `frames` is a non-empty sequence of single channel frames of
/// identical size, returning that size.
pub fn check_frames(frames: &[Mat]) -> Result<core::Size, PrepError> {
    let first = frames.first().ok_or(PrepError::NotEnoughFrames)?;
    let expected = first.size()?;
    for (index, frame) in frames.iter().enumerate() {
        if frame.channels() != 1 {
            return Err(PrepError::InvalidParams(format!(
                "frame {} has {} channels, expected 1",
                index,
                frame.channels()
            )));
        }
        let found = frame.size()?;
        if found != expected {
            return Err(PrepError::DimensionMismatch {
                index,
                expected: (expected.width, expected.height),
                found: (found.width, found.height),
            });
        }
    }
    Ok(expected)
}

/// Computes the "register to previous" transform chain of a frame sequence.
///
/// For every `t` in `1..N`, ECC estimates the rigid-body transform mapping the
/// raw frame `t` onto the raw frame `t-1`. Frames are never registered against
/// an already transformed predecessor, so every pair is independent and the
/// pairs are estimated in parallel. Entry 0 is the identity.
///
/// A pair that does not converge (OpenCV gives up, the warp is not finite or
/// the final correlation is below `params.min_correlation`) falls back to the
/// identity. The fallback is logged and recorded as [`crate::Outcome::Fallback`]
/// in the chain; the remaining pairs are still estimated.
///
/// # Returns
/// - `Ok(TransformChain)` with exactly `frames.len()` entries
/// - `Err(PrepError)` on:
///   - no frames (`NotEnoughFrames`)
///   - frames of different sizes (`DimensionMismatch`)
///   - multi channel frames or invalid parameters (`InvalidParams`)
///   - any other OpenCV failure
///
/// # Example
/// ```rust,no_run
/// # use ometiff_prep::prelude::*;
/// # fn f(frames: &[opencv::core::Mat]) -> Result<(), PrepError> {
/// let chain = estimate_chain(
///     frames,
///     EccMatchParameters {
///         motion_type: MotionType::Translation,
///         max_count: 100,
///         ..Default::default()
///     },
/// )?;
/// for (t, entry) in chain.iter().enumerate() {
///     println!("{t}: {:?} {:?}", entry.transform, entry.outcome);
/// }
/// # Ok(())}
/// ```
pub fn estimate_chain(
    frames: &[Mat],
    params: EccMatchParameters,
) -> Result<TransformChain, PrepError> {
    params.validate()?;
    let size = check_frames(frames)?;
    let criteria = Result::<core::TermCriteria, PrepError>::from(params)?;

    // find_transform_ecc() only accepts CV_8U or CV_32F, so 16 bit frames are
    // converted once here. ECC is invariant to gain and bias.
    let frames_f32 = frames
        .iter()
        .map(|f| Ok(UnsafeMatSyncWrapper(f.convert(core::CV_32F, 1.0, 0.0)?)))
        .collect::<Result<Vec<_>, PrepError>>()?;

    log::debug!(
        "Estimating {} frame pairs ({}x{}, {:?})",
        frames.len().saturating_sub(1),
        size.width,
        size.height,
        params.motion_type
    );

    let pairs = {
        let frames_f32_mv = &frames_f32;
        (1..frames_f32.len())
            .into_par_iter()
            .with_min_len(1)
            .map(move |index| {
                register_pair(
                    &frames_f32_mv[index].0,
                    &frames_f32_mv[index - 1].0,
                    index,
                    params,
                    criteria,
                )
            })
            .collect::<Result<Vec<FrameTransform>, PrepError>>()?
    };

    let mut entries = Vec::with_capacity(frames.len());
    entries.push(FrameTransform::reference());
    entries.extend(pairs);
    TransformChain::new(entries)
}

/// Registers one pair, turning a convergence failure into an identity
/// fallback.
fn register_pair(
    moving: &Mat,
    previous: &Mat,
    index: usize,
    params: EccMatchParameters,
    criteria: core::TermCriteria,
) -> Result<FrameTransform, PrepError> {
    match ecc_pair(moving, previous, index, params, criteria) {
        Ok(entry) => Ok(entry),
        Err(PrepError::ConvergenceError { frame, reason }) => {
            log::warn!(
                "Frame {} -> {}: registration did not converge ({}), using identity",
                frame,
                frame - 1,
                reason
            );
            Ok(FrameTransform::fallback(reason))
        }
        Err(e) => Err(e),
    }
}

fn ecc_pair(
    moving: &Mat,
    previous: &Mat,
    index: usize,
    params: EccMatchParameters,
    criteria: core::TermCriteria,
) -> Result<FrameTransform, PrepError> {
    let not_converged = |reason: String| PrepError::ConvergenceError {
        frame: index,
        reason,
    };
    let mut warp_matrix = Mat::eye(2, 3, core::CV_32F)?.to_mat()?;

    // The moving frame is the template: the warp maps points of frame `index`
    // into frame `index - 1`, which is what warp_affine() expects without
    // WARP_INVERSE_MAP.
    let correlation = match opencv::video::find_transform_ecc(
        moving,
        previous,
        &mut warp_matrix,
        params.motion_type as i32,
        criteria,
        &Mat::default(),
        params.gauss_filt_size,
    ) {
        Ok(correlation) => correlation,
        Err(e) if e.code == core::StsNoConv => return Err(not_converged(e.message)),
        Err(e) => return Err(e.into()),
    };

    if !correlation.is_finite() || correlation < params.min_correlation {
        return Err(not_converged(format!(
            "correlation {:.4} below {:.4}",
            correlation, params.min_correlation
        )));
    }
    let transform = Transform::from_ecc_warp(&warp_matrix, params.motion_type)?;
    if !transform.is_finite() {
        return Err(not_converged(format!(
            "non-finite warp {:?}",
            transform
        )));
    }
    log::trace!(
        "Frame {} -> {}: {:?} (correlation {:.4})",
        index,
        index - 1,
        transform,
        correlation
    );
    Ok(FrameTransform::estimated(transform, correlation))
}

/// Resamples every frame through the chain entry of the same time index.
///
/// Interpolation is bilinear (`INTER_LINEAR`); samples mapped from outside
/// the source frame are filled with zero (`BORDER_CONSTANT`). Exact identity
/// entries copy the frame verbatim. The pixel type and geometry of the input
/// are preserved and the input is not modified.
///
/// Fails with `SchemaError` before any resampling if `frames.len()` differs
/// from `chain.len()`.
pub fn apply_chain(frames: &[Mat], chain: &TransformChain) -> Result<Vec<Mat>, PrepError> {
    chain.validate_len(frames.len())?;
    check_frames(frames)?;
    frames
        .iter()
        .zip(chain.iter())
        .map(|(frame, entry)| warp_frame(frame, &entry.transform))
        .collect()
}

/// Applies the same chain to every channel of `stack`, the reference channel
/// included.
pub fn apply_chain_to_stack(
    stack: &FrameStack,
    chain: &TransformChain,
) -> Result<FrameStack, PrepError> {
    chain.validate_len(stack.time_count())?;
    let channels = stack
        .channels()
        .iter()
        .map(|frames| apply_chain(frames, chain))
        .collect::<Result<Vec<_>, PrepError>>()?;
    FrameStack::from_channels(channels)
}

/// Resamples a single frame through `transform`.
pub fn warp_frame(frame: &Mat, transform: &Transform) -> Result<Mat, PrepError> {
    if transform.is_identity() {
        return Ok(frame.try_clone()?);
    }
    let warp_matrix = transform.to_affine_mat()?;
    let mut warped_image = Mat::default();
    imgproc::warp_affine(
        frame,
        &mut warped_image,
        &warp_matrix,
        frame.size()?,
        imgproc::INTER_LINEAR,
        core::BORDER_CONSTANT,
        core::Scalar::default(),
    )?;
    Ok(warped_image)
}
