//! Rigid-body transforms and the per-frame transform chain.
//!
//! A [`Transform`] maps a point of frame `t` into the coordinate system of
//! frame `t-1`. A [`TransformChain`] holds one such transform per time index,
//! entry 0 being the identity of the first frame.

use crate::PrepError;
use crate::registration::MotionType;
use crate::utils::SetMValue;
use opencv::core::{self, Mat};
use opencv::prelude::*;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Tolerance used when checking the rigid-body constraint of a matrix.
pub const RIGID_TOLERANCE: f64 = 1e-6;

/// 2D rigid-body motion: rotation by `angle` (radians, counter-clockwise in
/// image coordinates) followed by a translation of `(tx, ty)` pixels.
///
/// Homogeneous form:
/// ```text
/// | cos(a)  -sin(a)  tx |
/// | sin(a)   cos(a)  ty |
/// |   0        0      1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    angle: f64,
    tx: f64,
    ty: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        angle: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn new(angle: f64, tx: f64, ty: f64) -> Self {
        Self { angle, tx, ty }
    }

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(0.0, tx, ty)
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn offset(&self) -> (f64, f64) {
        (self.tx, self.ty)
    }

    /// True only for the exact identity, as produced for the first frame or
    /// a fallback. Estimated transforms are never rounded to identity.
    pub fn is_identity(&self) -> bool {
        self.angle == 0.0 && self.tx == 0.0 && self.ty == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.angle.is_finite() && self.tx.is_finite() && self.ty.is_finite()
    }

    /// The 3×3 homogeneous matrix, row major.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        let (sin, cos) = self.angle.sin_cos();
        [[cos, -sin, self.tx], [sin, cos, self.ty], [0.0, 0.0, 1.0]]
    }

    /// Builds a transform from a homogeneous matrix, rejecting anything that
    /// is not a proper rigid-body motion (scale, shear, reflection or a
    /// projective last row).
    ///
    /// ```
    /// # use ometiff_prep::Transform;
    /// let t = Transform::new(0.3, 4.0, -2.0);
    /// let back = Transform::from_matrix(&t.matrix()).unwrap();
    /// assert!(back.approx_eq(&t, 1e-12));
    ///
    /// let scaled = [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]];
    /// assert!(Transform::from_matrix(&scaled).is_err());
    /// ```
    pub fn from_matrix(m: &[[f64; 3]; 3]) -> Result<Self, PrepError> {
        if m.iter().flatten().any(|v| !v.is_finite()) {
            return Err(PrepError::SchemaError(format!(
                "non-finite transform matrix {m:?}"
            )));
        }
        let close = |a: f64, b: f64| (a - b).abs() <= RIGID_TOLERANCE;
        let [[a, b, tx], [c, d, ty], [p, q, w]] = *m;
        if !(close(p, 0.0) && close(q, 0.0) && close(w, 1.0)) {
            return Err(PrepError::SchemaError(format!(
                "last row of a rigid transform must be [0, 0, 1], got {:?}",
                m[2]
            )));
        }
        if !(close(a, d) && close(b, -c) && close(a * a + c * c, 1.0)) {
            return Err(PrepError::SchemaError(format!(
                "rotation block is not orthonormal: {:?}",
                [[a, b], [c, d]]
            )));
        }
        Ok(Self::new(c.atan2(a), tx, ty))
    }

    /// Reads the 2×3 `CV_32F` warp produced by `find_transform_ecc()`.
    pub(crate) fn from_ecc_warp(warp: &Mat, motion_type: MotionType) -> Result<Self, PrepError> {
        let tx = *warp.at_2d::<f32>(0, 2)? as f64;
        let ty = *warp.at_2d::<f32>(1, 2)? as f64;
        let angle = match motion_type {
            MotionType::Translation => 0.0,
            MotionType::Euclidean => {
                let cos = *warp.at_2d::<f32>(0, 0)? as f64;
                let sin = *warp.at_2d::<f32>(1, 0)? as f64;
                sin.atan2(cos)
            }
        };
        Ok(Self::new(angle, tx, ty))
    }

    /// The 2×3 `CV_64F` matrix expected by `imgproc::warp_affine()`.
    pub(crate) fn to_affine_mat(&self) -> Result<Mat, PrepError> {
        let m = self.matrix();
        let mut rv = Mat::zeros(2, 3, core::CV_64F)?.to_mat()?;
        for (row, values) in m.iter().take(2).enumerate() {
            for (col, value) in values.iter().enumerate() {
                rv.set_2d::<f64>(row as i32, col as i32, *value)?;
            }
        }
        Ok(rv)
    }

    /// `self ∘ other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &Transform) -> Transform {
        let (sin, cos) = self.angle.sin_cos();
        let angle = self.angle + other.angle;
        Transform::new(
            angle.sin().atan2(angle.cos()),
            cos * other.tx - sin * other.ty + self.tx,
            sin * other.tx + cos * other.ty + self.ty,
        )
    }

    pub fn inverse(&self) -> Transform {
        let (sin, cos) = self.angle.sin_cos();
        Transform::new(
            -self.angle,
            -(cos * self.tx + sin * self.ty),
            -(-sin * self.tx + cos * self.ty),
        )
    }

    /// Maps the point `(x, y)`.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.angle.sin_cos();
        (cos * x - sin * y + self.tx, sin * x + cos * y + self.ty)
    }

    /// Element-wise comparison of the homogeneous matrices.
    pub fn approx_eq(&self, other: &Transform, epsilon: f64) -> bool {
        self.matrix()
            .iter()
            .flatten()
            .zip(other.matrix().iter().flatten())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

/// How a chain entry came to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Kept as is without any estimate, always the case for the first frame.
    Reference,
    /// ECC converged with the given correlation coefficient.
    Estimated { correlation: f64 },
    /// Registration failed for this frame pair, the identity is used instead.
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameTransform {
    pub transform: Transform,
    pub outcome: Outcome,
}

impl FrameTransform {
    pub fn reference() -> Self {
        Self {
            transform: Transform::IDENTITY,
            outcome: Outcome::Reference,
        }
    }

    pub fn estimated(transform: Transform, correlation: f64) -> Self {
        Self {
            transform,
            outcome: Outcome::Estimated { correlation },
        }
    }

    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            transform: Transform::IDENTITY,
            outcome: Outcome::Fallback {
                reason: reason.into(),
            },
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, Outcome::Fallback { .. })
    }
}

/// One transform per time index, entry `t` mapping frame `t` onto frame `t-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformChain {
    entries: Vec<FrameTransform>,
}

impl TransformChain {
    /// Fails with `SchemaError` if `entries` is empty or does not start with
    /// the identity.
    pub fn new(entries: Vec<FrameTransform>) -> Result<Self, PrepError> {
        match entries.first() {
            None => Err(PrepError::SchemaError("empty transform chain".into())),
            Some(first) if !first.transform.is_identity() => Err(PrepError::SchemaError(
                format!("entry 0 must be the identity, got {:?}", first.transform),
            )),
            Some(_) => Ok(Self { entries }),
        }
    }

    /// A chain that leaves `len` frames untouched. No entry claims an ECC
    /// estimate, so [`Self::min_correlation()`] is `None`.
    pub fn identity(len: usize) -> Result<Self, PrepError> {
        if len == 0 {
            return Err(PrepError::NotEnoughFrames);
        }
        Ok(Self {
            entries: vec![FrameTransform::reference(); len],
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FrameTransform> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameTransform> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[FrameTransform] {
        &self.entries
    }

    pub fn transforms(&self) -> impl Iterator<Item = &Transform> {
        self.entries.iter().map(|e| &e.transform)
    }

    /// Rejects a chain computed for a different number of frames.
    pub fn validate_len(&self, expected: usize) -> Result<(), PrepError> {
        if self.entries.len() != expected {
            return Err(PrepError::SchemaError(format!(
                "transform chain has {} entries, expected {}",
                self.entries.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Time indices that fell back to the identity.
    pub fn fallback_frames(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(t, e)| e.is_fallback().then_some(t))
            .collect()
    }

    /// Lowest ECC correlation of the estimated entries, if any.
    pub fn min_correlation(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter_map(|e| match e.outcome {
                Outcome::Estimated { correlation } => Some(OrderedFloat(correlation)),
                _ => None,
            })
            .min()
            .map(|c| c.0)
    }

    /// Transforms mapping each frame straight into frame 0 coordinates.
    /// Only informative, `apply_chain()` always uses the per-pair entries.
    pub fn cumulative(&self) -> Vec<Transform> {
        let mut acc = Transform::IDENTITY;
        self.entries
            .iter()
            .map(|e| {
                acc = acc.compose(&e.transform);
                acc
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a TransformChain {
    type Item = &'a FrameTransform;
    type IntoIter = std::slice::Iter<'a, FrameTransform>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
