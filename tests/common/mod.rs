#![allow(dead_code)]

use ometiff_prep::opencv::core::{self, Mat, Vector};
use ometiff_prep::opencv::imgcodecs;
use ometiff_prep::opencv::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::path::Path;

pub const SIZE: i32 = 96;

/// Smooth bright field like frame: a few Gaussian blobs on a flat
/// background, with the whole content shifted by `(dx, dy)` pixels.
pub fn blobs(dx: f64, dy: f64, typ: i32, gain: f64) -> Mat {
    const BLOBS: [(f64, f64, f64, f64); 4] = [
        (30.0, 35.0, 7.0, 150.0),
        (62.0, 28.0, 9.0, 120.0),
        (45.0, 66.0, 6.0, 90.0),
        (75.0, 72.0, 8.0, 60.0),
    ];
    let mut m = Mat::new_rows_cols_with_default(SIZE, SIZE, core::CV_64F, core::Scalar::all(0.0))
        .unwrap();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let (px, py) = (x as f64 - dx, y as f64 - dy);
            let v = BLOBS.iter().fold(20.0, |acc, (cx, cy, sigma, amp)| {
                let d2 = (px - cx).powi(2) + (py - cy).powi(2);
                acc + amp * (-d2 / (2.0 * sigma * sigma)).exp()
            });
            *m.at_2d_mut::<f64>(y, x).unwrap() = v.min(255.0) * gain;
        }
    }
    let mut out = Mat::default();
    m.convert_to(&mut out, typ, 1.0, 0.0).unwrap();
    out
}

/// A second channel with different content, shifted the same way.
pub fn stripes(dx: f64, typ: i32) -> Mat {
    let mut m = Mat::new_rows_cols_with_default(SIZE, SIZE, core::CV_64F, core::Scalar::all(0.0))
        .unwrap();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let px = x as f64 - dx;
            *m.at_2d_mut::<f64>(y, x).unwrap() =
                100.0 + 80.0 * (px / 6.0).sin() + y as f64 * 0.5;
        }
    }
    let mut out = Mat::default();
    m.convert_to(&mut out, typ, 1.0, 0.0).unwrap();
    out
}

pub fn noise(seed: u64) -> Mat {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut m = Mat::new_rows_cols_with_default(SIZE, SIZE, core::CV_8U, core::Scalar::all(0.0))
        .unwrap();
    for y in 0..SIZE {
        for x in 0..SIZE {
            *m.at_2d_mut::<u8>(y, x).unwrap() = rng.gen_range(0..=255u8);
        }
    }
    m
}

pub fn max_abs_diff(a: &Mat, b: &Mat) -> f64 {
    core::norm2(a, b, core::NORM_INF, &Mat::default()).unwrap()
}

/// Writes pages in XYCZT order, the layout `OmeTiffReader` expects.
pub fn write_tiff(path: &Path, pages: Vec<Mat>) {
    let pages: Vector<Mat> = pages.into_iter().collect();
    assert!(imgcodecs::imwritemulti(path.to_str().unwrap(), &pages, &Vector::new()).unwrap());
}

/// Channel 0: `{A, shift(A, +2px), shift(A, +2px)}`, channel 1 drifting along.
pub fn drifting_pages(typ: i32, gain: f64) -> Vec<Mat> {
    [0.0, 2.0, 2.0]
        .iter()
        .flat_map(|dx| [blobs(*dx, 0.0, typ, gain), stripes(*dx, typ)])
        .collect()
}
