mod common;

use common::{SIZE, blobs, drifting_pages, max_abs_diff, noise, stripes};
use ometiff_prep::opencv::core::{self, Mat};
use ometiff_prep::opencv::prelude::*;
use ometiff_prep::registration::{apply_chain_to_stack, warp_frame};
use ometiff_prep::{
    EccMatchParameters, FrameStack, MotionType, Outcome, PrepError, Transform, TransformChain,
    apply_chain, estimate_chain,
};

#[test]
fn drift_is_estimated_against_previous_frame() {
    let frames = vec![
        blobs(0.0, 0.0, core::CV_8U, 1.0),
        blobs(2.0, 0.0, core::CV_8U, 1.0),
        blobs(2.0, 0.0, core::CV_8U, 1.0),
    ];
    let chain = estimate_chain(&frames, EccMatchParameters::default()).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain.get(0).unwrap().outcome, Outcome::Reference);

    // frame 1 is frame 0 moved by +2px, aligning it needs the inverse motion
    let step = chain.get(1).unwrap();
    assert!(
        step.transform.approx_eq(&Transform::translation(-2.0, 0.0), 0.1),
        "{:?}",
        step.transform
    );
    assert!(matches!(step.outcome, Outcome::Estimated { correlation } if correlation > 0.9));

    // frame 2 did not move relative to frame 1
    let still = chain.get(2).unwrap();
    assert!(
        still.transform.approx_eq(&Transform::IDENTITY, 0.05),
        "{:?}",
        still.transform
    );
    assert!(chain.fallback_frames().is_empty());
}

#[test]
fn translation_motion_has_no_rotation() {
    let frames = vec![
        blobs(0.0, 0.0, core::CV_16U, 200.0),
        blobs(1.0, -1.5, core::CV_16U, 200.0),
    ];
    let params = EccMatchParameters {
        motion_type: MotionType::Translation,
        ..Default::default()
    };
    let chain = estimate_chain(&frames, params).unwrap();
    let t = chain.get(1).unwrap().transform;
    assert_eq!(t.angle(), 0.0);
    let (tx, ty) = t.offset();
    assert!((tx + 1.0).abs() < 0.1, "{tx}");
    assert!((ty - 1.5).abs() < 0.1, "{ty}");
}

#[test]
fn identical_frames_give_identity_chain() {
    let frames: Vec<Mat> = (0..4).map(|_| blobs(0.0, 0.0, core::CV_8U, 1.0)).collect();
    let chain = estimate_chain(&frames, EccMatchParameters::default()).unwrap();
    assert_eq!(chain.len(), 4);
    for entry in chain.iter() {
        assert!(entry.transform.approx_eq(&Transform::IDENTITY, 1e-3));
        assert!(!entry.is_fallback());
    }
}

#[test]
fn uncorrelated_pair_falls_back_and_chain_continues() {
    let frames = vec![noise(1), noise(2), noise(2)];
    let chain = estimate_chain(&frames, EccMatchParameters::default()).unwrap();
    assert_eq!(chain.len(), 3);

    let failed = chain.get(1).unwrap();
    assert!(failed.is_fallback(), "{:?}", failed.outcome);
    assert!(failed.transform.is_identity());

    let next = chain.get(2).unwrap();
    assert!(!next.is_fallback(), "{:?}", next.outcome);
    assert!(next.transform.approx_eq(&Transform::IDENTITY, 1e-3));
    assert_eq!(chain.fallback_frames(), vec![1]);
}

#[test]
fn reference_chain_is_applied_to_every_channel() {
    let stack = FrameStack::from_pages(drifting_pages(core::CV_16U, 200.0), 2).unwrap();
    let chain = estimate_chain(stack.channel(0).unwrap(), EccMatchParameters::default()).unwrap();
    let registered = apply_chain_to_stack(&stack, &chain).unwrap();

    assert_eq!(registered.time_count(), 3);
    assert_eq!(registered.channel_count(), 2);
    assert_eq!((registered.width(), registered.height()), (SIZE, SIZE));
    assert_eq!(registered.typ(), core::CV_16U);

    for c in 0..2 {
        for (t, entry) in chain.iter().enumerate() {
            let expected = warp_frame(stack.frame(t, c).unwrap(), &entry.transform).unwrap();
            assert_eq!(max_abs_diff(registered.frame(t, c).unwrap(), &expected), 0.0);
        }
    }

    // after registration frame 1 lines up with frame 0 away from the border
    let roi = core::Rect::new(8, 8, SIZE - 16, SIZE - 16);
    let crop = |m: &Mat| Mat::roi(m, roi).unwrap().try_clone().unwrap();
    let f0 = crop(registered.frame(0, 1).unwrap());
    let f1 = crop(registered.frame(1, 1).unwrap());
    let raw1 = crop(stack.frame(1, 1).unwrap());
    assert!(max_abs_diff(&f0, &f1) < max_abs_diff(&f0, &raw1));
}

#[test]
fn non_reference_channel_keeps_geometry() {
    let frames: Vec<Mat> = (0..5).map(|i| stripes(i as f64, core::CV_32F)).collect();
    let chain = TransformChain::new(
        std::iter::once(ometiff_prep::FrameTransform::reference())
            .chain((1..5).map(|_| {
                ometiff_prep::FrameTransform::estimated(Transform::new(0.01, -1.0, 0.5), 0.95)
            }))
            .collect(),
    )
    .unwrap();
    let out = apply_chain(&frames, &chain).unwrap();
    assert_eq!(out.len(), frames.len());
    for frame in &out {
        assert_eq!(frame.size().unwrap(), core::Size::new(SIZE, SIZE));
        assert_eq!(frame.typ(), core::CV_32F);
    }
}

#[test]
fn loaded_chain_of_wrong_length_is_rejected() {
    let frames: Vec<Mat> = (0..7).map(|_| blobs(0.0, 0.0, core::CV_8U, 1.0)).collect();
    let chain = TransformChain::identity(5).unwrap();
    assert!(matches!(
        apply_chain(&frames, &chain),
        Err(PrepError::SchemaError(_))
    ));
}
