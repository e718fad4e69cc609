//! In-memory `time × channel × height × width` dataset.

use crate::PrepError;
use opencv::core::{self, Mat};
use opencv::prelude::*;

/// A decoded hyperstack, stored channel major: `channels[c][t]`.
///
/// All frames are single channel and share one size and pixel type. There is
/// at least one channel and at least one time point.
#[derive(Debug)]
pub struct FrameStack {
    channels: Vec<Vec<Mat>>,
    size: core::Size,
    typ: i32,
    depth: i32,
}

impl FrameStack {
    /// Builds a stack from per-channel frame sequences.
    pub fn from_channels(channels: Vec<Vec<Mat>>) -> Result<Self, PrepError> {
        let time_count = channels
            .first()
            .map(Vec::len)
            .ok_or_else(|| PrepError::InvalidStack("no channels".into()))?;
        if time_count == 0 {
            return Err(PrepError::InvalidStack("no time points".into()));
        }
        if let Some((c, frames)) = channels
            .iter()
            .enumerate()
            .find(|(_, frames)| frames.len() != time_count)
        {
            return Err(PrepError::InvalidStack(format!(
                "channel {} has {} time points, channel 0 has {}",
                c,
                frames.len(),
                time_count
            )));
        }

        let first = &channels[0][0];
        let size = first.size()?;
        let typ = first.typ();
        let depth = first.depth();
        let channel_count = channels.len();
        for (c, frames) in channels.iter().enumerate() {
            for (t, frame) in frames.iter().enumerate() {
                if frame.channels() != 1 {
                    return Err(PrepError::InvalidStack(format!(
                        "frame (t={}, c={}) has {} samples per pixel, expected 1",
                        t,
                        c,
                        frame.channels()
                    )));
                }
                let found = frame.size()?;
                if found != size {
                    return Err(PrepError::DimensionMismatch {
                        index: t * channel_count + c,
                        expected: (size.width, size.height),
                        found: (found.width, found.height),
                    });
                }
                if frame.typ() != typ {
                    return Err(PrepError::InvalidStack(format!(
                        "frame (t={}, c={}) has pixel type {}, expected {}",
                        t,
                        c,
                        frame.typ(),
                        typ
                    )));
                }
            }
        }
        Ok(Self {
            channels,
            size,
            typ,
            depth,
        })
    }

    /// De-interleaves TIFF pages written in XYCZT order (the channel index
    /// varies fastest): page `i` holds time `i / channel_count`, channel
    /// `i % channel_count`.
    pub fn from_pages(pages: Vec<Mat>, channel_count: usize) -> Result<Self, PrepError> {
        if channel_count == 0 {
            return Err(PrepError::InvalidParams("channel count must be at least 1".into()));
        }
        if pages.is_empty() {
            return Err(PrepError::InvalidStack("no pages".into()));
        }
        if pages.len() % channel_count != 0 {
            return Err(PrepError::InvalidStack(format!(
                "{} pages cannot be split into {} channels",
                pages.len(),
                channel_count
            )));
        }
        let time_count = pages.len() / channel_count;
        let mut channels: Vec<Vec<Mat>> = (0..channel_count)
            .map(|_| Vec::with_capacity(time_count))
            .collect();
        for (i, page) in pages.into_iter().enumerate() {
            channels[i % channel_count].push(page);
        }
        Self::from_channels(channels)
    }

    pub fn time_count(&self) -> usize {
        self.channels[0].len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn height(&self) -> i32 {
        self.size.height
    }

    pub fn width(&self) -> i32 {
        self.size.width
    }

    /// OpenCV pixel type shared by all frames, e.g. `CV_16UC1`.
    pub fn typ(&self) -> i32 {
        self.typ
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn channels(&self) -> &[Vec<Mat>] {
        &self.channels
    }

    /// The time sequence of one channel.
    pub fn channel(&self, channel: usize) -> Result<&[Mat], PrepError> {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                PrepError::InvalidParams(format!(
                    "channel {} out of range, the stack has {} channel(s)",
                    channel,
                    self.channels.len()
                ))
            })
    }

    pub fn frame(&self, time: usize, channel: usize) -> Option<&Mat> {
        self.channels.get(channel).and_then(|frames| frames.get(time))
    }
}

/// Short name of an OpenCV depth, as written to the metadata sidecar.
pub fn depth_name(depth: i32) -> &'static str {
    match depth {
        core::CV_8U => "u8",
        core::CV_8S => "i8",
        core::CV_16U => "u16",
        core::CV_16S => "i16",
        core::CV_32S => "i32",
        core::CV_32F => "f32",
        core::CV_64F => "f64",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f64, typ: i32) -> Mat {
        Mat::new_rows_cols_with_default(4, 6, typ, core::Scalar::all(value)).unwrap()
    }

    #[test]
    fn test_from_pages_deinterleaves_channels() {
        // t0c0, t0c1, t1c0, t1c1, t2c0, t2c1
        let pages = (0..6).map(|i| constant(i as f64, core::CV_8U)).collect();
        let stack = FrameStack::from_pages(pages, 2).unwrap();
        assert_eq!(stack.time_count(), 3);
        assert_eq!(stack.channel_count(), 2);
        assert_eq!((stack.width(), stack.height()), (6, 4));
        assert_eq!(*stack.frame(2, 0).unwrap().at_2d::<u8>(0, 0).unwrap(), 4);
        assert_eq!(*stack.frame(1, 1).unwrap().at_2d::<u8>(0, 0).unwrap(), 3);
        assert_eq!(stack.channel(1).unwrap().len(), 3);
        assert_eq!(depth_name(stack.depth()), "u8");
    }

    #[test]
    fn test_from_pages_rejects_uneven_split() {
        let pages = (0..5).map(|_| constant(0.0, core::CV_8U)).collect();
        assert!(matches!(
            FrameStack::from_pages(pages, 2),
            Err(PrepError::InvalidStack(_))
        ));
        assert!(matches!(
            FrameStack::from_pages(vec![], 1),
            Err(PrepError::InvalidStack(_))
        ));
    }

    #[test]
    fn test_mismatched_geometry() {
        let odd = Mat::new_rows_cols_with_default(5, 6, core::CV_8U, core::Scalar::all(0.0))
            .unwrap();
        let pages = vec![constant(0.0, core::CV_8U), odd];
        assert!(matches!(
            FrameStack::from_pages(pages, 1),
            Err(PrepError::DimensionMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_mixed_pixel_types() {
        let pages = vec![constant(0.0, core::CV_8U), constant(0.0, core::CV_16U)];
        assert!(matches!(
            FrameStack::from_pages(pages, 1),
            Err(PrepError::InvalidStack(_))
        ));
    }

    #[test]
    fn test_channel_out_of_range() {
        let stack = FrameStack::from_pages(vec![constant(0.0, core::CV_16U)], 1).unwrap();
        assert!(matches!(
            stack.channel(1),
            Err(PrepError::InvalidParams(_))
        ));
        assert!(stack.frame(0, 1).is_none());
    }
}
