//! Logarithmic rescaling of precipitation values.
//!
//! Precipitation is heavily skewed towards zero, so values are moved to log2
//! space, min-max scaled against the training partition into `[0, 2]`, and
//! finally shifted by half the range of the whole scaled series.
use burn::config::Config;
use ndarray::{s, Array3, ArrayBase, DataMut, Dimension};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Added to every value so that dry cells don't hit `log2(0)`.
pub const ZERO_SHIFT_FACTOR: f64 = 1e-6;

/// Statistics of a fitted log normalization, needed to invert it later.
#[derive(Config, Debug)]
pub struct LogNormalizer {
    /// Minimum of the log2 training partition.
    pub train_min: f64,
    /// Maximum of the log2 training partition after subtracting `train_min`.
    pub train_max: f64,
    /// Half the range of the scaled series, subtracted last.
    pub median_shift: f64,
}

impl LogNormalizer {
    /// Fit on the first `train_frames` frames of `series` and normalize the
    /// whole series in place.
    pub fn fit_transform(series: &mut Array3<f32>, train_frames: usize) -> PipelineResult<Self> {
        let train_frames = train_frames.min(series.len_of(ndarray::Axis(0)));
        if train_frames == 0 {
            return Err(PipelineError::NotEnoughFrames {
                frames: series.len_of(ndarray::Axis(0)),
                max_len: 1,
            });
        }

        let mut logged = series.mapv(|v| (v as f64 + ZERO_SHIFT_FACTOR).log2());
        if let Some(((frame, y, x), _)) = logged.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(PipelineError::NonFiniteLog {
                frame,
                value: series[[frame, y, x]],
            });
        }

        let train_min = min_of(logged.slice(s![..train_frames, .., ..]).iter());
        logged.mapv_inplace(|v| v - train_min);
        let train_max = max_of(logged.slice(s![..train_frames, .., ..]).iter());
        if !(train_max.is_finite() && train_max > 0.0) {
            return Err(PipelineError::DegenerateRange(train_max));
        }

        logged.mapv_inplace(|v| v / train_max * 2.0);
        let median_shift = (max_of(logged.iter()) - min_of(logged.iter())) / 2.0;

        series.zip_mut_with(&logged, |out, &v| *out = (v - median_shift) as f32);

        debug!(train_min, train_max, median_shift, "Fitted log normalization");
        Ok(Self::new(train_min, train_max, median_shift))
    }

    /// Apply the fitted forward transform to new values.
    pub fn normalize<S, D>(&self, values: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        values.mapv_inplace(|v| {
            let v = ((v as f64 + ZERO_SHIFT_FACTOR).log2() - self.train_min) / self.train_max;
            (v * 2.0 - self.median_shift) as f32
        });
    }

    /// Undo [`LogNormalizer::normalize`], step by step in reverse order.
    pub fn denormalize<S, D>(&self, values: &mut ArrayBase<S, D>)
    where
        S: DataMut<Elem = f32>,
        D: Dimension,
    {
        values.mapv_inplace(|v| {
            let v = (v as f64 + self.median_shift) / 2.0 * self.train_max + self.train_min;
            (v.exp2() - ZERO_SHIFT_FACTOR) as f32
        });
    }
}

fn min_of<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.copied().fold(f64::INFINITY, f64::min)
}

fn max_of<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.copied().fold(f64::NEG_INFINITY, f64::max)
}
