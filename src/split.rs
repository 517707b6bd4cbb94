//! Chopping a precipitation series into fixed-length windows and
//! partitioning them into train/dev/test splits in temporal order.
use ndarray::{s, Array1, Array2, Array3, Array5, Axis};
use tracing::{info, warn};

use crate::cli::Normalization;
use crate::error::{PipelineError, PipelineResult};
use crate::normalize::LogNormalizer;

/// Share of windows assigned to the training partition, in tenths.
const TRAIN_TENTHS: usize = 7;

/// Number of windows in each partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCounts {
    pub train: usize,
    pub dev: usize,
    pub test: usize,
}

impl PartitionCounts {
    /// Split `num_seqs` windows roughly 70/15/15.
    ///
    /// The training count starts at `round(0.7 * num_seqs)` (ties to even).
    /// When the leftover is odd, the train boundary moves by one window towards
    /// the exact 70% mark so that dev and test end up the same size: up when the
    /// rounding went down or hit it exactly, down when it went up.
    pub fn for_windows(num_seqs: usize) -> Self {
        let scaled = TRAIN_TENTHS * num_seqs;
        let (quot, rem) = (scaled / 10, scaled % 10);
        let mut train = if rem > 5 || (rem == 5 && quot % 2 == 1) {
            quot + 1
        } else {
            quot
        };

        if (num_seqs - train) % 2 != 0 {
            if train * 10 > scaled {
                train -= 1;
            } else {
                train += 1;
            }
        }
        let dev = (num_seqs - train) / 2;
        let counts = Self {
            train,
            dev,
            test: dev,
        };

        assert_eq!(counts.total(), num_seqs, "partition counts must cover every window");
        counts
    }

    pub fn total(&self) -> usize {
        self.train + self.dev + self.test
    }
}

/// Windows and timestamps belonging to one partition.
#[derive(Debug, Clone)]
pub struct Partition {
    /// `[windows, max_len, lat, lon, 1]`
    pub inputs: Array5<f32>,
    /// `[windows, max_len]`
    pub times: Array2<f64>,
}

impl Partition {
    pub fn num_windows(&self) -> usize {
        self.inputs.len_of(Axis(0))
    }

    pub fn max_len(&self) -> usize {
        self.inputs.len_of(Axis(1))
    }

    /// Spatial grid of every frame as `(lat, lon)`.
    pub fn grid(&self) -> (usize, usize) {
        (self.inputs.len_of(Axis(2)), self.inputs.len_of(Axis(3)))
    }
}

/// Result of [`split_data`].
#[derive(Debug, Clone)]
pub struct SequenceSplit {
    pub train: Partition,
    pub dev: Partition,
    pub test: Partition,
    /// Present when the series was log normalized.
    pub normalizer: Option<LogNormalizer>,
}

/// Split `pr` (`[time, lat, lon]`) and its parallel `time` axis into
/// `max_len` windows, normalizing the whole series first if requested.
pub fn split_data(
    mut pr: Array3<f32>,
    time: &[f64],
    norm_type: Option<Normalization>,
    max_len: usize,
) -> PipelineResult<SequenceSplit> {
    let frames = pr.len_of(Axis(0));
    if frames != time.len() {
        return Err(PipelineError::LengthMismatch {
            frames,
            times: time.len(),
        });
    }
    if max_len == 0 {
        return Err(PipelineError::InvalidWindowLength(max_len, 1));
    }

    let num_seqs = frames / max_len;
    if num_seqs == 0 {
        return Err(PipelineError::NotEnoughFrames { frames, max_len });
    }
    let counts = PartitionCounts::for_windows(num_seqs);
    if counts.dev == 0 {
        warn!(
            windows = num_seqs,
            "Too few windows for dev and test partitions; both will be empty"
        );
    }

    let normalizer = match norm_type {
        Some(Normalization::Log) => Some(LogNormalizer::fit_transform(
            &mut pr,
            counts.train * max_len,
        )?),
        None => None,
    };
    debug_assert_eq!(pr.len_of(Axis(0)), frames);

    let (_, lat, lon) = pr.dim();
    let used = num_seqs * max_len;
    let inputs = pr
        .slice(s![..used, .., ..])
        .to_owned()
        .into_shape((num_seqs, max_len, lat, lon, 1))?;
    let times = Array1::from(time[..used].to_vec()).into_shape((num_seqs, max_len))?;

    let dev_ub = counts.train + counts.dev;
    let partition = |lo: usize, hi: usize| Partition {
        inputs: inputs.slice(s![lo..hi, .., .., .., ..]).to_owned(),
        times: times.slice(s![lo..hi, ..]).to_owned(),
    };

    let split = SequenceSplit {
        train: partition(0, counts.train),
        dev: partition(counts.train, dev_ub),
        test: partition(dev_ub, num_seqs),
        normalizer,
    };

    info!(
        windows = num_seqs,
        train = counts.train,
        dev = counts.dev,
        test = counts.test,
        dropped_frames = frames - used,
        "Split series into windows"
    );
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(frames: usize) -> (Array3<f32>, Vec<f64>) {
        let pr = Array3::from_shape_fn((frames, 3, 4), |(t, y, x)| (t * 100 + y * 10 + x) as f32);
        let time = (0..frames).map(|t| t as f64 * 0.5).collect();
        (pr, time)
    }

    #[test]
    fn counts_cover_every_window_and_stay_near_seventy_percent() {
        for frames in 1..400 {
            for max_len in 1..25 {
                let num_seqs = frames / max_len;
                if num_seqs == 0 {
                    continue;
                }
                let counts = PartitionCounts::for_windows(num_seqs);
                assert_eq!(counts.total(), num_seqs);
                assert_eq!(counts.dev, counts.test);
                let target = 0.7 * num_seqs as f64;
                assert!(
                    (counts.train as f64 - target).abs() <= 1.0,
                    "{num_seqs} windows gave {counts:?}"
                );
            }
        }
    }

    #[test]
    fn odd_leftover_moves_one_window_into_training() {
        // round(7.0) leaves 3, so training takes one more.
        assert_eq!(
            PartitionCounts::for_windows(10),
            PartitionCounts { train: 8, dev: 1, test: 1 }
        );
        // round(14.0) leaves 6, split evenly.
        assert_eq!(
            PartitionCounts::for_windows(20),
            PartitionCounts { train: 14, dev: 3, test: 3 }
        );
    }

    #[test]
    fn rounded_up_boundary_gives_a_window_back() {
        // round(2.8) = 3 leaves 1; stepping back to 2 stays within one window of 2.8.
        assert_eq!(
            PartitionCounts::for_windows(4),
            PartitionCounts { train: 2, dev: 1, test: 1 }
        );
        // 3.5 ties to 4, leaving 1.
        assert_eq!(
            PartitionCounts::for_windows(5),
            PartitionCounts { train: 3, dev: 1, test: 1 }
        );
        // 4.5 ties to 4, leaving 5; the boundary moves up.
        assert_eq!(
            PartitionCounts::for_windows(15),
            PartitionCounts { train: 11, dev: 2, test: 2 }
        );
        // round(16.8) = 17 leaves 7; stepping back keeps 16/4/4.
        assert_eq!(
            PartitionCounts::for_windows(24),
            PartitionCounts { train: 16, dev: 4, test: 4 }
        );
    }

    #[test]
    fn up_to_three_windows_leave_dev_and_test_empty() {
        for (windows, train) in [(1, 1), (2, 2), (3, 3)] {
            assert_eq!(
                PartitionCounts::for_windows(windows),
                PartitionCounts { train, dev: 0, test: 0 }
            );
        }

        let (pr, time) = series(30);
        let split = split_data(pr, &time, None, 10).unwrap();
        assert_eq!(split.train.num_windows(), 3);
        assert_eq!(split.dev.inputs.dim(), (0, 10, 3, 4, 1));
        assert_eq!(split.test.times.dim(), (0, 10));
    }

    #[test]
    fn hundred_frames_make_ten_windows() {
        let (pr, time) = series(100);
        let split = split_data(pr, &time, None, 10).unwrap();

        assert_eq!(split.train.num_windows(), 8);
        assert_eq!(split.dev.num_windows(), 1);
        assert_eq!(split.test.num_windows(), 1);
        assert_eq!(split.train.inputs.dim(), (8, 10, 3, 4, 1));
        assert_eq!(split.dev.times.dim(), (1, 10));
        assert!(split.normalizer.is_none());
    }

    #[test]
    fn windows_follow_temporal_order_and_drop_the_remainder() {
        let (pr, time) = series(107);
        let split = split_data(pr, &time, None, 10).unwrap();

        // 10 windows, last 7 frames discarded
        assert_eq!(split.test.times[[0, 9]], 99.0 * 0.5);
        assert_eq!(split.train.times[[0, 0]], 0.0);
        assert_eq!(split.dev.times[[0, 0]], 80.0 * 0.5);

        // frame 83, cell (2, 1) sits in dev window 0, step 3
        assert_eq!(split.dev.inputs[[0, 3, 2, 1, 0]], 8321.0);
    }

    #[test]
    fn log_normalization_keeps_window_layout() {
        let (pr, time) = series(60);
        let split = split_data(pr.clone(), &time, Some(Normalization::Log), 6).unwrap();
        let normalizer = split.normalizer.as_ref().unwrap();

        assert_eq!(split.train.num_windows() + split.dev.num_windows() + split.test.num_windows(), 10);

        let mut restored = split.dev.inputs.clone();
        normalizer.denormalize(&mut restored);
        let expected = pr[[split.train.num_windows() * 6, 1, 2]];
        let got = restored[[0, 0, 1, 2, 0]];
        assert!((got - expected).abs() <= 1e-5 * expected.max(1.0));
    }

    #[test]
    fn mismatched_time_axis_is_rejected() {
        let (pr, time) = series(20);
        let err = split_data(pr, &time[..19], None, 5).unwrap_err();
        assert!(matches!(err, PipelineError::LengthMismatch { frames: 20, times: 19 }));
    }

    #[test]
    fn series_shorter_than_a_window_is_rejected() {
        let (pr, time) = series(4);
        let err = split_data(pr, &time, None, 5).unwrap_err();
        assert!(matches!(err, PipelineError::NotEnoughFrames { frames: 4, max_len: 5 }));
    }
}
