// https://burn.dev/book/basic-workflow/data.html
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::{Backend, Tensor};
use burn::tensor::{Data, Shape};
use ndarray::Axis;

use crate::split::Partition;

#[derive(Debug, Clone)]
pub(crate) struct WindowItem {
    /// Frames of one window, flattened from `[max_len, lat, lon]`.
    pub frames: Vec<f32>,
}

/// Precipitation windows of one partition, in temporal order.
pub struct PrecipWindowDataset {
    partition: Partition,
}

impl PrecipWindowDataset {
    pub fn new(partition: Partition) -> Self {
        Self { partition }
    }
}

impl Dataset<WindowItem> for PrecipWindowDataset {
    fn get(&self, index: usize) -> Option<WindowItem> {
        if index >= self.len() {
            return None;
        }
        let frames = self
            .partition
            .inputs
            .index_axis(Axis(0), index)
            .iter()
            .copied()
            .collect();

        Some(WindowItem { frames })
    }

    fn len(&self) -> usize {
        self.partition.num_windows()
    }
}

/// Map precipitation windows into batched `[batch, time, channel, lat, lon]` tensors.
#[derive(Clone)]
pub struct PrecipBatcher<B: Backend> {
    device: B::Device,
    /// `(max_len, lat, lon)` of every window.
    window: [usize; 3],
    /// Per-cell loss weights, flattened from `[lat, lon]`.
    area_weights: Option<Vec<f32>>,
}

impl<B: Backend> PrecipBatcher<B> {
    pub fn new(device: B::Device, window: [usize; 3], area_weights: Option<Vec<f32>>) -> Self {
        Self {
            device,
            window,
            area_weights,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PrecipBatch<B: Backend> {
    /// `[batch, max_len, 1, lat, lon]`
    pub frames: Tensor<B, 5>,
    /// `[1, 1, 1, lat, lon]`, broadcast over batch and time
    pub area_weights: Option<Tensor<B, 5>>,
}

impl<B: Backend> Batcher<WindowItem, PrecipBatch<B>> for PrecipBatcher<B> {
    fn batch(&self, items: Vec<WindowItem>) -> PrecipBatch<B> {
        let [max_len, lat, lon] = self.window;
        let batch_size = items.len();

        let values: Vec<f32> = items.into_iter().flat_map(|item| item.frames).collect();
        let frames = Tensor::<B, 5>::from_data(
            Data::new(values, Shape::new([batch_size, max_len, 1, lat, lon])).convert(),
            &self.device,
        );

        let area_weights = self.area_weights.as_ref().map(|weights| {
            Tensor::<B, 5>::from_data(
                Data::new(weights.clone(), Shape::new([1, 1, 1, lat, lon])).convert(),
                &self.device,
            )
        });

        PrecipBatch {
            frames,
            area_weights,
        }
    }
}

/// `cos(latitude)` weights for every grid cell, scaled to average 1.
pub fn area_weights(lat: &[f32], lon_len: usize) -> Vec<f32> {
    let row_weights: Vec<f64> = lat
        .iter()
        .map(|deg| (*deg as f64).to_radians().cos().max(0.0))
        .collect();
    let mean = row_weights.iter().sum::<f64>() / row_weights.len().max(1) as f64;

    row_weights
        .iter()
        .flat_map(|w| std::iter::repeat((w / mean) as f32).take(lon_len))
        .collect()
}
