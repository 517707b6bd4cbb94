// https://burn.dev/book/basic-workflow/inference.html
use std::path::Path;

use anyhow::Context;
use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::record::{CompactRecorder, Recorder};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{s, Array3, Array5, Axis};
use num_traits::ToPrimitive;
use tracing::info;

use crate::data::{PrecipBatcher, PrecipWindowDataset};
use crate::error::PipelineResult;
use crate::model::PrecipForecaster;
use crate::netcdf_io::{export_netcdf, ExportConfig};
use crate::normalize::LogNormalizer;
use crate::split::{Partition, SequenceSplit};
use crate::training::TrainingConfig;

/// Where the three exported files go.
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub dev_preds: String,
    pub dev_truths: String,
    pub test_preds: String,
}

/// Reload the trained model from `artifact_dir`, predict on the dev and test
/// windows, and export predictions and dev truths (denormalized) to NetCDF.
pub(crate) fn infer<B: Backend>(
    artifact_dir: &str,
    split: &SequenceSplit,
    reference: &netcdf::File,
    paths: &ExportPaths,
    device: B::Device,
) -> anyhow::Result<()> {
    let config = TrainingConfig::load(format!("{artifact_dir}/config.json"))
        .map_err(|err| anyhow::anyhow!("Config should exist for the model: {err:?}"))?;
    let record = CompactRecorder::new()
        .load(format!("{artifact_dir}/model").into(), &device)
        .map_err(|err| anyhow::anyhow!("Trained model should exist: {err:?}"))?;

    let model: PrecipForecaster<B> = config.model.init::<B>(&device).load_record(record);
    let export_config = ExportConfig::new();
    let normalizer = split.normalizer.as_ref();

    let dev_preds = predict(&model, &split.dev, device.clone())?;
    write_frames(dev_preds, &split.dev, normalizer, reference, &paths.dev_preds, &export_config)?;

    let dev_truths = split.dev.inputs.slice(s![.., 1.., .., .., ..]).to_owned();
    write_frames(dev_truths, &split.dev, normalizer, reference, &paths.dev_truths, &export_config)?;

    let test_preds = predict(&model, &split.test, device)?;
    write_frames(test_preds, &split.test, normalizer, reference, &paths.test_preds, &export_config)?;

    Ok(())
}

/// Next-frame predictions for every window of `partition`, in window order.
///
/// Returns `[windows, max_len - 1, lat, lon, 1]`, step `t` forecasting frame `t + 1`.
pub(crate) fn predict<B: Backend>(
    model: &PrecipForecaster<B>,
    partition: &Partition,
    device: B::Device,
) -> PipelineResult<Array5<f32>> {
    let windows = partition.num_windows();
    let steps = partition.max_len() - 1;
    let (lat, lon) = partition.grid();

    // Single worker keeps batches in window order
    let batcher = PrecipBatcher::<B>::new(device, [partition.max_len(), lat, lon], None);
    let dataloader = DataLoaderBuilder::new(batcher)
        .batch_size(16)
        .num_workers(1)
        .build(PrecipWindowDataset::new(partition.clone()));

    let progress = ProgressBar::new(windows as u64);
    if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} windows") {
        progress.set_style(style);
    }
    progress.set_message("Predicting");

    let mut values = Vec::with_capacity(windows * steps * lat * lon);
    for batch in dataloader.iter() {
        let [batch_size, max_len, channels, _, _] = batch.frames.dims();
        let inputs = batch
            .frames
            .slice([0..batch_size, 0..max_len - 1, 0..channels]);
        let predictions: Tensor<B, 5> = model.forward(inputs);

        // Convert predicted tensor to numerical values
        values.extend(
            predictions
                .into_data()
                .value
                .into_iter()
                .map(|e| e.to_f32().unwrap_or(f32::NAN)),
        );
        progress.inc(batch_size as u64);
    }
    progress.finish_and_clear();

    Ok(Array5::from_shape_vec((windows, steps, lat, lon, 1), values)?)
}

/// Flatten `[windows, steps, lat, lon, 1]` frames into a `[time, lat, lon]`
/// series with the timestamps of frames `1..max_len` of each window.
pub(crate) fn flatten_frames(
    frames: Array5<f32>,
    partition: &Partition,
) -> PipelineResult<(Array3<f32>, Vec<f64>)> {
    let (windows, steps, lat, lon, _) = frames.dim();
    let series = frames
        .as_standard_layout()
        .into_owned()
        .into_shape((windows * steps, lat, lon))?;

    let times = partition
        .times
        .axis_iter(Axis(0))
        .flat_map(|row| row.iter().skip(1).copied().collect::<Vec<_>>())
        .collect();

    Ok((series, times))
}

fn write_frames(
    frames: Array5<f32>,
    partition: &Partition,
    normalizer: Option<&LogNormalizer>,
    reference: &netcdf::File,
    filename: &str,
    export_config: &ExportConfig,
) -> anyhow::Result<()> {
    let (mut series, times) = flatten_frames(frames, partition)?;
    if let Some(normalizer) = normalizer {
        normalizer.denormalize(&mut series);
    }

    export_netcdf(series.view(), reference, Path::new(filename), &times, export_config)
        .with_context(|| format!("Failed writing {filename}"))?;
    info!("Finished writing {} frames to {}", times.len(), filename);
    Ok(())
}
