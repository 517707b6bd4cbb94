// https://burn.dev/book/basic-workflow/backend.html
mod cli;
mod data;
mod error;
mod inference;
mod model;
mod netcdf_io;
mod normalize;
mod split;
mod training;

use anyhow::Context;
use burn::backend::wgpu::AutoGraphicsApi;
use burn::backend::{Autodiff, Wgpu};
use burn::config::Config;
use burn::optim::AdamConfig;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::inference::ExportPaths;
use crate::model::PrecipForecasterConfig;
use crate::training::TrainingConfig;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    if args.max_len < 2 {
        anyhow::bail!("--max-len must be at least 2 to forecast the next frame");
    }

    type MyBackend = Wgpu<AutoGraphicsApi, f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;
    let device = burn::backend::wgpu::WgpuDevice::BestAvailable;

    let nc = netcdf::open(&args.netcdf)
        .with_context(|| format!("Failed to open NetCDF file {}", args.netcdf))?;
    let series = netcdf_io::load_series(&nc)?;
    let lat = netcdf_io::read_coordinate(&nc, "lat")?;

    let split = split::split_data(series.pr, &series.time, args.normalize, args.max_len)?;
    info!("Finished loading and splitting data.");

    let (lat_len, lon_len) = split.train.grid();
    if lat.len() != lat_len {
        return Err(error::PipelineError::InvalidGrid(format!(
            "`lat` has {} values but `pr` has {lat_len} rows",
            lat.len()
        ))
        .into());
    }
    let area_weights = data::area_weights(&lat, lon_len);

    let config = TrainingConfig::new(
        PrecipForecasterConfig::new().with_tbptt_steps(args.num_steps),
        AdamConfig::new(),
    )
    .with_num_epochs(args.epochs)
    .with_batch_size(args.mb)
    .with_num_workers(args.num_workers)
    .with_seed(args.seed)
    .with_learning_rate(args.lr)
    .with_patience(args.patience)
    .with_area_weighted(args.area_weighted);

    training::train::<MyAutodiffBackend>(
        &args.artifact_dir,
        &args.model,
        config,
        split.train.clone(),
        split.dev.clone(),
        Some(area_weights),
        device.clone(),
    )
    .context("Training failed")?;

    if let Some(normalizer) = &split.normalizer {
        normalizer
            .save(format!("{}/normalizer.json", args.artifact_dir))
            .context("Failed to save normalization statistics")?;
    }

    let paths = ExportPaths {
        dev_preds: args.dev_preds,
        dev_truths: args.dev_truths,
        test_preds: args.test_preds,
    };
    inference::infer::<MyBackend>(&args.artifact_dir, &split, &nc, &paths, device)?;

    Ok(())
}
