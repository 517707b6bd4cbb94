use std::path::{Path, PathBuf};

use burn::data::dataloader::DataLoaderBuilder;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::AdamConfig;
use burn::prelude::{Backend, Config, Module, Tensor};
use burn::record::{CompactRecorder, FileRecorder};
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::store::{Aggregate, Direction, Split};
use burn::train::metric::{Adaptor, CpuUse, LossInput, LossMetric};
use burn::train::{
    LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition, TrainOutput, TrainStep,
    ValidStep,
};
use derive_new::new;
use tracing::info;

use crate::data::{PrecipBatch, PrecipBatcher, PrecipWindowDataset};
use crate::model::{PrecipForecaster, PrecipForecasterConfig};
use crate::split::Partition;

/// Regression output of a next-frame forecast over whole windows.
#[derive(new)]
pub struct ForecastOutput<B: Backend> {
    /// The loss.
    pub loss: Tensor<B, 1>,
    /// The output [batch_size, steps, channels, lat, lon]
    pub output: Tensor<B, 5>,
    /// The targets [batch_size, steps, channels, lat, lon]
    pub targets: Tensor<B, 5>,
}

impl<B: Backend> Adaptor<LossInput<B>> for ForecastOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

/// Forward pass to get loss value
impl<B: Backend> PrecipForecaster<B> {
    /// Feed frames `0..max_len - 1` and score the predictions against frames
    /// `1..max_len`, optionally weighting every cell by its area.
    pub fn forward_regression(
        &self,
        frames: Tensor<B, 5>,
        area_weights: Option<Tensor<B, 5>>,
    ) -> ForecastOutput<B> {
        let [batch_size, steps, channels, lat, lon] = frames.dims();
        let inputs = frames
            .clone()
            .slice([0..batch_size, 0..steps - 1, 0..channels, 0..lat, 0..lon]);
        let targets = frames.slice([0..batch_size, 1..steps, 0..channels, 0..lat, 0..lon]);

        let output = self.forward(inputs);
        let loss = match area_weights {
            Some(weights) => {
                let diff = output.clone() - targets.clone();
                (diff.clone() * diff * weights).mean()
            }
            None => MseLoss::new().forward(output.clone(), targets.clone(), Reduction::Mean),
        };

        ForecastOutput::new(loss, output, targets)
    }
}

/// Training step
impl<B: AutodiffBackend> TrainStep<PrecipBatch<B>, ForecastOutput<B>> for PrecipForecaster<B> {
    fn step(&self, batch: PrecipBatch<B>) -> TrainOutput<ForecastOutput<B>> {
        let item = self.forward_regression(batch.frames, batch.area_weights);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

/// Validation step
impl<B: Backend> ValidStep<PrecipBatch<B>, ForecastOutput<B>> for PrecipForecaster<B> {
    fn step(&self, batch: PrecipBatch<B>) -> ForecastOutput<B> {
        self.forward_regression(batch.frames, batch.area_weights)
    }
}

/// Hyperparameters for the PrecipForecaster
#[derive(Config)]
pub struct TrainingConfig {
    pub model: PrecipForecasterConfig,
    pub optimizer: AdamConfig,

    #[config(default = 20)]
    pub num_epochs: usize,

    #[config(default = 128)]
    pub batch_size: usize,

    #[config(default = 4)]
    pub num_workers: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1.0e-3)]
    pub learning_rate: f64,

    /// Epochs without a lower validation loss before training stops.
    #[config(default = 10)]
    pub patience: usize,

    #[config(default = false)]
    pub area_weighted: bool,
}

pub(crate) fn create_artifact_dir(artifact_dir: &str) {
    // Remove existing artifacts before to get an accurate learner summary
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir).ok();
}

/// Where the recorder actually writes a model saved under `prefix`: any
/// extension on `prefix` is replaced by the recorder's own.
pub fn recorded_model_path<B: Backend>(prefix: &str) -> PathBuf {
    Path::new(prefix).with_extension(<CompactRecorder as FileRecorder<B>>::file_extension())
}

/// Train on `train`, validate on `dev`, and save the fitted model under
/// `artifact_dir/model` as well as at `model_path` (see [`recorded_model_path`]).
pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    model_path: &str,
    config: TrainingConfig,
    train: Partition,
    dev: Partition,
    area_weights: Option<Vec<f32>>,
    device: B::Device,
) -> std::io::Result<()> {
    create_artifact_dir(artifact_dir);
    config.save(format!("{artifact_dir}/config.json"))?;

    B::seed(config.seed);

    let (lat, lon) = train.grid();
    let window = [train.max_len(), lat, lon];
    let area_weights = area_weights.filter(|_| config.area_weighted);

    // Setup dataloaders
    let batcher_train = PrecipBatcher::<B>::new(device.clone(), window, area_weights.clone());
    let batcher_valid = PrecipBatcher::<B::InnerBackend>::new(device.clone(), window, area_weights);

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(PrecipWindowDataset::new(train));

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(PrecipWindowDataset::new(dev));

    // Setup learner
    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(CpuUse::new())
        .metric_valid_numeric(CpuUse::new())
        .with_file_checkpointer(CompactRecorder::new())
        .early_stopping(MetricEarlyStoppingStrategy::new::<LossMetric<B>>(
            Aggregate::Mean,
            Direction::Lowest,
            Split::Valid,
            StoppingCondition::NoImprovementSince {
                n_epochs: config.patience,
            },
        ))
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    // Start training
    let model_trained = learner.fit(dataloader_train, dataloader_valid);

    model_trained
        .clone()
        .save_file(format!("{artifact_dir}/model"), &CompactRecorder::new())
        .map_err(|err| std::io::Error::other(format!("{err:?}")))?;
    model_trained
        .save_file(model_path, &CompactRecorder::new())
        .map_err(|err| std::io::Error::other(format!("{err:?}")))?;

    let saved_path = recorded_model_path::<B>(model_path);
    info!(
        artifact_dir,
        model_path = %saved_path.display(),
        "Saved trained model"
    );
    Ok(())
}
