use clap::{Parser, ValueEnum};

/// Normalization schemes applied to precipitation before windowing.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// log2 rescale fitted on the training partition
    Log,
}

/// Train a ConvLSTM next-frame forecaster on gridded precipitation
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Data set (a NetCDF file with `time`, `pr`, `lat` and `lon` variables)
    pub netcdf: String,

    /// How many epochs to continue training without improving dev loss
    #[arg(long, default_value = "10")]
    pub patience: usize,

    /// The learning rate
    #[arg(long, default_value = "0.001")]
    pub lr: f64,

    /// The minibatch size
    #[arg(long, default_value = "128")]
    pub mb: usize,

    /// The number of steps to unroll for truncated BPTT
    #[arg(long, default_value = "20")]
    pub num_steps: usize,

    /// The maximum length of a sequence
    #[arg(long, default_value = "10")]
    pub max_len: usize,

    /// The number of epochs to train for
    #[arg(long, default_value = "20")]
    pub epochs: usize,

    /// Normalization scheme
    #[arg(long, value_enum)]
    pub normalize: Option<Normalization>,

    /// Train using an area-weighted MSE loss
    #[arg(long, alias = "area_weighted")]
    pub area_weighted: bool,

    /// Model's predictions on the dev set, exported as NetCDF
    #[arg(long, alias = "dev_preds", default_value = "../../outputs/dev_predictions.nc")]
    pub dev_preds: String,

    /// Ground truths of the dev set, exported as NetCDF
    #[arg(long, alias = "dev_truths", default_value = "../../outputs/dev_truths.nc")]
    pub dev_truths: String,

    /// Model's predictions on the test set, exported as NetCDF
    #[arg(long, alias = "test_preds", default_value = "../../outputs/test_predictions.nc")]
    pub test_preds: String,

    /// Save the best model with this prefix; the extension becomes `.mpk`
    #[arg(long, default_value = "/tmp/model.ckpt")]
    pub model: String,

    /// Directory for learner checkpoints, logs and saved configs
    #[arg(long, default_value = "/tmp/precip-convlstm")]
    pub artifact_dir: String,

    /// Seed for weight init and batch shuffling
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of cpu threads to use during batch generation
    #[arg(long, default_value = "4")]
    pub num_workers: usize,
}
