//! Error types for loading, splitting, normalizing and exporting precipitation data.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error raised by the NetCDF library
    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    /// Missing required variable
    #[error("Missing variable: {0}")]
    MissingVariable(String),

    /// Missing or non-string attribute on a variable
    #[error("Missing attribute `{attribute}` on variable `{variable}`")]
    MissingAttribute { variable: String, attribute: String },

    /// Array could not be reshaped into the requested layout
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Precipitation frames and timestamps differ in length
    #[error("Precipitation has {frames} frames but time has {times} entries")]
    LengthMismatch { frames: usize, times: usize },

    /// Window length outside the supported range
    #[error("Invalid sequence length {0}: must be at least {1}")]
    InvalidWindowLength(usize, usize),

    /// Not enough frames to build a single window
    #[error("Series of {frames} frames is shorter than one window of {max_len}")]
    NotEnoughFrames { frames: usize, max_len: usize },

    /// Training partition has no spread after the log transform
    #[error("Training partition has a degenerate log range (max - min = {0})")]
    DegenerateRange(f64),

    /// Value with no finite logarithm, such as negative or NaN precipitation
    #[error("Precipitation value {value} in frame {frame} has no finite logarithm")]
    NonFiniteLog { frame: usize, value: f32 },

    /// Grid dimensions don't agree with the coordinate variables
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),
}
