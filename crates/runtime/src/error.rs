//! Runtime errors

use thiserror::Error;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    /// Backend failure, including broadcast/transpose/slice shape errors.
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error("operation `{op}` reads `{name}`, which no earlier op produced")]
    UnknownBinding { op: String, name: String },

    #[error("unknown state variable `{0}`")]
    UnknownStateVar(String),

    #[error("parameter tensor for group `{0}` was not provided")]
    MissingGroup(String),

    #[error("IR uses grid operations but carries no grid_config")]
    MissingGridConfig,

    #[error("grid_gather/stencil executed before any grid_scatter this step")]
    MissingScatter,

    #[error("stencil kernel produced {got} channels, grid carries {expected}")]
    KernelChannelMismatch { expected: usize, got: usize },

    #[error("invalid normal distribution (std = {0})")]
    InvalidNormal(f64),

    #[error("failed to read/write replay output: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header JSON: {0}")]
    Json(#[from] serde_json::Error),
}
