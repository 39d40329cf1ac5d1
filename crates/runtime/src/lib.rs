//! Evolimo Runtime
//!
//! Executes the compiled IR: per-step update kernel, fixed-capacity spatial
//! grid, phenotype engine, initialization, and the step driver.

pub mod device;
pub mod driver;
pub mod error;
pub mod grid;
pub mod init;
pub mod kernel;
pub mod phenotype;
pub mod recorder;

pub use device::select_device;
pub use driver::Simulation;
pub use error::{Error, Result};
pub use kernel::{StepStats, UpdateKernel};
pub use phenotype::Phenotype;
pub use recorder::{EvoConfig, EvoHeader, EvoRecorder};
