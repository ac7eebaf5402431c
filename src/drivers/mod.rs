// src/drivers/mod.rs
pub mod buffer;
pub mod error;
pub mod fft;
pub mod slope;
pub mod source;
pub use buffer::RingBuffer;
pub use error::SweepError;
pub use fft::{welch, PsdParams, Scaling, SpectralEstimator, Spectrum};
pub use slope::{fit_line, LinearFit, SlopeEstimator, SlopeReport, StabilityCriteria};
pub use source::{block_from_fn, same_rate, ManualSource, SampleBlock, SampleSource};
