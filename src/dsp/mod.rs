//! DSP module
//!
//! Signal processing used by the rendering pipeline: sample-rate conversion,
//! output highpass and gain smoothing.

pub mod highpass;
pub mod resampler;
pub mod smoothed_value;

pub use highpass::HighPass;
pub use resampler::{Quality, Resampler};
pub use smoothed_value::SmoothedValue;
