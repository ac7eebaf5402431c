use thiserror::Error;
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("sample rate mismatch: expected {expected}, got {actual}")]
    SampleRateMismatch { expected: f64, actual: f64 },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("{0} sweep axis is empty")]
    EmptyAxis(&'static str),
    #[error("channel mapping error: {0}")]
    ChannelMapping(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("malformed spectral buffer: need {required} rows x >0 channels, got {rows} x {channels}")]
    SpectrumShape {
        required: usize,
        rows: usize,
        channels: usize,
    },
    #[error("sweep index out of range: {0}")]
    IndexOutOfRange(String),
    #[error("sweep already finished")]
    SweepFinished,
    #[error("bias actuator failed: {0}")]
    Actuator(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}
