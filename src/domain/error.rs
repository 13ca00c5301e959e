//! Domain error types.

/// Failure to reduce a prediction set to a single consensus call.
///
/// This is a caller-visible condition rather than a fatal error: the signal
/// feed turns it into [`SignalOutcome::Unavailable`](super::signal::SignalOutcome)
/// and the engine replays such bars as `hold`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnsembleError {
    #[error("no predictions to combine")]
    Empty,

    #[error("no consensus possible: total model weight is {total_weight}")]
    NoConsensus { total_weight: f64 },

    #[error("invalid prediction from {model}: {reason}")]
    InvalidPrediction { model: String, reason: String },

    #[error("calibration failed: {reason}")]
    Calibration { reason: String },
}

/// Top-level error type for quantsim.
#[derive(Debug, thiserror::Error)]
pub enum QuantsimError {
    #[error("invalid bar at index {index}: {reason}")]
    InvalidBar { index: usize, reason: String },

    #[error("timestamps not strictly increasing at index {index}")]
    UnorderedTimestamps { index: usize },

    #[error("bar series is empty")]
    EmptySeries,

    #[error("{signals} signals supplied for {bars} bars")]
    SignalLengthMismatch { signals: usize, bars: usize },

    #[error("invalid signal at index {index}: {reason}")]
    InvalidSignal { index: usize, reason: String },

    #[error("initial capital must be positive and finite, got {value}")]
    InvalidCapital { value: f64 },

    #[error("invalid execution parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Ensemble(#[from] EnsembleError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl QuantsimError {
    /// True for errors raised by input validation before a run starts.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            QuantsimError::InvalidBar { .. }
                | QuantsimError::UnorderedTimestamps { .. }
                | QuantsimError::EmptySeries
                | QuantsimError::SignalLengthMismatch { .. }
                | QuantsimError::InvalidSignal { .. }
                | QuantsimError::InvalidCapital { .. }
                | QuantsimError::InvalidParameter { .. }
        )
    }
}

impl From<&QuantsimError> for std::process::ExitCode {
    fn from(err: &QuantsimError) -> Self {
        let code: u8 = match err {
            QuantsimError::Io(_) | QuantsimError::Data { .. } | QuantsimError::Report { .. } => 1,
            QuantsimError::ConfigParse { .. }
            | QuantsimError::ConfigMissing { .. }
            | QuantsimError::ConfigInvalid { .. } => 2,
            QuantsimError::InvalidBar { .. }
            | QuantsimError::UnorderedTimestamps { .. }
            | QuantsimError::EmptySeries
            | QuantsimError::SignalLengthMismatch { .. }
            | QuantsimError::InvalidSignal { .. }
            | QuantsimError::InvalidCapital { .. }
            | QuantsimError::InvalidParameter { .. } => 4,
            QuantsimError::Ensemble(_) => 5,
        };
        std::process::ExitCode::from(code)
    }
}
