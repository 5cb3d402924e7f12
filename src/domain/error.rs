//! Domain error types.

/// Top-level error type for candlegate.
#[derive(Debug, thiserror::Error)]
pub enum CandlegateError {
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

    #[error("{symbol} is unconfigured: {reason}")]
    Unconfigured { symbol: String, reason: String },

    #[error("candle feed error for {symbol}: {reason}")]
    Feed { symbol: String, reason: String },

    #[error("insufficient data for {symbol}: have {bars} closed candles, need {minimum}")]
    InsufficientData {
        symbol: String,
        bars: usize,
        minimum: usize,
    },

    #[error("position already open for {symbol}")]
    DuplicatePosition { symbol: String },

    #[error("order rejected for {symbol}: {reason}")]
    OrderRejected { symbol: String, reason: String },

    #[error("position sizing failed for {symbol}: {reason}")]
    Sizing { symbol: String, reason: String },

    #[error("state persistence error: {reason}")]
    Persistence { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CandlegateError {
    /// Feed and data errors degrade to "no action this cycle".
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            CandlegateError::Feed { .. } | CandlegateError::InsufficientData { .. }
        )
    }
}

impl From<&CandlegateError> for std::process::ExitCode {
    fn from(err: &CandlegateError) -> Self {
        let code: u8 = match err {
            CandlegateError::Io(_) => 1,
            CandlegateError::ConfigParse { .. }
            | CandlegateError::ConfigMissing { .. }
            | CandlegateError::ConfigInvalid { .. }
            | CandlegateError::Unconfigured { .. } => 2,
            CandlegateError::Persistence { .. } => 3,
            CandlegateError::DuplicatePosition { .. }
            | CandlegateError::OrderRejected { .. }
            | CandlegateError::Sizing { .. } => 4,
            CandlegateError::Feed { .. } | CandlegateError::InsufficientData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
