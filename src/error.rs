use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndicatorError {
    #[error("Formula part matches no recognized shape: {0}")]
    InvalidFormulaShape(String),

    #[error("Component coefficient {coefficient} is not a finite number")]
    NonFiniteCoefficient { coefficient: f64 },

    #[error("Balance for account {account} is not a finite number ({value})")]
    NonFiniteBalance { account: String, value: f64 },

    #[error("Calculation failed for indicator '{indicator}': {source}")]
    IndicatorCalculationFailure {
        indicator: String,
        #[source]
        source: Box<IndicatorError>,
    },

    #[error("No indicator definition found for id: {0}")]
    UnknownIndicatorReference(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Validation error for {field}: {details}")]
    ValidationError { field: String, details: String },

    #[error("Balance source error: {0}")]
    BalanceSource(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IndicatorError {
    /// Wraps an evaluation error with the name of the indicator it came from.
    pub fn for_indicator(indicator: &str, source: IndicatorError) -> Self {
        Self::IndicatorCalculationFailure {
            indicator: indicator.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndicatorError>;
