use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The market-data source has no price for the requested ticker/date.
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    /// Metric inputs that make the computation undefined (zero reference
    /// price, target equal to reference). The report is skipped and flagged.
    #[error("Invalid metric input: {0}")]
    InvalidMetricInput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Report source fetch error: {0}")]
    SourceFetch(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
