use thiserror::Error;

/// Canonical result for the accounting crates.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid accounting configuration: {0}")]
    Config(String),

    #[error("metrics already registered for tracker '{label}'")]
    MetricsAlreadyBound { label: String },
}
