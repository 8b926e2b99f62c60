//! Error types for everything above the provider boundary: state-change
//! execution, discovery, and configuration loading.

use flocker_common::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("host command failed: {0}")]
    HostCommand(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("one or more parallel changes failed: {0} of {1}")]
    ParallelFailure(usize, usize),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for environment variable {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}
