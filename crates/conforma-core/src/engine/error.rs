use thiserror::Error;

use super::config::ConfigError;
use crate::core::energy::io::SnapshotError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Energy matrix snapshot error: {source}")]
    Snapshot {
        #[from]
        source: SnapshotError,
    },

    #[error(
        "Energy matrix was computed under pruning interval {tagged} but the search requires {required}"
    )]
    StaleEnergyMatrix { tagged: f64, required: f64 },

    #[error("Internal logic error: {0}")]
    Internal(String),
}
