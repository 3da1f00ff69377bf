use qr_core::adapters::RosterError;
use qr_core::error::ValidationError;
use qr_core::scheduler::SchedulerError;
use qr_core::store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Validation(_) => 2,
            Self::Roster(_) => 2,
            Self::Command(_) => 2,
            Self::Store(_) => 3,
            Self::Scheduler(_) => 4,
            Self::Serialization(_) => 5,
            Self::Io(_) => 10,
            Self::Logging(_) => 10,
        }
    }
}
