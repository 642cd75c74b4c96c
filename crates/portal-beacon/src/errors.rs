use portal_metadata::MetadataError;
use portal_state::StateError;
use thiserror::Error;

/// Failures while producing or replaying a beacon height. All of them halt the height.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BeaconError {
    #[error("consensus internal error: {0}")]
    ConsensusInternal(String),

    #[error("instruction {index} differs on replay: expected {expected:?}, found {found:?}")]
    ReplayMismatch {
        index: usize,
        expected: Option<Vec<String>>,
        found: Option<Vec<String>>,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl BeaconError {
    pub fn internal(reason: impl Into<String>) -> Self {
        BeaconError::ConsensusInternal(reason.into())
    }
}
