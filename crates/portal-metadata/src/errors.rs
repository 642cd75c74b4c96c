use portal_state::StateError;
use thiserror::Error;

/// Failure classes a caller acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing fields, wrong tx type/version. Never included.
    Structural,
    /// Signature or signer mismatch.
    Authorization,
    /// Custodian/request missing, already processed, not enough collateral.
    StateConflict,
    /// Proof undecodable or pointing at the wrong transfer.
    Proof,
    /// Beacon state corruption. Halts the height.
    ConsensusInternal,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetadataError {
    #[error("unknown metadata type {0}")]
    UnknownType(i32),

    #[error("metadata type {0} is not carried by transactions")]
    NotTransactionMetadata(i32),

    #[error("malformed metadata: {0}")]
    Malformed(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unexpected transaction shape: {0}")]
    TxShape(String),

    #[error("burned coin mismatch: {0}")]
    BurnMismatch(String),

    #[error("signature rejected: {0}")]
    Signature(String),

    #[error("signer is not authorized: {0}")]
    Unauthorized(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("request {0} already processed")]
    Duplicate(String),

    #[error("proof rejected: {0}")]
    Proof(String),

    #[error("no unconsumed beacon instruction matches minting tx {0}")]
    NoMatchingInstruction(String),

    #[error("instruction index {0} already consumed")]
    InstructionConsumed(usize),

    #[error("instruction index {index} out of range ({len} instructions)")]
    InstructionOutOfRange { index: usize, len: usize },

    #[error("malformed beacon instruction: {0}")]
    MalformedInstruction(String),

    #[error("consensus internal error: {0}")]
    ConsensusInternal(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::UnknownType(_)
            | MetadataError::NotTransactionMetadata(_)
            | MetadataError::Malformed(_)
            | MetadataError::InvalidField { .. }
            | MetadataError::TxShape(_)
            | MetadataError::BurnMismatch(_) => ErrorKind::Structural,
            MetadataError::Signature(_) | MetadataError::Unauthorized(_) => ErrorKind::Authorization,
            MetadataError::StateConflict(_)
            | MetadataError::Duplicate(_)
            | MetadataError::NoMatchingInstruction(_)
            | MetadataError::InstructionConsumed(_)
            | MetadataError::InstructionOutOfRange { .. }
            | MetadataError::State(_) => ErrorKind::StateConflict,
            MetadataError::Proof(_) => ErrorKind::Proof,
            MetadataError::MalformedInstruction(_) | MetadataError::ConsensusInternal(_) => {
                ErrorKind::ConsensusInternal
            }
        }
    }

    /// Whether resubmitting the same transaction can never succeed.
    pub fn is_permanent(&self) -> bool {
        self.kind() != ErrorKind::StateConflict
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        MetadataError::InvalidField { field, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(MetadataError::UnknownType(1).kind(), ErrorKind::Structural);
        assert_eq!(MetadataError::Signature("x".into()).kind(), ErrorKind::Authorization);
        assert_eq!(MetadataError::Proof("x".into()).kind(), ErrorKind::Proof);
        assert_eq!(
            MetadataError::from(StateError::CustodianNotFound("c".into())).kind(),
            ErrorKind::StateConflict
        );
        assert!(!MetadataError::Duplicate("p".into()).is_permanent());
        assert!(MetadataError::invalid("amount", "zero").is_permanent());
    }
}
