use crate::address::{Address, Attestation, SpaceId};

/// Result alias for fallible storage operations.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Everything that can go wrong reading, writing or committing against
/// memory spaces. Errors are values; nothing in this crate throws.
#[derive(Clone, Debug, thiserror::Error)]
pub enum StorageError {
    /// The transaction reached a terminal state before the operation.
    #[error("storage transaction is already complete")]
    Complete,

    /// The transaction was aborted by its creator.
    #[error("storage transaction aborted: {reason}")]
    Aborted {
        /// The reason given to `abort`.
        reason: String,
    },

    /// A read invariant no longer holds. Carries both the claimed and
    /// the conflicting attestation for diagnostics.
    #[error("invariant violated: claimed {claimed}, found {actual}")]
    Inconsistent {
        /// What the transaction observed.
        claimed: Box<Attestation>,
        /// What the store holds instead.
        actual: Box<Attestation>,
    },

    /// An addressed sub-value is unreachable: an intermediate is missing
    /// or is not an object.
    #[error("{address} not found in {space}")]
    NotFound {
        /// The space that was consulted.
        space: SpaceId,
        /// The unreachable address.
        address: Address,
    },

    /// The addressed document is not of the expected shape.
    #[error("{address}: expected {expected}")]
    TypeMismatch {
        /// The offending address.
        address: Address,
        /// What the caller expected to find there.
        expected: String,
    },

    /// The replica rejected a fact whose causal predecessor is stale.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The replica could not be reached.
    #[error("connection: {0}")]
    Connection(String),

    /// The replica refused the principal.
    #[error("authorization: {0}")]
    Authorization(String),

    /// The replica failed to apply an otherwise valid commit.
    #[error("transaction: {0}")]
    Transaction(String),
}

impl StorageError {
    /// The address the error is about, when it has one.
    pub fn address(&self) -> Option<&Address> {
        match self {
            StorageError::Inconsistent { claimed, .. } => Some(&claimed.address),
            StorageError::NotFound { address, .. } => Some(address),
            StorageError::TypeMismatch { address, .. } => Some(address),
            _ => None,
        }
    }
}
