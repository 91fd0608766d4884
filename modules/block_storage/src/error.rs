//! Error taxonomy of the block store

use agora_common::BlockId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested block id is absent
    #[error("block with id={0} is not found")]
    NotFound(BlockId),

    /// A linearity or frontier check failed; the chain view diverged and
    /// retrying cannot help
    #[error("block mismatch: {0}")]
    BlockMismatch(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A proposal was requested before the state root was seeded
    #[error("proved state root was not initialized")]
    Uninitialized,

    /// Stored data is inconsistent; operator attention required
    #[error("storage corruption: {0}")]
    Corruption(String),

    /// A stored value could not be encoded or decoded
    #[error("serialization failed for key {key}: {detail}")]
    Serialization { key: String, detail: String },

    /// Operational substrate failure; safe to retry
    #[error("key-value store error: {0}")]
    Kv(#[from] fjall::Error),

    /// A storage worker task died before reporting back
    #[error("storage task failed: {0}")]
    Internal(String),
}

impl StorageError {
    /// Only operational KV failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Kv(_))
    }
}
