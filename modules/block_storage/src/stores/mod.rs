//! Storage interface and stored record types for sync-committee block data

use agora_common::{
    BatchId, Block, BlockBatch, BlockId, BlockRef, Hash, ProposalData, ShardId, MAIN_SHARD,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub mod fjall;

/// Persistent store for fetched blocks, their proof status and the
/// proposal frontier
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Latest state root committed on L1, if ever seeded
    async fn try_get_proved_state_root(&self) -> Result<Option<Hash>, StorageError>;

    /// Seed or replace the committed state root; the empty hash is rejected.
    /// Meant to be called once at genesis, before the first proposal.
    async fn set_proved_state_root(&self, state_root: Hash) -> Result<(), StorageError>;

    /// Pointer to the latest fetched main-shard block
    async fn try_get_latest_fetched(&self) -> Result<Option<BlockRef>, StorageError>;

    /// Direct block lookup
    async fn try_get_block(&self, id: BlockId) -> Result<Option<Block>, StorageError>;

    /// Store a fetched batch atomically and extend the fetched frontier.
    /// A batch that does not linearly extend the frontier is rejected.
    async fn put_block_batch(&self, batch: &BlockBatch) -> Result<(), StorageError>;

    /// Mark a block as proved. Returns false if it already was.
    async fn mark_proved(&self, id: BlockId) -> Result<bool, StorageError>;

    /// Next proposable block packaged for L1 submission, if any. Advisory:
    /// the result may be stale by the time it is returned.
    async fn try_get_next_proposal(&self) -> Result<Option<ProposalData>, StorageError>;

    /// Record a proposal as submitted: advance the frontier and the state
    /// root, drop the proposed block and its children
    async fn mark_proposed(&self, id: BlockId) -> Result<(), StorageError>;

    /// Number of block entries currently stored
    async fn blocks_count(&self) -> Result<usize, StorageError>;
}

/// Stored record for one fetched block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    /// The block as fetched
    pub block: Block,

    /// Whether the aggregate proof for this block has completed
    pub is_proved: bool,

    /// Batch the block arrived in
    pub batch_id: BatchId,

    /// Unix seconds at ingest
    pub fetched_at: u64,

    /// Ids of the batch children stored alongside a main block (empty for
    /// child entries). Child shard ids are not derivable from the main
    /// block alone, so they are resolved from the batch at ingest.
    pub child_ids: Vec<BlockId>,
}

/// Key for the single-value main-shard tables
pub(crate) fn shard_key(shard_id: ShardId) -> [u8; 4] {
    shard_id.to_le_bytes()
}

pub(crate) fn encode_entry(entry: &BlockEntry) -> Result<Vec<u8>, StorageError> {
    serde_cbor::to_vec(entry).map_err(|e| StorageError::Serialization {
        key: hex::encode(entry.block.hash),
        detail: e.to_string(),
    })
}

pub(crate) fn decode_entry(key: &[u8], value: &[u8]) -> Result<BlockEntry, StorageError> {
    serde_cbor::from_slice(value).map_err(|e| StorageError::Serialization {
        key: hex::encode(key),
        detail: e.to_string(),
    })
}

pub(crate) fn encode_ref(block_ref: &BlockRef) -> Result<Vec<u8>, StorageError> {
    serde_cbor::to_vec(block_ref).map_err(|e| StorageError::Serialization {
        key: hex::encode(block_ref.hash),
        detail: e.to_string(),
    })
}

pub(crate) fn decode_ref(key: &[u8], value: &[u8]) -> Result<BlockRef, StorageError> {
    serde_cbor::from_slice(value).map_err(|e| StorageError::Serialization {
        key: hex::encode(key),
        detail: e.to_string(),
    })
}

/// A block is proposable when it is a proved main-shard block extending
/// the committed frontier
pub(crate) fn is_proposal_candidate(entry: &BlockEntry, parent_hash: &Hash) -> bool {
    entry.block.shard_id == MAIN_SHARD
        && entry.is_proved
        && entry.block.parent_hash == *parent_hash
}

/// Linearity check for extending the fetched frontier
pub(crate) fn validate_child(latest: &BlockRef, block: &Block) -> Result<(), StorageError> {
    if block.shard_id != MAIN_SHARD {
        return Err(StorageError::BlockMismatch(format!(
            "block with id={} is not from the main shard",
            BlockId::from_block(block)
        )));
    }
    if block.parent_hash != latest.hash {
        return Err(StorageError::BlockMismatch(format!(
            "block with hash={} does not extend latest fetched block {}: parent is {}",
            hex::encode(block.hash),
            hex::encode(latest.hash),
            hex::encode(block.parent_hash)
        )));
    }
    if block.number != latest.number + 1 {
        return Err(StorageError::BlockMismatch(format!(
            "block with hash={} has number {}, expected {}",
            hex::encode(block.hash),
            block.number,
            latest.number + 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_common::EMPTY_HASH;

    fn test_block(shard_id: ShardId) -> Block {
        Block {
            shard_id,
            hash: [0xa1; 32],
            parent_hash: [0xa0; 32],
            number: 4,
            child_blocks_root_hash: [0x22; 32],
            transactions: vec![vec![1, 2, 3], vec![4]],
            child_block_hashes: vec![[0xc1; 32], [0xc2; 32]],
        }
    }

    fn test_entry(shard_id: ShardId, is_proved: bool) -> BlockEntry {
        BlockEntry {
            block: test_block(shard_id),
            is_proved,
            batch_id: BatchId::new_v4(),
            fetched_at: 1_700_000_000,
            child_ids: vec![BlockId::new(2, [0xc1; 32]), BlockId::new(5, [0xc2; 32])],
        }
    }

    #[test]
    fn block_entry_round_trips() {
        let entry = test_entry(MAIN_SHARD, true);
        let bytes = encode_entry(&entry).unwrap();
        let decoded = decode_entry(&entry.block.hash, &bytes).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn block_ref_round_trips() {
        let block_ref = BlockRef::from_block(&test_block(MAIN_SHARD));
        let bytes = encode_ref(&block_ref).unwrap();
        let decoded = decode_ref(&block_ref.hash, &bytes).unwrap();
        assert_eq!(block_ref, decoded);
    }

    #[test]
    fn decode_failure_names_the_key() {
        let err = decode_entry(&[0xab, 0xcd], b"not cbor at all").unwrap_err();
        match err {
            StorageError::Serialization { key, .. } => assert_eq!(key, "abcd"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn proposal_candidate_requires_all_three_conditions() {
        let parent = [0xa0; 32];

        assert!(is_proposal_candidate(&test_entry(MAIN_SHARD, true), &parent));
        assert!(!is_proposal_candidate(&test_entry(2, true), &parent));
        assert!(!is_proposal_candidate(&test_entry(MAIN_SHARD, false), &parent));
        assert!(!is_proposal_candidate(
            &test_entry(MAIN_SHARD, true),
            &EMPTY_HASH
        ));
    }

    #[test]
    fn validate_child_accepts_direct_descendant() {
        let block = test_block(MAIN_SHARD);
        let latest = BlockRef {
            shard_id: MAIN_SHARD,
            hash: block.parent_hash,
            parent_hash: [0x9f; 32],
            number: block.number - 1,
        };
        assert!(validate_child(&latest, &block).is_ok());
    }

    #[test]
    fn validate_child_rejects_forks_and_gaps() {
        let block = test_block(MAIN_SHARD);
        let latest = BlockRef {
            shard_id: MAIN_SHARD,
            hash: [0xbe; 32],
            parent_hash: [0x9f; 32],
            number: block.number - 1,
        };
        assert!(matches!(
            validate_child(&latest, &block),
            Err(StorageError::BlockMismatch(_))
        ));

        let latest_gap = BlockRef {
            shard_id: MAIN_SHARD,
            hash: block.parent_hash,
            parent_hash: [0x9f; 32],
            number: block.number + 3,
        };
        assert!(matches!(
            validate_child(&latest_gap, &block),
            Err(StorageError::BlockMismatch(_))
        ));

        assert!(matches!(
            validate_child(&latest, &test_block(3)),
            Err(StorageError::BlockMismatch(_))
        ));
    }
}
