//! Core type definitions for Agora

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// 32-byte block or state-root hash
pub type Hash = [u8; 32];

/// The all-zero hash, meaning "empty"
pub const EMPTY_HASH: Hash = [0; 32];

/// Shard identifier
pub type ShardId = u32;

/// The distinguished coordinator shard
pub const MAIN_SHARD: ShardId = 0;

/// Identifier of a batch of blocks fetched together
pub type BatchId = uuid::Uuid;

/// Identifier of a proof task
pub type TaskId = uuid::Uuid;

/// Opaque transaction payload, carried through to the L1 proposal
pub type RawTransaction = Vec<u8>;

/// Identity of one block on one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// Shard the block belongs to
    pub shard_id: ShardId,

    /// Block hash
    pub hash: Hash,
}

impl BlockId {
    pub fn new(shard_id: ShardId, hash: Hash) -> Self {
        Self { shard_id, hash }
    }

    pub fn from_block(block: &Block) -> Self {
        Self {
            shard_id: block.shard_id,
            hash: block.hash,
        }
    }

    /// Canonical key bytes: little-endian shard id followed by the hash
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        bytes[..4].copy_from_slice(&self.shard_id.to_le_bytes());
        bytes[4..].copy_from_slice(&self.hash);
        bytes
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.shard_id, hex::encode(self.hash))
    }
}

/// Block as received from the shard RPC; only the fields the sync
/// committee consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Shard the block was produced on
    pub shard_id: ShardId,

    /// Block hash
    pub hash: Hash,

    /// Hash of the parent block on the same shard
    pub parent_hash: Hash,

    /// Block number
    pub number: u64,

    /// State-root commitment after applying this block and its children
    pub child_blocks_root_hash: Hash,

    /// Transactions included in the block
    pub transactions: Vec<RawTransaction>,

    /// Hashes of the child-shard blocks this main block commits, in
    /// proposal order (empty for child blocks)
    pub child_block_hashes: Vec<Hash>,
}

/// Compact pointer to the latest fetched main-shard block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Shard the block was produced on
    pub shard_id: ShardId,

    /// Block hash
    pub hash: Hash,

    /// Hash of the parent block
    pub parent_hash: Hash,

    /// Block number
    pub number: u64,
}

impl BlockRef {
    pub fn from_block(block: &Block) -> Self {
        Self {
            shard_id: block.shard_id,
            hash: block.hash,
            parent_hash: block.parent_hash,
            number: block.number,
        }
    }

    /// Whether this ref points at the given block (same hash and number)
    pub fn matches(&self, block: &Block) -> bool {
        self.hash == block.hash && self.number == block.number
    }
}

/// One main-shard block bundled with the child-shard blocks covering the
/// same logical round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBatch {
    /// Batch identity, shared by every entry stored from it
    pub id: BatchId,

    /// The coordinating main-shard block
    pub main_shard_block: Block,

    /// Child-shard blocks referenced by the main block
    pub child_blocks: Vec<Block>,
}

/// Everything the proposer needs to submit one block to L1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalData {
    /// Hash of the proposed main-shard block
    pub main_block_hash: Hash,

    /// Main-block transactions followed by each child's, in the order the
    /// main block references them
    pub transactions: Vec<RawTransaction>,

    /// State root currently committed on L1
    pub old_proved_state_root: Hash,

    /// State root after this proposal
    pub new_proved_state_root: Hash,

    /// When the main block was fetched (Unix seconds)
    pub main_block_fetched_at: u64,
}

/// Kind of a proof task terminated by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Prove execution of a single block
    ProveBlock,

    /// Merge partial proofs of one batch
    MergeProofs,

    /// Produce the aggregate proof that makes a main block proposable
    AggregateProofs,
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Proof task as delivered by the scheduler's terminal hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task identity
    pub id: TaskId,

    /// What the task computed
    pub kind: TaskKind,

    /// Shard of the block the task covers
    pub shard_id: ShardId,

    /// Hash of the block the task covers
    pub block_hash: Hash,

    /// Batch the block was fetched in
    pub batch_id: BatchId,
}

/// Outcome of a terminated proof task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task produced its proof
    pub success: bool,

    /// Failure detail, if any
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}
