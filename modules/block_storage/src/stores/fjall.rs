//! On-disk block store using Fjall's transactional keyspace
//!
//! Every operation runs its whole transaction inside one blocking closure;
//! a transaction is never held across an await point. Dropping a write
//! transaction without committing rolls it back, so early error returns
//! and cancelled callers leave the store untouched.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agora_common::{
    BatchId, Block, BlockBatch, BlockId, BlockRef, Clock, Hash, ProposalData, RetryConfig,
    RetryRunner, EMPTY_HASH, MAIN_SHARD,
};
use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use fjall::{
    PartitionCreateOptions, PersistMode, ReadTransaction, TxKeyspace, TxPartitionHandle,
    WriteTransaction,
};
use tokio::task;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::metrics::StorageMetrics;
use crate::stores::{
    decode_entry, decode_ref, encode_entry, encode_ref, is_proposal_candidate, shard_key,
    validate_child, BlockEntry, BlockStore,
};

const DEFAULT_DATABASE_PATH: &str = "fjall-sync-committee";
const DEFAULT_CLEAR_ON_START: bool = false;
const DEFAULT_RETRY_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 10;

// blocks holds one entry per fetched block. Key: BlockId bytes, value: BlockEntry.
const BLOCKS_PARTITION: &str = "blocks";
// latest_fetched holds the main-shard fetch frontier. Key: main shard key, value: BlockRef.
const LATEST_FETCHED_PARTITION: &str = "latest_fetched";
// state_root holds the last proved state root. Key: main shard key, value: raw hash bytes.
const STATE_ROOT_PARTITION: &str = "state_root";
// next_to_propose holds the parent hash of the next block to propose.
const NEXT_TO_PROPOSE_PARTITION: &str = "next_to_propose_parent_hash";

/// Fjall-backed implementation of [`BlockStore`]
pub struct FjallBlockStore {
    tables: Tables,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn StorageMetrics>,
    retries: RetryRunner<StorageError>,
}

impl FjallBlockStore {
    /// Open (or create) the store at the configured path
    pub fn new(
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn StorageMetrics>,
    ) -> Result<Self> {
        let path = config
            .get_string("database-path")
            .unwrap_or(DEFAULT_DATABASE_PATH.to_string());
        let clear = config.get_bool("clear-on-start").unwrap_or(DEFAULT_CLEAR_ON_START);
        info!("Storing sync-committee blocks with Fjall on disk ({path})");

        let path = PathBuf::from(path);
        if clear && path.exists() {
            fs::remove_dir_all(&path)?;
        }

        let keyspace = fjall::Config::new(&path).open_transactional()?;
        let blocks = keyspace.open_partition(BLOCKS_PARTITION, PartitionCreateOptions::default())?;
        let latest_fetched =
            keyspace.open_partition(LATEST_FETCHED_PARTITION, PartitionCreateOptions::default())?;
        let state_root =
            keyspace.open_partition(STATE_ROOT_PARTITION, PartitionCreateOptions::default())?;
        let next_to_propose =
            keyspace.open_partition(NEXT_TO_PROPOSE_PARTITION, PartitionCreateOptions::default())?;

        let max_attempts = config
            .get_int("retry-max-attempts")
            .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS)
            .max(1) as usize;
        let base_delay_ms = config
            .get_int("retry-base-delay-ms")
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS)
            .max(1) as u64;
        let retries = RetryRunner::new(
            RetryConfig {
                max_attempts,
                base_delay: Duration::from_millis(base_delay_ms),
            },
            Arc::new(|error: &StorageError| !error.is_retryable()),
        );

        Ok(Self {
            tables: Tables {
                keyspace,
                blocks,
                latest_fetched,
                state_root,
                next_to_propose,
            },
            clock,
            metrics,
            retries,
        })
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(Tables) -> Result<T, StorageError> + Send + 'static,
    {
        let tables = self.tables.clone();
        task::spawn_blocking(move || op(tables))
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))?
    }
}

#[async_trait]
impl BlockStore for FjallBlockStore {
    async fn try_get_proved_state_root(&self) -> Result<Option<Hash>, StorageError> {
        self.run_blocking(|tables| tables.proved_state_root()).await
    }

    async fn set_proved_state_root(&self, state_root: Hash) -> Result<(), StorageError> {
        if state_root == EMPTY_HASH {
            return Err(StorageError::InvalidArgument(
                "state root cannot be empty".to_string(),
            ));
        }
        self.retries
            .run(|| self.run_blocking(move |tables| tables.set_state_root(state_root)))
            .await
    }

    async fn try_get_latest_fetched(&self) -> Result<Option<BlockRef>, StorageError> {
        self.run_blocking(|tables| tables.latest_fetched()).await
    }

    async fn try_get_block(&self, id: BlockId) -> Result<Option<Block>, StorageError> {
        self.run_blocking(move |tables| tables.block(&id)).await
    }

    async fn put_block_batch(&self, batch: &BlockBatch) -> Result<(), StorageError> {
        let fetched_at = self.clock.now();
        self.retries
            .run(|| {
                let batch = batch.clone();
                self.run_blocking(move |tables| tables.put_block_batch(&batch, fetched_at))
            })
            .await
    }

    async fn mark_proved(&self, id: BlockId) -> Result<bool, StorageError> {
        let was_set = self
            .retries
            .run(|| self.run_blocking(move |tables| tables.mark_proved(&id)))
            .await?;

        // Out of transaction: a lost tick on crash is acceptable
        if was_set {
            self.metrics.record_main_block_proved();
        }
        Ok(was_set)
    }

    async fn try_get_next_proposal(&self) -> Result<Option<ProposalData>, StorageError> {
        self.run_blocking(|tables| tables.next_proposal()).await
    }

    async fn mark_proposed(&self, id: BlockId) -> Result<(), StorageError> {
        self.retries
            .run(|| self.run_blocking(move |tables| tables.mark_proposed(&id)))
            .await
    }

    async fn blocks_count(&self) -> Result<usize, StorageError> {
        self.run_blocking(|tables| tables.blocks_count()).await
    }
}

/// Keyspace handle plus the four partitions; cheap to clone into blocking
/// closures
#[derive(Clone)]
struct Tables {
    keyspace: TxKeyspace,
    blocks: TxPartitionHandle,
    latest_fetched: TxPartitionHandle,
    state_root: TxPartitionHandle,
    next_to_propose: TxPartitionHandle,
}

impl Tables {
    fn main_key() -> [u8; 4] {
        shard_key(MAIN_SHARD)
    }

    fn commit(&self, tx: WriteTransaction) -> Result<(), StorageError> {
        tx.commit()?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn proved_state_root(&self) -> Result<Option<Hash>, StorageError> {
        let tx = self.keyspace.read_tx();
        let key = Self::main_key();
        decode_singleton_hash(STATE_ROOT_PARTITION, tx.get(&self.state_root, key.as_slice())?)
    }

    fn set_state_root(&self, state_root: Hash) -> Result<(), StorageError> {
        let mut tx = self.keyspace.write_tx();
        let key = Self::main_key();
        tx.insert(&self.state_root, key.as_slice(), state_root.as_slice());
        self.commit(tx)
    }

    fn latest_fetched(&self) -> Result<Option<BlockRef>, StorageError> {
        let tx = self.keyspace.read_tx();
        let key = Self::main_key();
        match tx.get(&self.latest_fetched, key.as_slice())? {
            Some(value) => Ok(Some(decode_ref(&key, &value)?)),
            None => Ok(None),
        }
    }

    fn block(&self, id: &BlockId) -> Result<Option<Block>, StorageError> {
        let tx = self.keyspace.read_tx();
        Ok(self.entry_r(&tx, id)?.map(|entry| entry.block))
    }

    fn put_block_batch(&self, batch: &BlockBatch, fetched_at: u64) -> Result<(), StorageError> {
        let mut tx = self.keyspace.write_tx();

        let child_ids: Vec<BlockId> =
            batch.child_blocks.iter().map(BlockId::from_block).collect();
        self.put_entry(&mut tx, batch.id, &batch.main_shard_block, child_ids, fetched_at)?;
        for child in &batch.child_blocks {
            self.put_entry(&mut tx, batch.id, child, Vec::new(), fetched_at)?;
        }

        self.seed_propose_parent(&mut tx, &batch.main_shard_block)?;
        self.update_latest_fetched(&mut tx, &batch.main_shard_block)?;

        self.commit(tx)
    }

    fn put_entry(
        &self,
        tx: &mut WriteTransaction,
        batch_id: BatchId,
        block: &Block,
        child_ids: Vec<BlockId>,
        fetched_at: u64,
    ) -> Result<(), StorageError> {
        let entry = BlockEntry {
            block: block.clone(),
            is_proved: false,
            batch_id,
            fetched_at,
            child_ids,
        };
        let key = BlockId::from_block(block).to_bytes();
        tx.insert(&self.blocks, key.as_slice(), encode_entry(&entry)?);
        Ok(())
    }

    /// Seed the proposal frontier from the first ever ingested main block
    fn seed_propose_parent(
        &self,
        tx: &mut WriteTransaction,
        block: &Block,
    ) -> Result<(), StorageError> {
        if block.shard_id != MAIN_SHARD {
            return Ok(());
        }
        let key = Self::main_key();
        let existing = decode_singleton_hash(
            NEXT_TO_PROPOSE_PARTITION,
            tx.get(&self.next_to_propose, key.as_slice())?,
        )?;
        if existing.is_some() {
            return Ok(());
        }

        if block.number > 0 && block.parent_hash == EMPTY_HASH {
            return Err(StorageError::InvalidArgument(format!(
                "block with hash={} has an empty parent hash",
                hex::encode(block.hash)
            )));
        }

        info!(
            "next-to-propose parent hash is not set, seeding it: block={} parent={}",
            hex::encode(block.hash),
            hex::encode(block.parent_hash)
        );
        tx.insert(&self.next_to_propose, key.as_slice(), block.parent_hash.as_slice());
        Ok(())
    }

    fn update_latest_fetched(
        &self,
        tx: &mut WriteTransaction,
        block: &Block,
    ) -> Result<(), StorageError> {
        if block.shard_id != MAIN_SHARD {
            return Ok(());
        }
        let key = shard_key(block.shard_id);
        let latest = match tx.get(&self.latest_fetched, key.as_slice())? {
            Some(value) => Some(decode_ref(&key, &value)?),
            None => None,
        };

        if let Some(latest) = latest {
            if latest.matches(block) {
                // Idempotent re-ingest of the current frontier block
                return Ok(());
            }
            validate_child(&latest, block)?;
        }

        let new_ref = BlockRef::from_block(block);
        tx.insert(&self.latest_fetched, key.as_slice(), encode_ref(&new_ref)?);
        Ok(())
    }

    fn mark_proved(&self, id: &BlockId) -> Result<bool, StorageError> {
        let mut tx = self.keyspace.write_tx();

        let Some(mut entry) = self.entry_w(&mut tx, id)? else {
            return Err(StorageError::NotFound(*id));
        };
        if entry.is_proved {
            debug!("block with id={id} is already marked as proved");
            return Ok(false);
        }

        entry.is_proved = true;
        let key = id.to_bytes();
        tx.insert(&self.blocks, key.as_slice(), encode_entry(&entry)?);
        self.commit(tx)?;
        Ok(true)
    }

    fn next_proposal(&self) -> Result<Option<ProposalData>, StorageError> {
        let tx = self.keyspace.read_tx();
        let key = Self::main_key();

        let Some(state_root) =
            decode_singleton_hash(STATE_ROOT_PARTITION, tx.get(&self.state_root, key.as_slice())?)?
        else {
            return Err(StorageError::Uninitialized);
        };

        let Some(parent_hash) = decode_singleton_hash(
            NEXT_TO_PROPOSE_PARTITION,
            tx.get(&self.next_to_propose, key.as_slice())?,
        )?
        else {
            debug!("next-to-propose parent hash is not set");
            return Ok(None);
        };

        let mut candidate = None;
        for kv in tx.iter(&self.blocks) {
            let (entry_key, value) = kv?;
            let entry = decode_entry(&entry_key, &value)?;
            if is_proposal_candidate(&entry, &parent_hash) {
                candidate = Some(entry);
                break;
            }
        }
        let Some(entry) = candidate else {
            debug!(
                "no proved main-shard block extends parent {}",
                hex::encode(parent_hash)
            );
            return Ok(None);
        };

        // Main-block transactions first, then each child's in the order the
        // main block references them
        let mut transactions = entry.block.transactions.clone();
        for child_hash in &entry.block.child_block_hashes {
            let child_id = entry
                .child_ids
                .iter()
                .find(|id| id.hash == *child_hash)
                .ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "child block with hash={} was not stored with batch {}",
                        hex::encode(child_hash),
                        entry.batch_id
                    ))
                })?;
            let child = self.entry_r(&tx, child_id)?.ok_or_else(|| {
                StorageError::Corruption(format!("child block with id={child_id} is not found"))
            })?;
            transactions.extend_from_slice(&child.block.transactions);
        }

        Ok(Some(ProposalData {
            main_block_hash: entry.block.hash,
            transactions,
            old_proved_state_root: state_root,
            new_proved_state_root: entry.block.child_blocks_root_hash,
            main_block_fetched_at: entry.fetched_at,
        }))
    }

    fn mark_proposed(&self, id: &BlockId) -> Result<(), StorageError> {
        let mut tx = self.keyspace.write_tx();

        let Some(entry) = self.entry_w(&mut tx, id)? else {
            return Err(StorageError::NotFound(*id));
        };
        self.validate_proposable(&mut tx, id, &entry)?;

        for child_id in &entry.child_ids {
            let child_key = child_id.to_bytes();
            tx.remove(&self.blocks, child_key.as_slice());
        }
        let main_key = id.to_bytes();
        tx.remove(&self.blocks, main_key.as_slice());

        let singleton_key = Self::main_key();
        tx.insert(
            &self.state_root,
            singleton_key.as_slice(),
            entry.block.child_blocks_root_hash.as_slice(),
        );
        tx.insert(
            &self.next_to_propose,
            singleton_key.as_slice(),
            entry.block.hash.as_slice(),
        );

        self.commit(tx)
    }

    fn validate_proposable(
        &self,
        tx: &mut WriteTransaction,
        id: &BlockId,
        entry: &BlockEntry,
    ) -> Result<(), StorageError> {
        if entry.block.shard_id != MAIN_SHARD {
            return Err(StorageError::InvalidArgument(format!(
                "block with id={id} is not from the main shard"
            )));
        }
        if !entry.is_proved {
            return Err(StorageError::InvalidArgument(format!(
                "block with id={id} is not proved"
            )));
        }
        // The state root is replaced by this value on commit and may never
        // become empty
        if entry.block.child_blocks_root_hash == EMPTY_HASH {
            return Err(StorageError::Corruption(format!(
                "main block with id={id} has an empty child blocks root hash"
            )));
        }

        let key = Self::main_key();
        let parent = decode_singleton_hash(
            NEXT_TO_PROPOSE_PARTITION,
            tx.get(&self.next_to_propose, key.as_slice())?,
        )?;
        let Some(parent) = parent else {
            return Err(StorageError::BlockMismatch(
                "next-to-propose parent hash is not set".to_string(),
            ));
        };
        if parent != entry.block.parent_hash {
            return Err(StorageError::BlockMismatch(format!(
                "parent hash {} of block with id={id} does not match the stored value {}",
                hex::encode(entry.block.parent_hash),
                hex::encode(parent)
            )));
        }
        Ok(())
    }

    fn blocks_count(&self) -> Result<usize, StorageError> {
        let tx = self.keyspace.read_tx();
        let mut count = 0;
        for kv in tx.iter(&self.blocks) {
            kv?;
            count += 1;
        }
        Ok(count)
    }

    fn entry_r(
        &self,
        tx: &ReadTransaction,
        id: &BlockId,
    ) -> Result<Option<BlockEntry>, StorageError> {
        let key = id.to_bytes();
        match tx.get(&self.blocks, key.as_slice())? {
            Some(value) => Ok(Some(decode_entry(&key, &value)?)),
            None => Ok(None),
        }
    }

    fn entry_w(
        &self,
        tx: &mut WriteTransaction,
        id: &BlockId,
    ) -> Result<Option<BlockEntry>, StorageError> {
        let key = id.to_bytes();
        match tx.get(&self.blocks, key.as_slice())? {
            Some(value) => Ok(Some(decode_entry(&key, &value)?)),
            None => Ok(None),
        }
    }
}

fn decode_singleton_hash(
    partition_name: &str,
    value: Option<fjall::Slice>,
) -> Result<Option<Hash>, StorageError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let hash: Hash = value.as_ref().try_into().map_err(|_| StorageError::Serialization {
        key: hex::encode(Tables::main_key()),
        detail: format!(
            "stored {partition_name} value has length {}, expected 32",
            value.len()
        ),
    })?;
    Ok(Some(hash))
}
