//! Bridges proof-task terminations into the block store
//!
//! The scheduler that runs proof tasks is external; this module only
//! consumes its terminal hook. The handler depends on the store, never the
//! other way around.

use std::sync::Arc;

use agora_block_storage::BlockStore;
use agora_common::{BlockId, Task, TaskKind, TaskResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Capability to record that a block acquired its aggregate proof
#[async_trait]
pub trait ProvedBlockSetter: Send + Sync {
    /// Returns false when the block was already proved
    async fn set_block_as_proved(&self, id: BlockId) -> Result<bool>;
}

#[async_trait]
impl<S: BlockStore> ProvedBlockSetter for S {
    async fn set_block_as_proved(&self, id: BlockId) -> Result<bool> {
        Ok(self.mark_proved(id).await?)
    }
}

/// Reacts to terminated proof tasks, marking main blocks proved once their
/// aggregate proof completes
pub struct TaskStateChangeHandler {
    block_setter: Arc<dyn ProvedBlockSetter>,
}

impl TaskStateChangeHandler {
    pub fn new(block_setter: Arc<dyn ProvedBlockSetter>) -> Self {
        Self { block_setter }
    }

    /// Terminal hook invoked by the proof-task scheduler.
    ///
    /// Failed tasks are acknowledged without escalation here; the scheduler
    /// retries or surfaces them elsewhere. Store errors propagate so the
    /// scheduler can redeliver the event.
    pub async fn on_task_terminated(&self, task: &Task, result: &TaskResult) -> Result<()> {
        if task.kind != TaskKind::AggregateProofs {
            debug!("task {} has kind {}, nothing to record", task.id, task.kind);
            return Ok(());
        }

        if !result.is_success() {
            warn!(
                "proof task {} failed, batch {} will not reach L1: {}",
                task.id,
                task.batch_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(());
        }

        info!("proof batch {} completed", task.batch_id);

        let block_id = BlockId::new(task.shard_id, task.block_hash);
        self.block_setter
            .set_block_as_proved(block_id)
            .await
            .with_context(|| format!("failed to set block with id={block_id} as proved"))?;

        Ok(())
    }
}
