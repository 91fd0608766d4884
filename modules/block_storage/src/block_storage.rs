//! Block storage and proposal engine for the sync committee
//!
//! Ingests batches of main-shard and child-shard blocks, tracks which main
//! blocks have acquired their aggregate proof, and packages the next
//! (old state root, new state root, transactions) proposal for the L1
//! settlement contract, advancing the committed frontier once a proposal
//! is submitted.
//!
//! The store assumes a single producer of block batches; readers and the
//! proof/proposal writers may run concurrently. Note that the proposal
//! frontier is seeded from the first ingested main block while the state
//! root is seeded by the operator: the store never cross-checks the two,
//! so seeding them inconsistently at genesis will stall proposals.

pub mod error;
pub mod metrics;
pub mod stores;

pub use error::StorageError;
pub use metrics::{NoopMetrics, StorageCounters, StorageMetrics};
pub use stores::fjall::FjallBlockStore;
pub use stores::{BlockEntry, BlockStore};
