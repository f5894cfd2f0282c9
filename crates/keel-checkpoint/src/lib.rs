//! keel-checkpoint — durable snapshots of agent/workflow state.
//!
//! Backed by [redb](https://docs.rs/redb). Each checkpoint is a metadata
//! row (JSON) plus an opaque body, both keyed by a UUIDv7 checkpoint id and
//! always written or deleted together in one transaction.
//!
//! # Architecture
//!
//! ```text
//! CheckpointStore
//!   ├── save()  → codec::encode() → CHECKPOINT_META + CHECKPOINT_BODY
//!   ├── load()  → codec::decode()
//!   ├── list()  → newest first, filter + page by timestamp
//!   ├── prune() → RetentionPolicy (count and/or age)
//!   └── run_retention() → periodic prune loop
//! ```
//!
//! Checkpoints are immutable: a correction is a new checkpoint.

pub mod codec;
pub mod error;
pub mod retention;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{CheckpointError, CheckpointResult};
pub use retention::RetentionPolicy;
pub use store::CheckpointStore;
pub use types::*;
