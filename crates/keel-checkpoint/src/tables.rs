//! redb table definitions for the checkpoint store.
//!
//! Both tables are keyed by checkpoint id. UUIDv7 ids sort by creation
//! time, so key order is also insertion order.

use redb::TableDefinition;

/// JSON-serialized [`crate::CheckpointMetadata`].
pub const CHECKPOINT_META: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoint_meta");

/// Stored (possibly compressed) checkpoint bodies.
pub const CHECKPOINT_BODY: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoint_body");
