//! redb table definitions for the entity store.

use redb::TableDefinition;

/// Action metadata keyed by `{namespace}/{name}`.
pub const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");
