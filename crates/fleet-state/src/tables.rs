//! redb table definitions for the Fleet state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Job states keyed by job id.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Build/deploy commit hashes keyed by component name.
pub const COMPONENT_HASHES: TableDefinition<&str, &[u8]> = TableDefinition::new("component_hashes");
