//! redb table definitions for the embedded registry backend.

use redb::TableDefinition;

/// Service documents keyed by alias. Values are JSON bytes, identical to
/// what the Redis backend stores.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");
