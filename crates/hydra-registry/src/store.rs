//! Raw key-value backends for the registry.
//!
//! Both backends store the same bytes under the same keys: the service
//! alias maps to its JSON document. `RegistryStore` dispatches between
//! them so the rest of the crate never sees backend types.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use redis::AsyncCommands;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::tables::SERVICES;

/// Convert any `Display` error into a `RegistryError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| RegistryError::$variant(e.to_string())
    };
}

/// Registry backend chosen at startup.
#[derive(Clone)]
pub enum RegistryStore {
    Redis(RedisStore),
    Embedded(EmbeddedStore),
}

impl RegistryStore {
    /// Raw document stored under `key`, if any.
    pub async fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        match self {
            Self::Redis(store) => store.get(key).await,
            Self::Embedded(store) => store.get(key),
        }
    }

    /// Overwrite the document stored under `key`.
    pub async fn set(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        match self {
            Self::Redis(store) => store.set(key, value).await,
            Self::Embedded(store) => store.set(key, value),
        }
    }

    /// Every stored `(key, document)` pair.
    pub async fn entries(&self) -> RegistryResult<Vec<(String, Vec<u8>)>> {
        match self {
            Self::Redis(store) => store.entries().await,
            Self::Embedded(store) => store.entries(),
        }
    }
}

impl From<RedisStore> for RegistryStore {
    fn from(store: RedisStore) -> Self {
        Self::Redis(store)
    }
}

impl From<EmbeddedStore> for RegistryStore {
    fn from(store: EmbeddedStore) -> Self {
        Self::Embedded(store)
    }
}

// ── Redis ──────────────────────────────────────────────────────────

/// The cluster's Redis container. One key per service alias.
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> RegistryResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(%url, "redis registry connected");
        Ok(Self { conn })
    }

    async fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        debug!(%key, "service document stored");
        Ok(())
    }

    async fn entries(&self) -> RegistryResult<Vec<(String, Vec<u8>)>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys("*").await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // Explicit MGET: the typed helper degrades to GET for one key.
        let values: Vec<Option<Vec<u8>>> =
            redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }
}

// ── Embedded ───────────────────────────────────────────────────────

/// redb-backed registry, on disk or in memory.
#[derive(Clone)]
pub struct EmbeddedStore {
    db: Arc<Database>,
}

impl EmbeddedStore {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "embedded registry opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> RegistryResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory registry opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get(&self, key: &str) -> RegistryResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "service document stored");
        Ok(())
    }

    fn entries(&self) -> RegistryResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(results)
    }
}
