//! EntityStore — redb-backed action metadata.
//!
//! All values are JSON-serialized into redb's `&[u8]` value column. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing and the standalone daemon).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use whisk_core::ActionMetadata;
use whisk_core::config::LimitsConfig;

use crate::error::{EntityError, EntityResult};
use crate::limits::check_limits;
use crate::tables::ACTIONS;

/// Convert any `Display` error into an `EntityError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| EntityError::$variant(e.to_string())
    };
}

/// Read-only action lookup used by the dispatch path.
pub trait ActionStore: Send + Sync {
    /// Fetch an action's metadata, failing with `NotFound` if absent.
    fn get_action(&self, namespace: &str, name: &str) -> EntityResult<ActionMetadata>;
}

/// Thread-safe action store backed by redb.
#[derive(Clone)]
pub struct EntityStore {
    db: Arc<Database>,
    bounds: LimitsConfig,
}

impl EntityStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path, bounds: LimitsConfig) -> EntityResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            bounds,
        };
        store.ensure_tables()?;
        debug!(?path, "entity store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory(bounds: LimitsConfig) -> EntityResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            bounds,
        };
        store.ensure_tables()?;
        debug!("in-memory entity store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> EntityResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or update an action after checking its limits.
    pub fn put_action(&self, action: &ActionMetadata) -> EntityResult<()> {
        check_limits(&action.limits, &self.bounds)?;
        let key = action.table_key();
        let value = serde_json::to_vec(action).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, pool = %action.pool(), "action stored");
        Ok(())
    }

    /// Look up an action by `{namespace}/{name}` key.
    pub fn find_action(&self, key: &str) -> EntityResult<Option<ActionMetadata>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let action: ActionMetadata =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(action))
            }
            None => Ok(None),
        }
    }
}

impl ActionStore for EntityStore {
    fn get_action(&self, namespace: &str, name: &str) -> EntityResult<ActionMetadata> {
        let key = format!("{namespace}/{name}");
        self.find_action(&key)?
            .ok_or(EntityError::NotFound(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisk_core::{ActionExec, ActionLimits, ActionPool};

    fn test_store() -> EntityStore {
        EntityStore::open_in_memory(LimitsConfig::default()).unwrap()
    }

    fn test_action(namespace: &str, name: &str) -> ActionMetadata {
        ActionMetadata {
            namespace: namespace.to_string(),
            name: name.to_string(),
            exec: ActionExec::Managed {
                kind: "python:3".to_string(),
            },
            limits: ActionLimits {
                memory_mb: 256,
                timeout_ms: 5_000,
            },
            updated_at: 1000,
        }
    }

    #[test]
    fn put_and_get_action() {
        let store = test_store();
        store.put_action(&test_action("guest", "hello")).unwrap();

        let action = store.get_action("guest", "hello").unwrap();
        assert_eq!(action.limits.memory_mb, 256);
        assert_eq!(action.pool(), ActionPool::Managed);
    }

    #[test]
    fn missing_action_is_not_found() {
        let store = test_store();
        let err = store.get_action("guest", "nope").unwrap_err();
        assert!(matches!(err, EntityError::NotFound(key) if key == "guest/nope"));
    }

    #[test]
    fn put_rejects_out_of_bounds_limits() {
        let store = test_store();
        let mut action = test_action("guest", "huge");
        action.limits.memory_mb = 4096;
        assert!(matches!(
            store.put_action(&action),
            Err(EntityError::InvalidLimits(_))
        ));
        assert!(store.find_action("guest/huge").unwrap().is_none());
    }

    #[test]
    fn blackbox_action_round_trips_pool() {
        let store = test_store();
        let mut action = test_action("guest", "img");
        action.exec = ActionExec::Blackbox {
            image: "acme/worker:1".to_string(),
        };
        store.put_action(&action).unwrap();
        assert_eq!(
            store.get_action("guest", "img").unwrap().pool(),
            ActionPool::Blackbox
        );
    }

    #[test]
    fn on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.redb");
        {
            let store = EntityStore::open(&path, LimitsConfig::default()).unwrap();
            store.put_action(&test_action("guest", "hello")).unwrap();
        }
        let store = EntityStore::open(&path, LimitsConfig::default()).unwrap();
        assert!(store.get_action("guest", "hello").is_ok());
    }
}
