//! Host-side storage behind the `KeyValue` capability.
//!
//! The core never touches these directly: it emits `KeyValueOperation`s and
//! the runtime answers them with [`resolve_kv`].

use crux_kv::error::KeyValueError;
use crux_kv::value::Value;
use crux_kv::{KeyValueOperation, KeyValueResponse, KeyValueResult};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

use crate::capabilities::kv::{KvError, KvKey, MAX_VALUE_SIZE};

/// Durable string-keyed byte store.
///
/// Implementations must be safe to share; the core is the only writer but
/// hosts may read concurrently for diagnostics.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError>;
    /// Returns the previous value.
    fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<Option<Vec<u8>>, KvError>;
    /// Returns the removed value.
    fn remove(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError>;
    /// Raw keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// Runs one `KeyValue` request against `store`.
pub fn resolve_kv(store: &dyn KeyValueStore, operation: &KeyValueOperation) -> KeyValueResult {
    match apply(store, operation) {
        Ok(response) => KeyValueResult::Ok { response },
        Err(e) => {
            warn!(error = %e, "key-value request failed");
            KeyValueResult::Err {
                error: KeyValueError::Io {
                    message: e.to_string(),
                },
            }
        }
    }
}

fn apply(
    store: &dyn KeyValueStore,
    operation: &KeyValueOperation,
) -> Result<KeyValueResponse, KvError> {
    Ok(match operation {
        KeyValueOperation::Get { key } => KeyValueResponse::Get {
            value: to_value(store.get(&KvKey::parse(key)?)?),
        },
        KeyValueOperation::Set { key, value } => KeyValueResponse::Set {
            previous: to_value(store.set(&KvKey::parse(key)?, value.clone())?),
        },
        KeyValueOperation::Delete { key } => KeyValueResponse::Delete {
            previous: to_value(store.remove(&KvKey::parse(key)?)?),
        },
        KeyValueOperation::Exists { key } => KeyValueResponse::Exists {
            is_present: store.get(&KvKey::parse(key)?)?.is_some(),
        },
        // Launch state is a handful of keys; one page holds them all.
        KeyValueOperation::ListKeys { prefix, .. } => KeyValueResponse::ListKeys {
            keys: store.keys(prefix)?,
            next_cursor: 0,
        },
    })
}

fn to_value(bytes: Option<Vec<u8>>) -> Value {
    bytes.map_or(Value::None, Value::Bytes)
}

fn check_size(value: &[u8]) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| KvError::storage("memory store lock poisoned"))?;
        Ok(entries.get(&key.raw()).cloned())
    }

    fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<Option<Vec<u8>>, KvError> {
        check_size(&value)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::storage("memory store lock poisoned"))?;
        Ok(entries.insert(key.raw(), value))
    }

    fn remove(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| KvError::storage("memory store lock poisoned"))?;
        Ok(entries.remove(&key.raw()))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| KvError::storage("memory store lock poisoned"))?;
        let mut keys: Vec<_> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// SQLite-backed durable store, one row per key.
#[cfg(not(target_arch = "wasm32"))]
pub struct SqliteKv {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

#[cfg(not(target_arch = "wasm32"))]
impl SqliteKv {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, KvError> {
        let conn = rusqlite::Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, KvError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, KvError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, KvError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| KvError::storage("sqlite connection lock poisoned"))?;
        f(&conn).map_err(KvError::from)
    }

    fn read(conn: &rusqlite::Connection, raw: &str) -> Result<Option<Vec<u8>>, rusqlite::Error> {
        use rusqlite::OptionalExtension;

        conn.query_row(
            "SELECT value FROM kv_entries WHERE key = ?1",
            rusqlite::params![raw],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<rusqlite::Error> for KvError {
    fn from(e: rusqlite::Error) -> Self {
        KvError::storage(e.to_string())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl KeyValueStore for SqliteKv {
    fn get(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        let raw = key.raw();
        self.with_conn(|conn| Self::read(conn, &raw))
    }

    fn set(&self, key: &KvKey, value: Vec<u8>) -> Result<Option<Vec<u8>>, KvError> {
        check_size(&value)?;
        let raw = key.raw();
        let now = i64::try_from(crate::model::UnixTimeMs::now().0).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let previous = Self::read(conn, &raw)?;
            conn.execute(
                r#"
                INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
                rusqlite::params![raw, value, now],
            )?;
            Ok(previous)
        })
    }

    fn remove(&self, key: &KvKey) -> Result<Option<Vec<u8>>, KvError> {
        let raw = key.raw();
        self.with_conn(|conn| {
            let previous = Self::read(conn, &raw)?;
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", rusqlite::params![raw])?;
            Ok(previous)
        })
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM kv_entries WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
            )?;
            let rows = stmt.query_map(rusqlite::params![pattern], |row| row.get::<_, String>(0))?;
            let keys = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::kv::LaunchKey;

    fn get(store: &dyn KeyValueStore, key: LaunchKey) -> KeyValueResult {
        resolve_kv(store, &KeyValueOperation::Get { key: key.raw() })
    }

    #[test]
    fn test_memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        let key = LaunchKey::SavedDestination.key();

        assert_eq!(kv.get(&key).unwrap(), None);
        assert_eq!(kv.set(&key, b"\"https://w\"".to_vec()).unwrap(), None);
        assert_eq!(kv.get(&key).unwrap().as_deref(), Some(&b"\"https://w\""[..]));
        assert!(kv.remove(&key).unwrap().is_some());
        assert_eq!(kv.remove(&key).unwrap(), None);
        assert!(kv.is_empty());
    }

    #[test]
    fn test_value_size_limit() {
        let kv = MemoryKv::new();
        let result = kv.set(&LaunchKey::AppMode.key(), vec![0u8; MAX_VALUE_SIZE + 1]);
        assert!(matches!(result, Err(KvError::ValueTooLarge { .. })));
    }

    #[test]
    fn test_resolve_get_and_set() {
        let kv = MemoryKv::new();
        assert_eq!(
            get(&kv, LaunchKey::AppMode),
            KeyValueResult::Ok {
                response: KeyValueResponse::Get { value: Value::None }
            }
        );

        let set = resolve_kv(
            &kv,
            &KeyValueOperation::Set {
                key: LaunchKey::AppMode.raw(),
                value: b"\"remote\"".to_vec(),
            },
        );
        assert_eq!(
            set,
            KeyValueResult::Ok {
                response: KeyValueResponse::Set {
                    previous: Value::None
                }
            }
        );
        assert_eq!(
            get(&kv, LaunchKey::AppMode),
            KeyValueResult::Ok {
                response: KeyValueResponse::Get {
                    value: Value::Bytes(b"\"remote\"".to_vec())
                }
            }
        );
    }

    #[test]
    fn test_resolve_lists_by_namespace() {
        let kv = MemoryKv::new();
        for key in [
            LaunchKey::AcceptedNotifications,
            LaunchKey::AppMode,
            LaunchKey::LastNotificationAsk,
        ] {
            kv.set(&key.key(), b"1".to_vec()).unwrap();
        }
        let listed = resolve_kv(
            &kv,
            &KeyValueOperation::ListKeys {
                prefix: "notifications:".into(),
                cursor: 0,
            },
        );
        assert_eq!(
            listed,
            KeyValueResult::Ok {
                response: KeyValueResponse::ListKeys {
                    keys: vec![
                        "notifications:accepted".into(),
                        "notifications:last_ask_ms".into()
                    ],
                    next_cursor: 0,
                }
            }
        );
    }

    #[test]
    fn test_resolve_rejects_unsafe_keys() {
        let kv = MemoryKv::new();
        let result = resolve_kv(
            &kv,
            &KeyValueOperation::Set {
                key: "launch:../escape".into(),
                value: vec![1],
            },
        );
        assert!(matches!(result, KeyValueResult::Err { .. }));
        assert!(kv.is_empty());
    }

    #[test]
    fn test_sqlite_kv_roundtrip() {
        let kv = SqliteKv::open_in_memory().unwrap();
        let key = LaunchKey::HasEverRunBefore.key();

        assert_eq!(kv.get(&key).unwrap(), None);
        kv.set(&key, b"false".to_vec()).unwrap();
        assert_eq!(kv.set(&key, b"true".to_vec()).unwrap(), Some(b"false".to_vec()));
        assert_eq!(kv.get(&key).unwrap(), Some(b"true".to_vec()));
        assert_eq!(kv.remove(&key).unwrap(), Some(b"true".to_vec()));
        assert_eq!(kv.get(&key).unwrap(), None);
    }

    #[test]
    fn test_sqlite_keys_escape_wildcards() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set(&LaunchKey::AppMode.key(), b"1".to_vec()).unwrap();
        kv.set(&LaunchKey::SavedExpiry.key(), b"1".to_vec()).unwrap();
        kv.set(&KvKey::parse("launchXapp:x").unwrap(), b"1".to_vec())
            .unwrap();

        assert_eq!(
            kv.keys("launch:").unwrap(),
            vec!["launch:app_mode".to_string(), "launch:saved_expiry".to_string()]
        );
        assert!(kv.keys("launch_").unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_kv_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launch.sqlite");
        let key = LaunchKey::AppMode.key();

        {
            let kv = SqliteKv::open(&path).unwrap();
            kv.set(&key, b"\"remote\"".to_vec()).unwrap();
        }

        let kv = SqliteKv::open(&path).unwrap();
        assert_eq!(kv.get(&key).unwrap(), Some(b"\"remote\"".to_vec()));
    }
}
