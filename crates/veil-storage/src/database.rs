//! Database connection and key-path operations

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::keypath::KeyPath;
use crate::migrations::run_migrations;
use crate::Result;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for better concurrent performance
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Read and decode the value stored under a key path
    pub fn get_value<T: DeserializeOwned>(&self, path: &KeyPath) -> Result<Option<T>> {
        let key = path.to_key();
        let raw: Option<String> = self.with_connection(|conn| {
            let value = conn
                .query_row("SELECT value FROM kv_store WHERE key = ?1", [&key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_value<T: Serialize>(&self, path: &KeyPath, value: &T) -> Result<()> {
        let key = path.to_key();
        let encoded = serde_json::to_string(value)?;
        let updated_at = Utc::now().to_rfc3339();

        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, encoded, updated_at],
            )?;
            Ok(())
        })
    }

    /// Remove a key path. Returns whether a record existed.
    pub fn remove(&self, path: &KeyPath) -> Result<bool> {
        let key = path.to_key();
        self.with_connection(|conn| {
            let affected = conn.execute("DELETE FROM kv_store WHERE key = ?1", [&key])?;
            Ok(affected > 0)
        })
    }

    /// All records whose key path starts with `namespace`, in key order
    pub fn entries(&self, namespace: &str) -> Result<Vec<(KeyPath, serde_json::Value)>> {
        let rows: Vec<(String, String)> = self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM kv_store ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut out = Vec::new();
        for (key, raw) in rows {
            let path = match KeyPath::parse(&key) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed storage key");
                    continue;
                }
            };
            if path.first() != namespace {
                continue;
            }
            out.push((path, serde_json::from_str(&raw)?));
        }

        Ok(out)
    }

    /// Remove every record under a namespace
    pub fn clear(&self, namespace: &str) -> Result<usize> {
        let keys: Vec<KeyPath> = self
            .entries(namespace)?
            .into_iter()
            .map(|(path, _)| path)
            .collect();

        self.transaction(|conn| {
            for path in &keys {
                conn.execute("DELETE FROM kv_store WHERE key = ?1", [path.to_key()])?;
            }
            Ok(keys.len())
        })
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_connection(|conn| {
            let count: i32 =
                conn.query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_set_get_remove() {
        let db = Database::open_in_memory().unwrap();
        let path = KeyPath::new(["_SETTINGS_", "example.com", "gpc"]).unwrap();

        assert_eq!(db.get_value::<bool>(&path).unwrap(), None);

        db.set_value(&path, &false).unwrap();
        assert_eq!(db.get_value::<bool>(&path).unwrap(), Some(false));

        assert!(db.remove(&path).unwrap());
        assert!(!db.remove(&path).unwrap());
        assert_eq!(db.get_value::<bool>(&path).unwrap(), None);
    }

    #[test]
    fn test_entries_filtered_by_namespace() {
        let db = Database::open_in_memory().unwrap();
        db.set_value(&KeyPath::new(["_SETTINGS_", "a.com", "gpc"]).unwrap(), &false)
            .unwrap();
        db.set_value(&KeyPath::new(["_PREFS_", "theme"]).unwrap(), &"dark")
            .unwrap();

        let entries = db.entries("_SETTINGS_").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.segments()[1], "a.com");
        assert_eq!(entries[0].1, serde_json::Value::Bool(false));

        assert_eq!(db.clear("_SETTINGS_").unwrap(), 1);
        assert!(db.entries("_SETTINGS_").unwrap().is_empty());
        assert_eq!(db.entries("_PREFS_").unwrap().len(), 1);
    }
}
