//! Storage engine capability
//!
//! The engine is the callback-driven transactional store underneath minidb
//! (IndexedDB in the browser, [`MemoryEngine`](crate::memory::MemoryEngine)
//! natively). Every asynchronous step reports back through listeners
//! registered on the returned request or transaction, exactly like the
//! `onsuccess` / `oncomplete` / `onerror` handlers of IndexedDB.
//!
//! Listeners must be attached synchronously after the call that created the
//! request; engines deliver notifications on a later turn of their event loop.
//! A notification with no listener attached is dropped.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored value. Opaque to minidb apart from its key field.
pub type Record = Value;

/// One-shot notification listener.
pub type Listener<T> = Box<dyn FnOnce(T)>;

/// Transaction mode requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

impl TransactionMode {
    /// IndexedDB spelling of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of a record: a number or a string.
///
/// Keys order numbers before strings, numbers by value and strings
/// lexicographically, matching IndexedDB key comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Number(f64),
    Text(String),
}

impl Key {
    /// Extract the key stored at `key_path` in `record`.
    ///
    /// Returns `None` when the field is missing or is neither a number nor a
    /// string.
    pub fn from_record(record: &Record, key_path: &str) -> Option<Key> {
        match record.get(key_path)? {
            Value::Number(n) => n.as_f64().map(Key::Number),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert the key back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Key::Text(s) => Value::String(s.clone()),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Number(_), Key::Text(_)) => Ordering::Less,
            (Key::Text(_), Key::Number(_)) => Ordering::Greater,
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

/// Error reported by the engine, shaped like a DOMException.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct EngineError {
    /// Exception name, e.g. `DataError`, `NotFoundError`.
    pub name: String,
    /// Human readable detail.
    pub message: String,
}

impl EngineError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new("AbortError", message)
    }
}

/// Payload of an upgrade-needed notification.
pub struct VersionChange<C> {
    /// Connection being upgraded. Schema changes are only valid while the
    /// upgrade listener runs.
    pub connection: C,
    /// Version before the upgrade; 0 for a database that did not exist.
    pub old_version: u32,
    pub new_version: u32,
}

/// A pending request emitting one success or one error notification.
pub trait Request {
    fn on_success(&self, listener: Listener<Record>);
    fn on_error(&self, listener: Listener<EngineError>);
}

/// A pending database open.
pub trait OpenRequest {
    type Connection: Connection;

    fn on_upgrade_needed(&self, listener: Listener<VersionChange<Self::Connection>>);
    fn on_success(&self, listener: Listener<Self::Connection>);
    fn on_error(&self, listener: Listener<EngineError>);
}

/// A named record collection accessed through a transaction.
///
/// Calls return `Err` when the engine rejects them synchronously (invalid key,
/// read-only violation, inactive transaction). Otherwise the returned request
/// reports the outcome later.
pub trait ObjectStore {
    type Request: Request;

    fn get(&self, key: &Key) -> Result<Self::Request, EngineError>;
    fn get_all(&self) -> Result<Self::Request, EngineError>;
    fn put(&self, record: &Record) -> Result<Self::Request, EngineError>;
    fn delete(&self, key: &Key) -> Result<Self::Request, EngineError>;
    fn clear(&self) -> Result<Self::Request, EngineError>;
    fn count(&self) -> Result<Self::Request, EngineError>;
}

/// A transaction emitting one complete or one error notification.
pub trait Transaction {
    type Store: ObjectStore;

    fn object_store(&self, name: &str) -> Result<Self::Store, EngineError>;
    fn abort(&self);
    fn on_complete(&self, listener: Listener<()>);
    fn on_error(&self, listener: Listener<EngineError>);
}

/// An open database connection.
pub trait Connection: Clone + 'static {
    type Transaction: Transaction;

    fn name(&self) -> String;
    fn version(&self) -> u32;
    fn collection_names(&self) -> Vec<String>;

    fn contains_collection(&self, name: &str) -> bool {
        self.collection_names().iter().any(|n| n == name)
    }

    /// Create a collection keyed by `key_path`. Only valid during an upgrade.
    fn create_collection(&self, name: &str, key_path: &str) -> Result<(), EngineError>;

    /// Drop a collection and its records. Only valid during an upgrade.
    fn delete_collection(&self, name: &str) -> Result<(), EngineError>;

    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> Result<Self::Transaction, EngineError>;

    fn close(&self);
}

/// Entry point of a storage engine.
pub trait Engine: Clone + 'static {
    type Connection: Connection;
    type OpenRequest: OpenRequest<Connection = Self::Connection>;
    type DeleteRequest: Request;

    /// Open `name` at `version`, or at its current version when `None`.
    /// A database that does not exist is created at version 1.
    fn open(&self, name: &str, version: Option<u32>) -> Result<Self::OpenRequest, EngineError>;

    fn delete_database(&self, name: &str) -> Result<Self::DeleteRequest, EngineError>;
}
