//! IndexedDB engine for minidb stores (browser WASM)
//!
//! Implements the `minidb-core` engine traits on top of web-sys, so the
//! store's dispatcher drives real IndexedDB requests and transactions.
//! Records cross the boundary as JSON and are stored as plain JS objects.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//!
//! let store = minidb_indexeddb::open("people", "id", vec![]).await?;
//! store.put(json!({"id": 1, "name": "John"})).await?;
//! let john = store.get_entry(1).await?;
//! ```

pub mod engine;
pub mod error;
pub mod idb;

use minidb_core::{MethodFacade, Record, StorageHandle, StoreConfig};

pub use engine::{IdbConnection, IdbEngine};
pub use error::{IndexedDbError, Result};

/// A store backed by the browser's IndexedDB.
pub type IdbStore = MethodFacade<IdbEngine>;

/// Open `database_name` in the browser's IndexedDB.
pub async fn open(
    database_name: &str,
    key_path: &str,
    initial_records: Vec<Record>,
) -> minidb_core::Result<IdbStore> {
    StorageHandle::open(IdbEngine::new()?, database_name, key_path, initial_records).await
}

/// Open the store described by `config` in the browser's IndexedDB.
pub async fn open_with_config(config: &StoreConfig) -> minidb_core::Result<IdbStore> {
    StorageHandle::open_with_config(IdbEngine::new()?, config).await
}

/// Delete `database_name` from the browser's IndexedDB.
pub async fn delete_database(database_name: &str) -> minidb_core::Result<()> {
    StorageHandle::delete_database(&IdbEngine::new()?, database_name).await
}
