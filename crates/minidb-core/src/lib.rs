//! minidb core
//!
//! A small asynchronous key-value store over a callback-driven transactional
//! engine such as IndexedDB. Opening a store yields a [`MethodFacade`] whose
//! methods (`get_entry`, `get_all`, `put`, `delete_entry`, `delete_all`,
//! `count`) each dispatch one transaction and settle one future.
//!
//! The engine is consumed through the traits in [`engine`]. [`MemoryEngine`]
//! implements them natively; the `minidb-indexeddb` crate implements them for
//! the browser.
//!
//! # Example
//!
//! ```rust
//! use minidb_core::{MemoryEngine, StorageHandle};
//! use serde_json::json;
//!
//! let engine = MemoryEngine::new();
//! engine
//!     .run_until(async {
//!         let store = StorageHandle::open(engine.clone(), "people", "id", vec![]).await?;
//!         store.put(json!({"id": 1, "name": "John"})).await?;
//!
//!         let john = store.get_entry(1).await?;
//!         assert_eq!(john, Some(json!({"id": 1, "name": "John"})));
//!         assert_eq!(store.count().await?, 1);
//!         Ok::<_, minidb_core::Error>(())
//!     })
//!     .unwrap()
//!     .unwrap();
//! ```
//!
//! The crate also carries [`TimeDuration`], a signed minute count with
//! `"H:MM"` parsing and formatting.

pub mod config;
pub mod dispatch;
pub mod duration;
pub mod engine;
pub mod error;
pub mod facade;
pub mod handle;
pub mod logging;
pub mod memory;

// Re-export main types at crate root
pub use config::StoreConfig;
pub use dispatch::{OperationKind, Parameter, PendingOperation, QueryDispatcher};
pub use duration::{ClockParts, DurationError, DurationInput, Part, TimeDuration};
pub use engine::{EngineError, Key, Record, TransactionMode};
pub use error::{Error, Result};
pub use facade::{Entries, MethodFacade};
pub use handle::{ConnectionState, StorageHandle};
pub use memory::MemoryEngine;
