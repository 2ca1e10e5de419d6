//! Error types for the IndexedDB engine

use minidb_core::EngineError;
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// Result type for IndexedDB helpers
pub type Result<T> = std::result::Result<T, IndexedDbError>;

/// Errors raised on the Rust side of the IndexedDB bridge
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB is not available in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JavaScript value conversion error
    #[error("JS conversion error: {0}")]
    JsValue(String),
}

impl From<JsValue> for IndexedDbError {
    fn from(val: JsValue) -> Self {
        IndexedDbError::JsValue(describe(&val))
    }
}

impl From<IndexedDbError> for EngineError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::NotAvailable(msg) => EngineError::new("NotSupportedError", msg),
            IndexedDbError::Json(e) => EngineError::new("DataError", e.to_string()),
            IndexedDbError::JsValue(msg) => EngineError::new("UnknownError", msg),
        }
    }
}

impl From<IndexedDbError> for minidb_core::Error {
    fn from(err: IndexedDbError) -> Self {
        minidb_core::Error::Connection(err.into())
    }
}

/// Engine error carried by a DOMException.
pub fn dom_error(exception: &DomException) -> EngineError {
    EngineError::new(exception.name(), exception.message())
}

/// Engine error for a value thrown by a synchronous IndexedDB call.
///
/// IndexedDB throws DOMExceptions; anything else is reported as unknown.
pub fn thrown(value: JsValue) -> EngineError {
    match value.dyn_ref::<DomException>() {
        Some(exception) => dom_error(exception),
        None => EngineError::new("UnknownError", describe(&value)),
    }
}

fn describe(val: &JsValue) -> String {
    js_sys::JSON::stringify(val)
        .map(String::from)
        .unwrap_or_else(|_| format!("{:?}", val))
}
