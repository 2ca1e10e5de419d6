//! IndexedDB implementation of the minidb engine traits
//!
//! Every listener the store attaches becomes an `on*` handler on the
//! underlying IDB object. Request handlers live in their transaction's
//! [`Scope`] and are dropped when the transaction completes or aborts; open
//! and delete requests own their scope and drop it on success or error.

use std::cell::RefCell;
use std::rc::Rc;

use minidb_core::engine::{
    Connection, Engine, Listener, ObjectStore, OpenRequest, Request, Transaction, VersionChange,
};
use minidb_core::{EngineError, Key, Record, TransactionMode};
use tracing::warn;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    IdbDatabase, IdbFactory, IdbObjectStore, IdbObjectStoreParameters, IdbOpenDbRequest,
    IdbRequest, IdbTransaction, IdbTransactionMode, IdbVersionChangeEvent,
};

use crate::error::{dom_error, thrown, Result};
use crate::idb::{idb_factory, js_to_record, key_to_js, record_to_js, Scope};

/// Single-use listener callable from an `FnMut` handler.
fn once<T: 'static>(listener: Listener<T>) -> impl FnMut(T) {
    let mut listener = Some(listener);
    move |value| {
        if let Some(listener) = listener.take() {
            listener(value);
        }
    }
}

fn request_error(request: &IdbRequest) -> EngineError {
    match request.error() {
        Ok(Some(exception)) => dom_error(&exception),
        Ok(None) => EngineError::new("UnknownError", "request failed without an error"),
        Err(value) => thrown(value),
    }
}

fn idb_mode(mode: TransactionMode) -> IdbTransactionMode {
    match mode {
        TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
        TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
    }
}

/// The browser's IndexedDB.
#[derive(Clone)]
pub struct IdbEngine {
    factory: IdbFactory,
}

impl IdbEngine {
    /// Bind to the global `indexedDB` factory.
    pub fn new() -> Result<Self> {
        Ok(Self {
            factory: idb_factory()?,
        })
    }

    pub fn from_factory(factory: IdbFactory) -> Self {
        Self { factory }
    }
}

impl Engine for IdbEngine {
    type Connection = IdbConnection;
    type OpenRequest = IdbOpenRequest;
    type DeleteRequest = IdbRequestHandle;

    fn open(&self, name: &str, version: Option<u32>) -> std::result::Result<IdbOpenRequest, EngineError> {
        let request = match version {
            Some(version) => self.factory.open_with_u32(name, version),
            None => self.factory.open(name),
        }
        .map_err(thrown)?;

        let scope = Scope::new();
        let database = name.to_string();
        request.set_onblocked(Some(&scope.handler(false, move |_| {
            warn!("open of {} blocked by another connection", database);
        })));

        Ok(IdbOpenRequest { request, scope })
    }

    fn delete_database(&self, name: &str) -> std::result::Result<IdbRequestHandle, EngineError> {
        let request = self.factory.delete_database(name).map_err(thrown)?;
        Ok(IdbRequestHandle {
            request: request.unchecked_into(),
            scope: Scope::new(),
            release: true,
        })
    }
}

/// Pending `indexedDB.open`.
pub struct IdbOpenRequest {
    request: IdbOpenDbRequest,
    scope: Scope,
}

impl IdbOpenRequest {
    fn connection(request: &IdbOpenDbRequest) -> std::result::Result<IdbConnection, EngineError> {
        let result = request.result().map_err(thrown)?;
        let db = result
            .dyn_into::<IdbDatabase>()
            .map_err(|_| EngineError::new("UnknownError", "open result is not IdbDatabase"))?;
        Ok(IdbConnection {
            db,
            scope: Scope::new(),
        })
    }
}

impl OpenRequest for IdbOpenRequest {
    type Connection = IdbConnection;

    fn on_upgrade_needed(&self, listener: Listener<VersionChange<IdbConnection>>) {
        let request = self.request.clone();
        let mut listener = once(listener);
        let handler = self.scope.handler(false, move |event| {
            let event: IdbVersionChangeEvent = event.unchecked_into();
            match Self::connection(&request) {
                Ok(connection) => listener(VersionChange {
                    connection,
                    old_version: event.old_version() as u32,
                    new_version: event.new_version().unwrap_or_default() as u32,
                }),
                Err(err) => warn!("upgrade without a database: {}", err),
            }
        });
        self.request.set_onupgradeneeded(Some(&handler));
    }

    fn on_success(&self, listener: Listener<IdbConnection>) {
        let request = self.request.clone();
        let mut listener = once(listener);
        let handler = self.scope.handler(true, move |_| match Self::connection(&request) {
            Ok(connection) => {
                connection.close_on_version_change();
                listener(connection)
            }
            Err(err) => warn!("open succeeded without a database: {}", err),
        });
        self.request.set_onsuccess(Some(&handler));
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        let request: IdbRequest = self.request.clone().unchecked_into();
        let mut listener = once(listener);
        let handler = self
            .scope
            .handler(true, move |_| listener(request_error(&request)));
        self.request.set_onerror(Some(&handler));
    }
}

/// An open `IDBDatabase`.
#[derive(Clone)]
pub struct IdbConnection {
    db: IdbDatabase,
    scope: Scope,
}

impl IdbConnection {
    pub fn database(&self) -> &IdbDatabase {
        &self.db
    }

    /// Close when another connection asks for a version change, so its
    /// upgrade or delete is not blocked by this one.
    fn close_on_version_change(&self) {
        let db = self.db.clone();
        let name = self.db.name();
        let handler = self.scope.handler(true, move |_| {
            warn!("closing {} for a version change elsewhere", name);
            db.close();
        });
        self.db.set_onversionchange(Some(&handler));
    }
}

impl Connection for IdbConnection {
    type Transaction = IdbTransactionHandle;

    fn name(&self) -> String {
        self.db.name()
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn collection_names(&self) -> Vec<String> {
        let names = self.db.object_store_names();
        (0..names.length()).filter_map(|i| names.get(i)).collect()
    }

    fn contains_collection(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn create_collection(&self, name: &str, key_path: &str) -> std::result::Result<(), EngineError> {
        let params = IdbObjectStoreParameters::new();
        js_sys::Reflect::set(&params, &"keyPath".into(), &JsValue::from_str(key_path))
            .map_err(thrown)?;
        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(thrown)?;
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> std::result::Result<(), EngineError> {
        self.db.delete_object_store(name).map_err(thrown)
    }

    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> std::result::Result<IdbTransactionHandle, EngineError> {
        let tx = self
            .db
            .transaction_with_str_and_mode(collection, idb_mode(mode))
            .map_err(thrown)?;
        Ok(IdbTransactionHandle {
            tx,
            scope: Scope::new(),
            error: Rc::new(RefCell::new(None)),
        })
    }

    fn close(&self) {
        self.db.set_onversionchange(None);
        self.scope.release();
        self.db.close();
    }
}

/// An `IDBTransaction` and the handlers of its requests.
#[derive(Clone)]
pub struct IdbTransactionHandle {
    tx: IdbTransaction,
    scope: Scope,
    error: Rc<RefCell<Option<Box<dyn FnMut(EngineError)>>>>,
}

impl IdbTransactionHandle {
    fn failure(&self) -> EngineError {
        self.tx
            .error()
            .map(|exception| dom_error(&exception))
            .unwrap_or_else(|| EngineError::abort("the transaction was aborted"))
    }
}

impl Transaction for IdbTransactionHandle {
    type Store = IdbStoreHandle;

    fn object_store(&self, name: &str) -> std::result::Result<IdbStoreHandle, EngineError> {
        let store = self.tx.object_store(name).map_err(thrown)?;
        Ok(IdbStoreHandle {
            store,
            scope: self.scope.clone(),
        })
    }

    fn abort(&self) {
        // Throws only if the transaction already finished.
        if let Err(err) = self.tx.abort() {
            warn!("abort ignored: {}", thrown(err));
        }
    }

    fn on_complete(&self, listener: Listener<()>) {
        let mut listener = once(listener);
        let handler = self.scope.handler(true, move |_| listener(()));
        self.tx.set_oncomplete(Some(&handler));
    }

    /// Fires on the first `error` or `abort` event.
    fn on_error(&self, listener: Listener<EngineError>) {
        *self.error.borrow_mut() = Some(Box::new(once(listener)));

        let this = self.clone();
        let on_error = self.scope.handler(false, move |_| {
            if let Some(listener) = this.error.borrow_mut().as_mut() {
                listener(this.failure());
            }
        });
        self.tx.set_onerror(Some(&on_error));

        let this = self.clone();
        let on_abort = self.scope.handler(true, move |_| {
            let listener = this.error.borrow_mut().take();
            if let Some(mut listener) = listener {
                listener(this.failure());
            }
        });
        self.tx.set_onabort(Some(&on_abort));
    }
}

/// An `IDBObjectStore` bound to a transaction.
pub struct IdbStoreHandle {
    store: IdbObjectStore,
    scope: Scope,
}

impl IdbStoreHandle {
    fn wrap(
        &self,
        request: std::result::Result<IdbRequest, JsValue>,
    ) -> std::result::Result<IdbRequestHandle, EngineError> {
        Ok(IdbRequestHandle {
            request: request.map_err(thrown)?,
            scope: self.scope.clone(),
            release: false,
        })
    }
}

impl ObjectStore for IdbStoreHandle {
    type Request = IdbRequestHandle;

    fn get(&self, key: &Key) -> std::result::Result<IdbRequestHandle, EngineError> {
        self.wrap(self.store.get(&key_to_js(key)))
    }

    fn get_all(&self) -> std::result::Result<IdbRequestHandle, EngineError> {
        self.wrap(self.store.get_all())
    }

    fn put(&self, record: &Record) -> std::result::Result<IdbRequestHandle, EngineError> {
        let value = record_to_js(record).map_err(EngineError::from)?;
        self.wrap(self.store.put(&value))
    }

    fn delete(&self, key: &Key) -> std::result::Result<IdbRequestHandle, EngineError> {
        self.wrap(self.store.delete(&key_to_js(key)))
    }

    fn clear(&self) -> std::result::Result<IdbRequestHandle, EngineError> {
        self.wrap(self.store.clear())
    }

    fn count(&self) -> std::result::Result<IdbRequestHandle, EngineError> {
        self.wrap(self.store.count())
    }
}

/// An `IDBRequest`.
pub struct IdbRequestHandle {
    request: IdbRequest,
    scope: Scope,
    release: bool,
}

impl Request for IdbRequestHandle {
    fn on_success(&self, listener: Listener<Record>) {
        let request = self.request.clone();
        let mut listener = once(listener);
        let handler = self.scope.handler(self.release, move |_| {
            let outcome = request
                .result()
                .map_err(thrown)
                .and_then(|value| js_to_record(&value).map_err(EngineError::from));
            match outcome {
                Ok(record) => listener(record),
                Err(err) => warn!("unreadable request result: {}", err),
            }
        });
        self.request.set_onsuccess(Some(&handler));
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        let request = self.request.clone();
        let mut listener = once(listener);
        let handler = self
            .scope
            .handler(self.release, move |_| listener(request_error(&request)));
        self.request.set_onerror(Some(&handler));
    }
}
