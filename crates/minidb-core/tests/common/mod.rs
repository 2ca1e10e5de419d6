//! Scripted engine for dispatcher tests.
//!
//! Records every call it receives and never notifies on its own; tests fire
//! each notification by hand, in whatever order they want to exercise.

#![allow(dead_code)]

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use minidb_core::engine::{
    Connection, Engine, Listener, ObjectStore, OpenRequest, Request, Transaction, VersionChange,
};
use minidb_core::{EngineError, Key, Record, TransactionMode};

/// One call made against the scripted engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(String, Option<u32>),
    DeleteDatabase(String),
    CreateCollection(String, String),
    DeleteCollection(String),
    Transaction(String, TransactionMode),
    ObjectStore(String),
    Abort,
    Close,
    Get(Key),
    GetAll,
    Put(Record),
    Delete(Key),
    Clear,
    Count,
}

struct Slot<T>(RefCell<Option<Listener<T>>>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(RefCell::new(None))
    }
}

impl<T> Slot<T> {
    fn set(&self, listener: Listener<T>) {
        *self.0.borrow_mut() = Some(listener);
    }

    fn fire(&self, value: T) -> bool {
        let listener = self.0.borrow_mut().take();
        match listener {
            Some(listener) => {
                listener(value);
                true
            }
            None => false,
        }
    }

    fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }
}

#[derive(Default)]
struct Shared {
    calls: RefCell<Vec<Call>>,
    collections: RefCell<Vec<String>>,
    reject_next: RefCell<Option<EngineError>>,
    opens: RefCell<Vec<ScriptedOpenRequest>>,
    transactions: RefCell<Vec<ScriptedTransaction>>,
    requests: RefCell<Vec<ScriptedRequest>>,
}

impl Shared {
    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

#[derive(Clone, Default)]
pub struct ScriptedEngine {
    shared: Rc<Shared>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.borrow_mut().clear();
    }

    /// Pretend the database holds `name`.
    pub fn add_collection(&self, name: &str) {
        self.shared.collections.borrow_mut().push(name.to_string());
    }

    pub fn remove_collection(&self, name: &str) {
        self.shared.collections.borrow_mut().retain(|n| n != name);
    }

    /// Make the next store call fail synchronously.
    pub fn reject_next_call(&self, error: EngineError) {
        *self.shared.reject_next.borrow_mut() = Some(error);
    }

    pub fn last_open(&self) -> ScriptedOpenRequest {
        self.shared.opens.borrow().last().cloned().expect("no open")
    }

    pub fn last_transaction(&self) -> ScriptedTransaction {
        self.shared
            .transactions
            .borrow()
            .last()
            .cloned()
            .expect("no transaction")
    }

    /// Drop every pending transaction and request with their listeners.
    pub fn forget_listeners(&self) {
        self.shared.transactions.borrow_mut().clear();
        self.shared.requests.borrow_mut().clear();
    }

    pub fn requests(&self) -> Vec<ScriptedRequest> {
        self.shared.requests.borrow().clone()
    }

    pub fn last_request(&self) -> ScriptedRequest {
        self.shared
            .requests
            .borrow()
            .last()
            .cloned()
            .expect("no request")
    }
}

impl Engine for ScriptedEngine {
    type Connection = ScriptedConnection;
    type OpenRequest = ScriptedOpenRequest;
    type DeleteRequest = ScriptedRequest;

    fn open(&self, name: &str, version: Option<u32>) -> Result<ScriptedOpenRequest, EngineError> {
        self.shared.record(Call::Open(name.to_string(), version));
        let request = ScriptedOpenRequest {
            shared: self.shared.clone(),
            name: name.to_string(),
            slots: Rc::new(OpenSlots::default()),
        };
        self.shared.opens.borrow_mut().push(request.clone());
        Ok(request)
    }

    fn delete_database(&self, name: &str) -> Result<ScriptedRequest, EngineError> {
        self.shared.record(Call::DeleteDatabase(name.to_string()));
        let request = ScriptedRequest::default();
        self.shared.requests.borrow_mut().push(request.clone());
        Ok(request)
    }
}

#[derive(Default)]
struct OpenSlots {
    upgrade: Slot<VersionChange<ScriptedConnection>>,
    success: Slot<ScriptedConnection>,
    error: Slot<EngineError>,
}

#[derive(Clone)]
pub struct ScriptedOpenRequest {
    shared: Rc<Shared>,
    name: String,
    slots: Rc<OpenSlots>,
}

impl ScriptedOpenRequest {
    fn connection(&self, version: u32) -> ScriptedConnection {
        ScriptedConnection {
            shared: self.shared.clone(),
            name: self.name.clone(),
            version,
        }
    }

    pub fn upgrade(&self, old_version: u32, new_version: u32) {
        self.slots.upgrade.fire(VersionChange {
            connection: self.connection(new_version),
            old_version,
            new_version,
        });
    }

    pub fn succeed(&self, version: u32) {
        self.slots.success.fire(self.connection(version));
    }

    pub fn fail(&self, error: EngineError) {
        self.slots.error.fire(error);
    }
}

impl OpenRequest for ScriptedOpenRequest {
    type Connection = ScriptedConnection;

    fn on_upgrade_needed(&self, listener: Listener<VersionChange<ScriptedConnection>>) {
        self.slots.upgrade.set(listener);
    }

    fn on_success(&self, listener: Listener<ScriptedConnection>) {
        self.slots.success.set(listener);
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        self.slots.error.set(listener);
    }
}

#[derive(Clone)]
pub struct ScriptedConnection {
    shared: Rc<Shared>,
    name: String,
    version: u32,
}

impl Connection for ScriptedConnection {
    type Transaction = ScriptedTransaction;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collection_names(&self) -> Vec<String> {
        self.shared.collections.borrow().clone()
    }

    fn create_collection(&self, name: &str, key_path: &str) -> Result<(), EngineError> {
        self.shared
            .record(Call::CreateCollection(name.to_string(), key_path.to_string()));
        self.shared.collections.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> Result<(), EngineError> {
        self.shared.record(Call::DeleteCollection(name.to_string()));
        self.shared.collections.borrow_mut().retain(|n| n != name);
        Ok(())
    }

    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> Result<ScriptedTransaction, EngineError> {
        self.shared
            .record(Call::Transaction(collection.to_string(), mode));
        let tx = ScriptedTransaction {
            shared: self.shared.clone(),
            slots: Rc::new(TransactionSlots::default()),
        };
        self.shared.transactions.borrow_mut().push(tx.clone());
        Ok(tx)
    }

    fn close(&self) {
        self.shared.record(Call::Close);
    }
}

#[derive(Default)]
struct TransactionSlots {
    complete: Slot<()>,
    error: Slot<EngineError>,
}

#[derive(Clone)]
pub struct ScriptedTransaction {
    shared: Rc<Shared>,
    slots: Rc<TransactionSlots>,
}

impl ScriptedTransaction {
    /// Fire the complete notification. Returns whether anyone listened.
    pub fn complete(&self) -> bool {
        self.slots.complete.fire(())
    }

    pub fn fail(&self, error: EngineError) -> bool {
        self.slots.error.fire(error)
    }

    pub fn has_complete_listener(&self) -> bool {
        self.slots.complete.is_set()
    }
}

impl Transaction for ScriptedTransaction {
    type Store = ScriptedStore;

    fn object_store(&self, name: &str) -> Result<ScriptedStore, EngineError> {
        self.shared.record(Call::ObjectStore(name.to_string()));
        Ok(ScriptedStore {
            shared: self.shared.clone(),
        })
    }

    fn abort(&self) {
        self.shared.record(Call::Abort);
    }

    fn on_complete(&self, listener: Listener<()>) {
        self.slots.complete.set(listener);
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        self.slots.error.set(listener);
    }
}

#[derive(Clone)]
pub struct ScriptedStore {
    shared: Rc<Shared>,
}

impl ScriptedStore {
    fn issue(&self, call: Call) -> Result<ScriptedRequest, EngineError> {
        self.shared.record(call);
        if let Some(error) = self.shared.reject_next.borrow_mut().take() {
            return Err(error);
        }
        let request = ScriptedRequest::default();
        self.shared.requests.borrow_mut().push(request.clone());
        Ok(request)
    }
}

impl ObjectStore for ScriptedStore {
    type Request = ScriptedRequest;

    fn get(&self, key: &Key) -> Result<ScriptedRequest, EngineError> {
        self.issue(Call::Get(key.clone()))
    }

    fn get_all(&self) -> Result<ScriptedRequest, EngineError> {
        self.issue(Call::GetAll)
    }

    fn put(&self, record: &Record) -> Result<ScriptedRequest, EngineError> {
        self.issue(Call::Put(record.clone()))
    }

    fn delete(&self, key: &Key) -> Result<ScriptedRequest, EngineError> {
        self.issue(Call::Delete(key.clone()))
    }

    fn clear(&self) -> Result<ScriptedRequest, EngineError> {
        self.issue(Call::Clear)
    }

    fn count(&self) -> Result<ScriptedRequest, EngineError> {
        self.issue(Call::Count)
    }
}

#[derive(Default)]
struct RequestSlots {
    success: Slot<Record>,
    error: Slot<EngineError>,
}

#[derive(Clone, Default)]
pub struct ScriptedRequest {
    slots: Rc<RequestSlots>,
}

impl ScriptedRequest {
    pub fn succeed(&self, value: Record) -> bool {
        self.slots.success.fire(value)
    }

    pub fn fail(&self, error: EngineError) -> bool {
        self.slots.error.fire(error)
    }

    pub fn has_success_listener(&self) -> bool {
        self.slots.success.is_set()
    }

    pub fn has_error_listener(&self) -> bool {
        self.slots.error.is_set()
    }
}

impl Request for ScriptedRequest {
    fn on_success(&self, listener: Listener<Record>) {
        self.slots.success.set(listener);
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        self.slots.error.set(listener);
    }
}

/// Poll once without blocking.
pub fn poll<F: Future + Unpin>(future: &mut F) -> Option<F::Output> {
    future.now_or_never()
}
