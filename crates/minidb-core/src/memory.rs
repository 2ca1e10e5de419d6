//! In-memory storage engine
//!
//! A deterministic, single-threaded implementation of the engine traits for
//! native use and testing. Not suitable for persistence.
//!
//! Notifications are never delivered from inside the call that created a
//! request. They are queued on the engine's event queue and delivered by
//! [`MemoryEngine::run_until`] or [`MemoryEngine::run_until_idle`], so
//! listeners attached right after a call always observe its outcome, the
//! same guarantee the browser's event loop gives IndexedDB callers.
//!
//! Transactions commit once they have no pending requests left, and a failed
//! request aborts its transaction, restoring the collection to the snapshot
//! taken when the transaction began.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use serde_json::Value;

use crate::engine::{
    Connection, Engine, EngineError, Key, Listener, ObjectStore, OpenRequest, Record, Request,
    Transaction, TransactionMode, VersionChange,
};

type Task = Box<dyn FnOnce()>;

/// FIFO of pending notifications.
#[derive(Clone, Default)]
struct EventQueue(Rc<RefCell<VecDeque<Task>>>);

impl EventQueue {
    fn push(&self, task: impl FnOnce() + 'static) {
        self.0.borrow_mut().push_back(Box::new(task));
    }

    fn pop(&self) -> Option<Task> {
        self.0.borrow_mut().pop_front()
    }

    fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

/// A listener slot fired at most once.
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

    fn fire(&self, value: T) {
        // Release the borrow before calling out; listeners may re-enter.
        let listener = self.0.borrow_mut().take();
        if let Some(listener) = listener {
            listener(value);
        }
    }
}

#[derive(Debug, Clone)]
struct Collection {
    key_path: String,
    records: BTreeMap<Key, Record>,
}

#[derive(Debug, Default)]
struct Database {
    version: u32,
    collections: BTreeMap<String, Collection>,
}

#[derive(Default)]
struct EngineState {
    databases: HashMap<String, Rc<RefCell<Database>>>,
    failures: VecDeque<EngineError>,
    upgrades: usize,
}

/// In-memory engine.
///
/// Cloning shares the same databases and event queue.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Rc<RefCell<EngineState>>,
    queue: EventQueue,
}

impl MemoryEngine {
    /// Create an engine with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll `future` to completion, delivering queued notifications whenever
    /// it is pending.
    ///
    /// Returns `None` if the queue runs dry while the future is still
    /// pending; nothing else could ever wake it.
    pub fn run_until<F: Future>(&self, future: F) -> Option<F::Output> {
        let mut future = pin!(future);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Some(output);
            }
            match self.queue.pop() {
                Some(task) => task(),
                None => return None,
            }
        }
    }

    /// Deliver every queued notification, including ones queued while
    /// draining. Returns how many were delivered.
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        while let Some(task) = self.queue.pop() {
            task();
            delivered += 1;
        }
        delivered
    }

    /// Number of notifications waiting for delivery.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Make the next executed request fail with `error`, aborting its
    /// transaction.
    pub fn fail_next_request(&self, error: EngineError) {
        self.state.borrow_mut().failures.push_back(error);
    }

    /// Whether a database named `name` exists.
    pub fn contains_database(&self, name: &str) -> bool {
        self.state.borrow().databases.contains_key(name)
    }

    /// Current version of `name`, if it exists.
    pub fn database_version(&self, name: &str) -> Option<u32> {
        self.state
            .borrow()
            .databases
            .get(name)
            .map(|db| db.borrow().version)
    }

    /// Total number of upgrade notifications fired by this engine.
    pub fn upgrade_count(&self) -> usize {
        self.state.borrow().upgrades
    }

    fn take_failure(&self) -> Option<EngineError> {
        self.state.borrow_mut().failures.pop_front()
    }

    fn run_open(&self, name: &str, version: Option<u32>, slots: &OpenSlots) {
        let db = self
            .state
            .borrow_mut()
            .databases
            .entry(name.to_string())
            .or_default()
            .clone();

        let current = db.borrow().version;
        let requested = version.unwrap_or(current.max(1));
        if requested < current {
            slots.error.fire(EngineError::new(
                "VersionError",
                format!(
                    "requested version {} is less than existing version {}",
                    requested, current
                ),
            ));
            return;
        }

        let connection = MemoryConnection {
            inner: Rc::new(ConnectionInner {
                name: name.to_string(),
                version: requested,
                db: db.clone(),
                engine: self.clone(),
                upgrading: Cell::new(false),
                closed: Cell::new(false),
            }),
        };

        if requested > current {
            db.borrow_mut().version = requested;
            self.state.borrow_mut().upgrades += 1;
            connection.inner.upgrading.set(true);
            slots.upgrade.fire(VersionChange {
                connection: connection.clone(),
                old_version: current,
                new_version: requested,
            });
            connection.inner.upgrading.set(false);
        }

        slots.success.fire(connection);
    }
}

impl Engine for MemoryEngine {
    type Connection = MemoryConnection;
    type OpenRequest = MemoryOpenRequest;
    type DeleteRequest = MemoryRequest;

    fn open(&self, name: &str, version: Option<u32>) -> Result<MemoryOpenRequest, EngineError> {
        if version == Some(0) {
            return Err(EngineError::new(
                "TypeError",
                "database version must be greater than zero",
            ));
        }

        let request = MemoryOpenRequest::default();
        let engine = self.clone();
        let slots = request.slots.clone();
        let name = name.to_string();
        self.queue
            .push(move || engine.run_open(&name, version, &slots));
        Ok(request)
    }

    fn delete_database(&self, name: &str) -> Result<MemoryRequest, EngineError> {
        let request = MemoryRequest::default();
        let state = self.state.clone();
        let slots = request.slots.clone();
        let name = name.to_string();
        self.queue.push(move || {
            state.borrow_mut().databases.remove(&name);
            slots.success.fire(Value::Null);
        });
        Ok(request)
    }
}

#[derive(Default)]
struct OpenSlots {
    upgrade: Slot<VersionChange<MemoryConnection>>,
    success: Slot<MemoryConnection>,
    error: Slot<EngineError>,
}

/// Pending open on a [`MemoryEngine`].
#[derive(Clone, Default)]
pub struct MemoryOpenRequest {
    slots: Rc<OpenSlots>,
}

impl OpenRequest for MemoryOpenRequest {
    type Connection = MemoryConnection;

    fn on_upgrade_needed(&self, listener: Listener<VersionChange<MemoryConnection>>) {
        self.slots.upgrade.set(listener);
    }

    fn on_success(&self, listener: Listener<MemoryConnection>) {
        self.slots.success.set(listener);
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        self.slots.error.set(listener);
    }
}

#[derive(Default)]
struct RequestSlots {
    success: Slot<Record>,
    error: Slot<EngineError>,
}

/// Pending request on a [`MemoryEngine`].
#[derive(Clone, Default)]
pub struct MemoryRequest {
    slots: Rc<RequestSlots>,
}

impl Request for MemoryRequest {
    fn on_success(&self, listener: Listener<Record>) {
        self.slots.success.set(listener);
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        self.slots.error.set(listener);
    }
}

struct ConnectionInner {
    name: String,
    version: u32,
    db: Rc<RefCell<Database>>,
    engine: MemoryEngine,
    upgrading: Cell<bool>,
    closed: Cell<bool>,
}

/// Connection to a database held by a [`MemoryEngine`].
#[derive(Clone)]
pub struct MemoryConnection {
    inner: Rc<ConnectionInner>,
}

impl MemoryConnection {
    fn require_upgrade(&self, what: &str) -> Result<(), EngineError> {
        if self.inner.upgrading.get() {
            Ok(())
        } else {
            Err(EngineError::new(
                "InvalidStateError",
                format!("{} is only allowed during an upgrade", what),
            ))
        }
    }
}

impl Connection for MemoryConnection {
    type Transaction = MemoryTransaction;

    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn version(&self) -> u32 {
        self.inner.version
    }

    fn collection_names(&self) -> Vec<String> {
        self.inner.db.borrow().collections.keys().cloned().collect()
    }

    fn create_collection(&self, name: &str, key_path: &str) -> Result<(), EngineError> {
        self.require_upgrade("createObjectStore")?;
        let mut db = self.inner.db.borrow_mut();
        if db.collections.contains_key(name) {
            return Err(EngineError::new(
                "ConstraintError",
                format!("object store {:?} already exists", name),
            ));
        }
        db.collections.insert(
            name.to_string(),
            Collection {
                key_path: key_path.to_string(),
                records: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> Result<(), EngineError> {
        self.require_upgrade("deleteObjectStore")?;
        self.inner
            .db
            .borrow_mut()
            .collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| {
                EngineError::new("NotFoundError", format!("no object store named {:?}", name))
            })
    }

    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> Result<MemoryTransaction, EngineError> {
        if self.inner.closed.get() {
            return Err(EngineError::new(
                "InvalidStateError",
                "the connection is closed",
            ));
        }

        let snapshot = {
            let db = self.inner.db.borrow();
            let store = db.collections.get(collection).ok_or_else(|| {
                EngineError::new(
                    "NotFoundError",
                    format!("no object store named {:?}", collection),
                )
            })?;
            match mode {
                TransactionMode::ReadWrite => Some(store.records.clone()),
                TransactionMode::ReadOnly => None,
            }
        };

        let inner = Rc::new(TransactionInner {
            engine: self.inner.engine.clone(),
            db: self.inner.db.clone(),
            collection: collection.to_string(),
            mode,
            pending: Cell::new(0),
            finished: Cell::new(false),
            snapshot: RefCell::new(snapshot),
            complete: Slot::default(),
            error: Slot::default(),
        });

        // A transaction nobody issues requests against still completes.
        let tx = inner.clone();
        self.inner.engine.queue.push(move || tx.try_commit());

        Ok(MemoryTransaction { inner })
    }

    fn close(&self) {
        self.inner.closed.set(true);
    }
}

enum Op {
    Get(Key),
    GetAll,
    Put(Key, Record),
    Delete(Key),
    Clear,
    Count,
}

impl Op {
    fn is_mutation(&self) -> bool {
        matches!(self, Op::Put(..) | Op::Delete(_) | Op::Clear)
    }
}

struct TransactionInner {
    engine: MemoryEngine,
    db: Rc<RefCell<Database>>,
    collection: String,
    mode: TransactionMode,
    pending: Cell<usize>,
    finished: Cell<bool>,
    snapshot: RefCell<Option<BTreeMap<Key, Record>>>,
    complete: Slot<()>,
    error: Slot<EngineError>,
}

impl TransactionInner {
    fn try_commit(&self) {
        if self.finished.get() || self.pending.get() > 0 {
            return;
        }
        self.finished.set(true);
        self.snapshot.borrow_mut().take();
        self.complete.fire(());
    }

    fn abort_with(&self, error: EngineError) {
        if self.finished.get() {
            return;
        }
        self.finished.set(true);
        let snapshot = self.snapshot.borrow_mut().take();
        if let Some(records) = snapshot {
            if let Some(store) = self.db.borrow_mut().collections.get_mut(&self.collection) {
                store.records = records;
            }
        }
        self.error.fire(error);
    }

    fn key_path(&self) -> Result<String, EngineError> {
        self.db
            .borrow()
            .collections
            .get(&self.collection)
            .map(|store| store.key_path.clone())
            .ok_or_else(|| {
                EngineError::new(
                    "InvalidStateError",
                    format!("object store {:?} has been deleted", self.collection),
                )
            })
    }

    fn issue(self: &Rc<Self>, op: Op) -> Result<MemoryRequest, EngineError> {
        if self.finished.get() {
            return Err(EngineError::new(
                "TransactionInactiveError",
                "the transaction has finished",
            ));
        }
        if op.is_mutation() && self.mode == TransactionMode::ReadOnly {
            return Err(EngineError::new(
                "ReadOnlyError",
                "the transaction is read-only",
            ));
        }

        let request = MemoryRequest::default();
        self.pending.set(self.pending.get() + 1);
        let tx = self.clone();
        let slots = request.slots.clone();
        self.engine.queue.push(move || tx.execute(op, &slots));
        Ok(request)
    }

    fn execute(self: &Rc<Self>, op: Op, slots: &RequestSlots) {
        if self.finished.get() {
            slots
                .error
                .fire(EngineError::abort("the transaction was aborted"));
            return;
        }
        self.pending.set(self.pending.get() - 1);

        let outcome = match self.engine.take_failure() {
            Some(error) => Err(error),
            None => self.apply(op),
        };

        match outcome {
            Ok(value) => {
                slots.success.fire(value);
                let tx = self.clone();
                self.engine.queue.push(move || tx.try_commit());
            }
            Err(error) => {
                slots.error.fire(error.clone());
                self.abort_with(error);
            }
        }
    }

    fn apply(&self, op: Op) -> Result<Record, EngineError> {
        let mut db = self.db.borrow_mut();
        let store = db.collections.get_mut(&self.collection).ok_or_else(|| {
            EngineError::new(
                "NotFoundError",
                format!("object store {:?} has been deleted", self.collection),
            )
        })?;

        let value = match op {
            Op::Get(key) => store.records.get(&key).cloned().unwrap_or(Value::Null),
            Op::GetAll => Value::Array(store.records.values().cloned().collect()),
            Op::Put(key, record) => {
                let value = key.to_value();
                store.records.insert(key, record);
                value
            }
            Op::Delete(key) => {
                store.records.remove(&key);
                Value::Null
            }
            Op::Clear => {
                store.records.clear();
                Value::Null
            }
            Op::Count => Value::from(store.records.len() as u64),
        };
        Ok(value)
    }
}

/// Transaction on a [`MemoryEngine`] collection.
#[derive(Clone)]
pub struct MemoryTransaction {
    inner: Rc<TransactionInner>,
}

impl Transaction for MemoryTransaction {
    type Store = MemoryObjectStore;

    fn object_store(&self, name: &str) -> Result<MemoryObjectStore, EngineError> {
        if name != self.inner.collection {
            return Err(EngineError::new(
                "NotFoundError",
                format!("{:?} is not in the scope of this transaction", name),
            ));
        }
        Ok(MemoryObjectStore {
            tx: self.inner.clone(),
        })
    }

    fn abort(&self) {
        let tx = self.inner.clone();
        self.inner
            .engine
            .queue
            .push(move || tx.abort_with(EngineError::abort("the transaction was aborted")));
    }

    fn on_complete(&self, listener: Listener<()>) {
        self.inner.complete.set(listener);
    }

    fn on_error(&self, listener: Listener<EngineError>) {
        self.inner.error.set(listener);
    }
}

/// Object store handle scoped to a [`MemoryTransaction`].
#[derive(Clone)]
pub struct MemoryObjectStore {
    tx: Rc<TransactionInner>,
}

impl ObjectStore for MemoryObjectStore {
    type Request = MemoryRequest;

    fn get(&self, key: &Key) -> Result<MemoryRequest, EngineError> {
        self.tx.issue(Op::Get(key.clone()))
    }

    fn get_all(&self) -> Result<MemoryRequest, EngineError> {
        self.tx.issue(Op::GetAll)
    }

    fn put(&self, record: &Record) -> Result<MemoryRequest, EngineError> {
        let key_path = self.tx.key_path()?;
        let key = Key::from_record(record, &key_path).ok_or_else(|| {
            EngineError::new(
                "DataError",
                format!(
                    "record has no valid key at key path {:?}",
                    key_path
                ),
            )
        })?;
        self.tx.issue(Op::Put(key, record.clone()))
    }

    fn delete(&self, key: &Key) -> Result<MemoryRequest, EngineError> {
        self.tx.issue(Op::Delete(key.clone()))
    }

    fn clear(&self) -> Result<MemoryRequest, EngineError> {
        self.tx.issue(Op::Clear)
    }

    fn count(&self) -> Result<MemoryRequest, EngineError> {
        self.tx.issue(Op::Count)
    }
}
