//! Query dispatcher
//!
//! Turns one logical operation into a transaction plus one or more engine
//! calls, then folds the engine's notifications into a single outcome.
//!
//! Every dispatch owns a oneshot channel whose sender sits in a shared
//! settle-once slot. Each listener (per-call success, transaction complete,
//! and the error notifications of both) races to take the sender; the first
//! one wins and the rest find the slot empty.
//!
//! Batch writes never subscribe to per-call success: the records are only
//! durable once the transaction itself completes.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::engine::{
    Connection, Engine, EngineError, Key, ObjectStore, Record, Request, Transaction,
    TransactionMode,
};
use crate::error::{Error, Result};
use crate::handle::StorageHandle;
use crate::logging::prefix;

/// Logical operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Get,
    GetAll,
    Put,
    Delete,
    Clear,
    Count,
}

impl OperationKind {
    /// Name of the low-level call, as IndexedDB spells it.
    pub fn call_name(&self) -> &'static str {
        match self {
            OperationKind::Get => "get",
            OperationKind::GetAll => "getAll",
            OperationKind::Put => "put",
            OperationKind::Delete => "delete",
            OperationKind::Clear => "clear",
            OperationKind::Count => "count",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.call_name())
    }
}

/// Argument of a dispatched operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    None,
    Key(Key),
    Record(Record),
    Records(Vec<Record>),
}

impl From<Key> for Parameter {
    fn from(key: Key) -> Self {
        Parameter::Key(key)
    }
}

impl From<Record> for Parameter {
    fn from(record: Record) -> Self {
        Parameter::Record(record)
    }
}

impl From<Vec<Record>> for Parameter {
    fn from(records: Vec<Record>) -> Self {
        Parameter::Records(records)
    }
}

type Outcome = Result<Value>;

/// Shared settle-once slot.
#[derive(Clone)]
struct Settler {
    kind: OperationKind,
    sender: Rc<RefCell<Option<oneshot::Sender<Outcome>>>>,
}

impl Settler {
    fn new(kind: OperationKind) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let settler = Self {
            kind,
            sender: Rc::new(RefCell::new(Some(tx))),
        };
        (settler, rx)
    }

    /// Settle the outcome. Returns `false` if it was already settled.
    fn settle(&self, outcome: Outcome, source: &'static str) -> bool {
        let sender = self.sender.borrow_mut().take();
        match sender {
            Some(tx) => {
                if let Err(err) = &outcome {
                    warn!("{} {} rejected via {}: {}", prefix::DB, self.kind, source, err);
                }
                // The caller may have dropped the future; nothing to report to.
                let _ = tx.send(outcome);
                true
            }
            None => {
                trace!(
                    "{} {} ignoring {} after settlement",
                    prefix::DB,
                    self.kind,
                    source
                );
                false
            }
        }
    }

    fn resolve(&self, value: Value, source: &'static str) {
        self.settle(Ok(value), source);
    }

    fn reject(&self, error: EngineError, source: &'static str) {
        self.settle(Err(Error::operation(self.kind, error)), source);
    }
}

/// An in-flight dispatched operation.
///
/// The engine calls were issued when the operation was dispatched; awaiting
/// only observes the outcome. Dropping it does not cancel anything.
#[must_use = "the outcome of a dispatched operation should be observed"]
pub struct PendingOperation {
    kind: OperationKind,
    mode: TransactionMode,
    outcome: oneshot::Receiver<Outcome>,
}

impl PendingOperation {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Future for PendingOperation {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let kind = self.kind;
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Every listener was dropped without firing.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::operation(
                kind,
                EngineError::abort("the engine dropped the operation without notifying"),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Dispatches operations against the collection of a [`StorageHandle`].
pub struct QueryDispatcher<E: Engine> {
    handle: Rc<StorageHandle<E>>,
}

impl<E: Engine> Clone for QueryDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<E: Engine> QueryDispatcher<E> {
    pub fn new(handle: Rc<StorageHandle<E>>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Rc<StorageHandle<E>> {
        &self.handle
    }

    /// Dispatch one operation.
    ///
    /// Validation, the transaction and every engine call happen before this
    /// returns; the returned future settles exactly once.
    pub fn dispatch(
        &self,
        kind: OperationKind,
        mode: TransactionMode,
        parameter: Parameter,
    ) -> PendingOperation {
        let (settler, outcome) = Settler::new(kind);
        let collection = self.handle.collection_name();
        debug!(
            "{} dispatch {} on {} ({})",
            prefix::DB,
            kind,
            collection,
            mode
        );

        match self.handle.connection() {
            Some(connection)
                if !self.handle.is_torn_down() && connection.contains_collection(collection) =>
            {
                issue(&connection, collection, kind, mode, parameter, &settler);
            }
            _ => {
                settler.settle(
                    Err(Error::CollectionNotFound(collection.to_string())),
                    "validation",
                );
            }
        }

        PendingOperation {
            kind,
            mode,
            outcome,
        }
    }
}

fn issue<C: Connection>(
    connection: &C,
    collection: &str,
    kind: OperationKind,
    mode: TransactionMode,
    parameter: Parameter,
    settler: &Settler,
) {
    let tx = match connection.transaction(collection, mode) {
        Ok(tx) => tx,
        Err(err) => return settler.reject(err, "transaction"),
    };
    let store = match tx.object_store(collection) {
        Ok(store) => store,
        Err(err) => {
            tx.abort();
            return settler.reject(err, "object store");
        }
    };

    let on_complete = settler.clone();
    tx.on_complete(Box::new(move |()| {
        on_complete.resolve(Value::Null, "transaction complete")
    }));
    let on_error = settler.clone();
    tx.on_error(Box::new(move |err| on_error.reject(err, "transaction error")));

    if let (OperationKind::Put, Parameter::Records(records)) = (kind, &parameter) {
        debug!("{} batch put of {} records", prefix::DB, records.len());
        for record in records {
            match store.put(record) {
                Ok(request) => {
                    let on_error = settler.clone();
                    request.on_error(Box::new(move |err| on_error.reject(err, "request error")));
                }
                Err(err) => {
                    tx.abort();
                    return settler.reject(err, "put");
                }
            }
        }
        return;
    }

    let request = match call(&store, kind, parameter) {
        Ok(request) => request,
        Err(err) => {
            tx.abort();
            return settler.reject(err, kind.call_name());
        }
    };
    let on_success = settler.clone();
    request.on_success(Box::new(move |value| {
        on_success.resolve(value, "request success")
    }));
    let on_error = settler.clone();
    request.on_error(Box::new(move |err| on_error.reject(err, "request error")));
}

fn call<S: ObjectStore>(
    store: &S,
    kind: OperationKind,
    parameter: Parameter,
) -> std::result::Result<S::Request, EngineError> {
    match (kind, parameter) {
        (OperationKind::Get, Parameter::Key(key)) => store.get(&key),
        (OperationKind::GetAll, _) => store.get_all(),
        (OperationKind::Put, Parameter::Record(record)) => store.put(&record),
        (OperationKind::Delete, Parameter::Key(key)) => store.delete(&key),
        (OperationKind::Clear, _) => store.clear(),
        (OperationKind::Count, _) => store.count(),
        (kind, parameter) => Err(EngineError::new(
            "DataError",
            format!("{} does not accept {:?}", kind, parameter),
        )),
    }
}
