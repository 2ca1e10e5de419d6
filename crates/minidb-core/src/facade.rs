//! Named store operations
//!
//! Each method is a fixed binding of one call and one transaction mode onto
//! [`QueryDispatcher::dispatch`]. The engine request is issued when the method
//! is called; the returned future only decodes the outcome.

use std::future::Future;
use std::rc::Rc;

use serde_json::Value;

use crate::dispatch::{OperationKind, Parameter, QueryDispatcher};
use crate::engine::{Engine, EngineError, Key, Record, TransactionMode};
use crate::error::{Error, Result};
use crate::handle::StorageHandle;

/// One record or a batch of records for [`MethodFacade::put`].
#[derive(Debug, Clone, PartialEq)]
pub enum Entries {
    One(Record),
    Many(Vec<Record>),
}

/// A JSON array is a batch; any other value is a single record.
impl From<Record> for Entries {
    fn from(record: Record) -> Self {
        match record {
            Value::Array(records) => Entries::Many(records),
            record => Entries::One(record),
        }
    }
}

impl From<Vec<Record>> for Entries {
    fn from(records: Vec<Record>) -> Self {
        Entries::Many(records)
    }
}

impl From<Entries> for Parameter {
    fn from(entries: Entries) -> Self {
        match entries {
            Entries::One(record) => Parameter::Record(record),
            Entries::Many(records) => Parameter::Records(records),
        }
    }
}

/// The operations exposed to callers of an open store.
pub struct MethodFacade<E: Engine> {
    dispatcher: QueryDispatcher<E>,
}

impl<E: Engine> Clone for MethodFacade<E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<E: Engine> MethodFacade<E> {
    pub fn new(dispatcher: QueryDispatcher<E>) -> Self {
        Self { dispatcher }
    }

    pub fn handle(&self) -> &Rc<StorageHandle<E>> {
        self.dispatcher.handle()
    }

    pub fn dispatcher(&self) -> &QueryDispatcher<E> {
        &self.dispatcher
    }

    /// Record stored under `key`, or `None`.
    pub fn get_entry(&self, key: impl Into<Key>) -> impl Future<Output = Result<Option<Record>>> {
        let pending = self.dispatcher.dispatch(
            OperationKind::Get,
            TransactionMode::ReadOnly,
            Parameter::Key(key.into()),
        );
        async move {
            Ok(match pending.await? {
                Value::Null => None,
                record => Some(record),
            })
        }
    }

    /// Every record, in key order.
    pub fn get_all(&self) -> impl Future<Output = Result<Vec<Record>>> {
        let pending = self.dispatcher.dispatch(
            OperationKind::GetAll,
            TransactionMode::ReadOnly,
            Parameter::None,
        );
        async move {
            match pending.await? {
                Value::Array(records) => Ok(records),
                other => Err(missing_result(OperationKind::GetAll, &other)),
            }
        }
    }

    /// Store one record, or a batch of records in a single transaction.
    ///
    /// A batch resolves only once its transaction has completed.
    pub fn put(&self, entries: impl Into<Entries>) -> impl Future<Output = Result<()>> {
        let pending = self.dispatcher.dispatch(
            OperationKind::Put,
            TransactionMode::ReadWrite,
            entries.into().into(),
        );
        async move {
            pending.await?;
            Ok(())
        }
    }

    /// Alias of [`MethodFacade::put`].
    pub fn add(&self, entries: impl Into<Entries>) -> impl Future<Output = Result<()>> {
        self.put(entries)
    }

    pub fn delete_entry(&self, key: impl Into<Key>) -> impl Future<Output = Result<()>> {
        let pending = self.dispatcher.dispatch(
            OperationKind::Delete,
            TransactionMode::ReadWrite,
            Parameter::Key(key.into()),
        );
        async move {
            pending.await?;
            Ok(())
        }
    }

    /// Remove every record.
    pub fn delete_all(&self) -> impl Future<Output = Result<()>> {
        let pending = self.dispatcher.dispatch(
            OperationKind::Clear,
            TransactionMode::ReadWrite,
            Parameter::None,
        );
        async move {
            pending.await?;
            Ok(())
        }
    }

    /// Alias of [`MethodFacade::delete_all`].
    pub fn flush(&self) -> impl Future<Output = Result<()>> {
        self.delete_all()
    }

    pub fn count(&self) -> impl Future<Output = Result<u64>> {
        let pending = self.dispatcher.dispatch(
            OperationKind::Count,
            TransactionMode::ReadOnly,
            Parameter::None,
        );
        async move {
            let value = pending.await?;
            value
                .as_u64()
                .ok_or_else(|| missing_result(OperationKind::Count, &value))
        }
    }
}

/// The operation settled without the value its call produces, typically
/// because the transaction completed before the request reported.
fn missing_result(kind: OperationKind, value: &Value) -> Error {
    Error::operation(
        kind,
        EngineError::new(
            "UnknownError",
            format!("{} settled with {} instead of its result", kind, value),
        ),
    )
}
