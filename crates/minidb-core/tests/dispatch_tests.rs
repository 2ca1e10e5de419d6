//! Dispatcher behaviour against a scripted engine.
//!
//! The scripted engine never notifies on its own, so each test decides
//! exactly which notifications arrive and in what order.

mod common;

use common::{poll, Call, ScriptedEngine};
use minidb_core::{
    EngineError, Error, MethodFacade, OperationKind, StorageHandle, TransactionMode,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const COLLECTION: &str = "sample_store";

/// Open "sample" against the scripted engine, driving the upgrade by hand.
fn open_store(engine: &ScriptedEngine) -> MethodFacade<ScriptedEngine> {
    let mut open = Box::pin(StorageHandle::open(engine.clone(), "sample", "id", vec![]));
    assert!(poll(&mut open).is_none());

    let request = engine.last_open();
    request.upgrade(0, 1);
    request.succeed(1);

    let store = poll(&mut open)
        .expect("open should settle once the engine reports success")
        .expect("open should succeed");
    engine.clear_calls();
    store
}

fn engine_error(name: &str) -> EngineError {
    EngineError::new(name, "scripted failure")
}

#[test]
fn test_open_creates_collection_during_upgrade() {
    let engine = ScriptedEngine::new();
    let mut open = Box::pin(StorageHandle::open(engine.clone(), "sample", "id", vec![]));
    assert!(poll(&mut open).is_none());
    engine.last_open().upgrade(0, 1);

    assert_eq!(
        engine.calls(),
        vec![
            Call::Open("sample".into(), None),
            Call::CreateCollection(COLLECTION.into(), "id".into()),
        ]
    );
}

#[test]
fn test_open_does_not_settle_before_success() {
    let engine = ScriptedEngine::new();
    let mut open = Box::pin(StorageHandle::open(engine.clone(), "sample", "id", vec![]));
    assert!(poll(&mut open).is_none());
    engine.last_open().upgrade(0, 1);
    assert!(poll(&mut open).is_none());
}

#[test]
fn test_open_error_rejects_with_connection_error() {
    let engine = ScriptedEngine::new();
    let mut open = Box::pin(StorageHandle::open(engine.clone(), "sample", "id", vec![]));
    assert!(poll(&mut open).is_none());
    engine.last_open().fail(engine_error("UnknownError"));

    match poll(&mut open) {
        Some(Err(Error::Connection(err))) => assert_eq!(err.name, "UnknownError"),
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.map(|_| ()))),
    }
}

#[test]
fn test_open_reopens_one_version_higher_when_collection_is_missing() {
    let engine = ScriptedEngine::new();
    let mut open = Box::pin(StorageHandle::open(engine.clone(), "sample", "id", vec![]));
    assert!(poll(&mut open).is_none());
    // The database already exists at version 3 without our collection.
    engine.last_open().succeed(3);
    assert!(poll(&mut open).is_none());

    let bumped = engine.last_open();
    bumped.upgrade(3, 4);
    bumped.succeed(4);
    assert!(poll(&mut open).expect("settled").is_ok());

    assert_eq!(
        engine.calls(),
        vec![
            Call::Open("sample".into(), None),
            Call::Close,
            Call::Open("sample".into(), Some(4)),
            Call::CreateCollection(COLLECTION.into(), "id".into()),
        ]
    );
}

#[test]
fn test_seeding_resolves_open_only_after_completion() {
    let engine = ScriptedEngine::new();
    let records = vec![json!({"id": 1}), json!({"id": 2})];
    let mut open = Box::pin(StorageHandle::open(
        engine.clone(),
        "sample",
        "id",
        records.clone(),
    ));
    assert!(poll(&mut open).is_none());
    engine.last_open().upgrade(0, 1);
    engine.last_open().succeed(1);

    // The batch has been issued but the transaction has not completed.
    assert!(poll(&mut open).is_none());
    assert_eq!(engine.requests().len(), 2);
    engine.last_transaction().complete();

    assert!(poll(&mut open).expect("settled").is_ok());
}

#[test]
fn test_facade_modes_and_calls() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let _ = store.get_entry(1);
    let _ = store.get_all();
    let _ = store.put(json!({"id": 1}));
    let _ = store.add(json!({"id": 2}));
    let _ = store.delete_entry("a");
    let _ = store.delete_all();
    let _ = store.flush();
    let _ = store.count();

    let calls: Vec<Call> = engine
        .calls()
        .into_iter()
        .filter(|call| !matches!(call, Call::ObjectStore(_)))
        .collect();

    let read = || Call::Transaction(COLLECTION.into(), TransactionMode::ReadOnly);
    let write = || Call::Transaction(COLLECTION.into(), TransactionMode::ReadWrite);
    assert_eq!(
        calls,
        vec![
            read(),
            Call::Get(1.into()),
            read(),
            Call::GetAll,
            write(),
            Call::Put(json!({"id": 1})),
            write(),
            Call::Put(json!({"id": 2})),
            write(),
            Call::Delete("a".into()),
            write(),
            Call::Clear,
            write(),
            Call::Clear,
            read(),
            Call::Count,
        ]
    );
}

#[test]
fn test_single_call_resolves_on_request_success() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.get_entry(1));
    assert!(poll(&mut pending).is_none());

    assert!(engine.last_request().succeed(json!({"id": 1, "name": "John"})));
    let record = poll(&mut pending).expect("settled").expect("ok");
    assert_eq!(record, Some(json!({"id": 1, "name": "John"})));
}

#[test]
fn test_single_call_resolves_on_transaction_complete() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.put(json!({"id": 1})));
    assert!(engine.last_transaction().complete());
    assert!(poll(&mut pending).expect("settled").is_ok());

    // A success arriving afterwards changes nothing.
    assert!(engine.last_request().succeed(json!(1)));
}

#[test]
fn test_missing_record_is_none() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.get_entry(42));
    engine.last_request().succeed(json!(null));
    assert_eq!(poll(&mut pending).expect("settled").expect("ok"), None);
}

#[test]
fn test_count_and_get_all_decode() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut count = Box::pin(store.count());
    engine.last_request().succeed(json!(3));
    assert_eq!(poll(&mut count).expect("settled").expect("ok"), 3);

    let mut all = Box::pin(store.get_all());
    engine.last_request().succeed(json!([{"id": 1}, {"id": 2}]));
    assert_eq!(
        poll(&mut all).expect("settled").expect("ok"),
        vec![json!({"id": 1}), json!({"id": 2})]
    );
}

#[test]
fn test_batch_put_issues_every_record_and_ignores_request_success() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let records: Vec<_> = (1..=3).map(|id| json!({"id": id})).collect();
    let mut pending = Box::pin(store.put(records.clone()));

    let puts: Vec<Call> = engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Put(_)))
        .collect();
    assert_eq!(puts, records.into_iter().map(Call::Put).collect::<Vec<_>>());

    // Nobody listens for per-record success.
    for request in engine.requests() {
        assert!(!request.has_success_listener());
        assert!(request.has_error_listener());
        assert!(!request.succeed(json!(1)));
    }
    assert!(poll(&mut pending).is_none());

    engine.last_transaction().complete();
    assert!(poll(&mut pending).expect("settled").is_ok());
}

#[test]
fn test_batch_put_rejects_on_request_error() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.put(vec![json!({"id": 1}), json!({"id": 2})]));
    engine.requests()[1].fail(engine_error("ConstraintError"));

    match poll(&mut pending) {
        Some(Err(Error::Operation { kind, source })) => {
            assert_eq!(kind, OperationKind::Put);
            assert_eq!(source.name, "ConstraintError");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // Completion after rejection is ignored.
    engine.last_transaction().complete();
}

#[test]
fn test_empty_batch_resolves_on_completion() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.put(Vec::<serde_json::Value>::new()));
    assert!(engine.requests().is_empty());
    assert!(poll(&mut pending).is_none());

    engine.last_transaction().complete();
    assert!(poll(&mut pending).expect("settled").is_ok());
}

#[test]
fn test_error_is_terminal() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.get_entry(1));
    let request = engine.last_request();
    request.fail(engine_error("DataError"));
    request.succeed(json!({"id": 1}));
    engine.last_transaction().complete();

    match poll(&mut pending) {
        Some(Err(Error::Operation { source, .. })) => assert_eq!(source.name, "DataError"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_transaction_error_rejects() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.delete_all());
    engine.last_transaction().fail(engine_error("QuotaExceededError"));

    match poll(&mut pending) {
        Some(Err(Error::Operation { kind, source })) => {
            assert_eq!(kind, OperationKind::Clear);
            assert_eq!(source.name, "QuotaExceededError");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_synchronous_rejection_aborts_transaction() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    engine.reject_next_call(engine_error("DataError"));
    let mut pending = Box::pin(store.put(json!({"name": "no key"})));

    assert_eq!(engine.calls().last(), Some(&Call::Abort));
    match poll(&mut pending) {
        Some(Err(Error::Operation { source, .. })) => assert_eq!(source.name, "DataError"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_missing_collection_rejects_without_engine_calls() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);
    engine.remove_collection(COLLECTION);

    let mut pending = Box::pin(store.count());
    assert!(engine.calls().is_empty());

    match poll(&mut pending) {
        Some(Err(Error::CollectionNotFound(name))) => assert_eq!(name, COLLECTION),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_dropped_listeners_reject_with_abort() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.count());
    engine.forget_listeners();

    match poll(&mut pending) {
        Some(Err(Error::Operation { source, .. })) => assert_eq!(source.name, "AbortError"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_get_all_and_count_reject_when_completion_wins() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut all = Box::pin(store.get_all());
    engine.last_transaction().complete();
    engine.last_request().succeed(json!([{"id": 1}]));
    match poll(&mut all) {
        Some(Err(Error::Operation { kind, .. })) => assert_eq!(kind, OperationKind::GetAll),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let mut count = Box::pin(store.count());
    engine.last_transaction().complete();
    match poll(&mut count) {
        Some(Err(Error::Operation { kind, .. })) => assert_eq!(kind, OperationKind::Count),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_json_array_put_is_batched() {
    let engine = ScriptedEngine::new();
    let store = open_store(&engine);

    let mut pending = Box::pin(store.put(json!([{"id": 1}, {"id": 2}])));
    let puts: Vec<Call> = engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Put(_)))
        .collect();
    assert_eq!(
        puts,
        vec![Call::Put(json!({"id": 1})), Call::Put(json!({"id": 2}))]
    );
    assert!(engine.requests().iter().all(|r| !r.has_success_listener()));

    engine.last_transaction().complete();
    assert!(poll(&mut pending).expect("settled").is_ok());
}

#[test]
fn test_failed_seeding_closes_connection() {
    let engine = ScriptedEngine::new();
    let mut open = Box::pin(StorageHandle::open(
        engine.clone(),
        "sample",
        "id",
        vec![json!({"id": 1})],
    ));
    assert!(poll(&mut open).is_none());
    engine.last_open().upgrade(0, 1);
    engine.last_open().succeed(1);
    assert!(poll(&mut open).is_none());

    engine.last_request().fail(engine_error("QuotaExceededError"));
    match poll(&mut open) {
        Some(Err(Error::Operation { source, .. })) => {
            assert_eq!(source.name, "QuotaExceededError")
        }
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.map(|_| ()))),
    }
    assert_eq!(engine.calls().last(), Some(&Call::Close));
}
