//! Database open / upgrade lifecycle
//!
//! A [`StorageHandle`] owns one connection to a named database and knows the
//! one collection it serves (`"<database>_store"` by default). Opening is the
//! only place the collection is created: on first use the engine asks for an
//! upgrade and the handle creates the collection there. A database that
//! exists without the collection (for example after [`StorageHandle::teardown`])
//! is reopened one version higher so the collection can be created again.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::oneshot;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::dispatch::QueryDispatcher;
use crate::engine::{Connection, Engine, EngineError, OpenRequest, Record, Request};
use crate::error::{Error, Result};
use crate::facade::MethodFacade;
use crate::logging::prefix;

/// Lifecycle of the handle's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Failed,
}

/// Schema change applied while the engine reports an upgrade.
#[derive(Debug, Clone)]
enum UpgradeStep {
    Nothing,
    CreateCollection { name: String, key_path: String },
    DeleteCollection { name: String },
}

impl UpgradeStep {
    fn apply<C: Connection>(&self, connection: &C) -> std::result::Result<(), EngineError> {
        match self {
            UpgradeStep::Nothing => Ok(()),
            UpgradeStep::CreateCollection { name, key_path } => {
                if connection.contains_collection(name) {
                    return Ok(());
                }
                debug!("{} creating collection {} keyed by {}", prefix::DB, name, key_path);
                connection.create_collection(name, key_path)
            }
            UpgradeStep::DeleteCollection { name } => {
                if !connection.contains_collection(name) {
                    return Ok(());
                }
                debug!("{} deleting collection {}", prefix::DB, name);
                connection.delete_collection(name)
            }
        }
    }
}

/// Result of a completed open.
struct Opened<C> {
    connection: C,
    upgraded: bool,
}

type Done<C> = Rc<RefCell<Option<Box<dyn FnOnce(Result<Opened<C>>)>>>>;

fn settle<C>(done: &Done<C>, outcome: Result<Opened<C>>) {
    let callback = done.borrow_mut().take();
    if let Some(callback) = callback {
        callback(outcome);
    }
}

/// Open `name` and report the outcome to `done` exactly once.
fn begin_open<E, F>(engine: &E, name: &str, version: Option<u32>, step: UpgradeStep, done: F)
where
    E: Engine,
    F: FnOnce(Result<Opened<E::Connection>>) + 'static,
{
    let request = match engine.open(name, version) {
        Ok(request) => request,
        Err(err) => return done(Err(Error::Connection(err))),
    };

    let done: Done<E::Connection> = Rc::new(RefCell::new(Some(Box::new(done))));

    let upgraded = Rc::new(Cell::new(false));

    let on_upgrade = done.clone();
    let flag = upgraded.clone();
    request.on_upgrade_needed(Box::new(move |change| {
        info!(
            "{} upgrading {} from version {} to {}",
            prefix::DB,
            change.connection.name(),
            change.old_version,
            change.new_version
        );
        flag.set(true);
        if let Err(err) = step.apply(&change.connection) {
            change.connection.close();
            settle(&on_upgrade, Err(Error::Connection(err)));
        }
    }));

    let on_success = done.clone();
    request.on_success(Box::new(move |connection| {
        settle(
            &on_success,
            Ok(Opened {
                connection,
                upgraded: upgraded.get(),
            }),
        )
    }));

    request.on_error(Box::new(move |err| settle(&done, Err(Error::Connection(err)))));
}

async fn connect<E: Engine>(
    engine: &E,
    name: &str,
    version: Option<u32>,
    step: UpgradeStep,
) -> Result<Opened<E::Connection>> {
    let (tx, rx) = oneshot::channel();
    begin_open(engine, name, version, step, move |outcome| {
        let _ = tx.send(outcome);
    });
    rx.await.unwrap_or_else(|_| {
        Err(Error::Connection(EngineError::abort(
            "the engine dropped the open request without notifying",
        )))
    })
}

async fn await_request<R: Request>(request: R) -> std::result::Result<Record, EngineError> {
    let (tx, rx) = oneshot::channel();
    let sender = Rc::new(RefCell::new(Some(tx)));

    let on_success = sender.clone();
    request.on_success(Box::new(move |value| {
        if let Some(tx) = on_success.borrow_mut().take() {
            let _ = tx.send(Ok(value));
        }
    }));
    request.on_error(Box::new(move |err| {
        if let Some(tx) = sender.borrow_mut().take() {
            let _ = tx.send(Err(err));
        }
    }));

    rx.await
        .unwrap_or_else(|_| Err(EngineError::abort("request dropped without notifying")))
}

/// One open connection to a named database and its collection.
pub struct StorageHandle<E: Engine> {
    engine: E,
    database_name: String,
    collection_name: String,
    key_path: String,
    state: Rc<Cell<ConnectionState>>,
    connection: Rc<RefCell<Option<E::Connection>>>,
    torn_down: Cell<bool>,
}

impl<E: Engine> StorageHandle<E> {
    /// Open `database_name`, creating its collection keyed by `key_path` on
    /// first use and seeding it with `initial_records`.
    ///
    /// Seeding only happens when the collection is created, and the returned
    /// future resolves only once the seeding transaction has completed.
    pub async fn open(
        engine: E,
        database_name: &str,
        key_path: &str,
        initial_records: Vec<Record>,
    ) -> Result<MethodFacade<E>> {
        let config = StoreConfig::new(database_name)
            .with_key_path(key_path)
            .with_initial_records(initial_records);
        Self::open_with_config(engine, &config).await
    }

    /// Open the store described by `config`.
    pub async fn open_with_config(engine: E, config: &StoreConfig) -> Result<MethodFacade<E>> {
        config.validate()?;

        let handle = Rc::new(Self {
            engine,
            database_name: config.database_name.clone(),
            collection_name: config.collection_name(),
            key_path: config.key_path.clone(),
            state: Rc::new(Cell::new(ConnectionState::Opening)),
            connection: Rc::new(RefCell::new(None)),
            torn_down: Cell::new(false),
        });

        let (connection, created) = match handle.establish().await {
            Ok(opened) => opened,
            Err(err) => {
                warn!("{} failed to open {}: {}", prefix::DB, handle.database_name, err);
                handle.state.set(ConnectionState::Failed);
                return Err(err);
            }
        };

        *handle.connection.borrow_mut() = Some(connection);
        handle.state.set(ConnectionState::Open);
        info!(
            "{} opened {} ({})",
            prefix::DB,
            handle.database_name,
            handle.collection_name
        );

        let facade = MethodFacade::new(QueryDispatcher::new(handle.clone()));
        if created && !config.initial_records.is_empty() {
            debug!(
                "{} seeding {} initial records",
                prefix::DB,
                config.initial_records.len()
            );
            if let Err(err) = facade.put(config.initial_records.clone()).await {
                warn!("{} failed to seed {}: {}", prefix::DB, handle.collection_name, err);
                handle.close();
                handle.state.set(ConnectionState::Failed);
                return Err(err);
            }
        }
        Ok(facade)
    }

    /// Open the connection, bumping the version if the collection is
    /// missing. Returns the connection and whether the collection was
    /// created.
    async fn establish(&self) -> Result<(E::Connection, bool)> {
        let create = UpgradeStep::CreateCollection {
            name: self.collection_name.clone(),
            key_path: self.key_path.clone(),
        };

        let opened = connect(&self.engine, &self.database_name, None, create.clone()).await?;
        if opened.connection.contains_collection(&self.collection_name) {
            return Ok((opened.connection, opened.upgraded));
        }

        let next = opened.connection.version() + 1;
        info!(
            "{} {} has no {}, reopening at version {}",
            prefix::DB,
            self.database_name,
            self.collection_name,
            next
        );
        opened.connection.close();
        let bumped = connect(&self.engine, &self.database_name, Some(next), create).await?;
        Ok((bumped.connection, true))
    }

    /// Whether `database_name` holds any collection. If it does, the
    /// database is deleted before this resolves; if the probe created it,
    /// it is removed again.
    ///
    /// This probe is destructive. Use [`StorageHandle::exists`] to test
    /// without side effects and [`StorageHandle::delete_database`] to delete.
    pub async fn check(engine: &E, database_name: &str) -> Result<bool> {
        let opened = connect(engine, database_name, None, UpgradeStep::Nothing).await?;
        let populated = !opened.connection.collection_names().is_empty();
        opened.connection.close();
        if populated {
            warn!("{} check deleting existing {}", prefix::DB, database_name);
        }
        if populated || opened.upgraded {
            Self::delete_database(engine, database_name).await?;
        }
        Ok(populated)
    }

    /// Whether `database_name` holds any collection, leaving it untouched.
    ///
    /// Engines create a database as a side effect of opening it; if the
    /// probe did that, the empty database is removed again.
    pub async fn exists(engine: &E, database_name: &str) -> Result<bool> {
        let opened = connect(engine, database_name, None, UpgradeStep::Nothing).await?;
        let populated = !opened.connection.collection_names().is_empty();
        opened.connection.close();
        if opened.upgraded && !populated {
            Self::delete_database(engine, database_name).await?;
        }
        Ok(populated)
    }

    /// Delete `database_name` and everything in it.
    pub async fn delete_database(engine: &E, database_name: &str) -> Result<()> {
        let request = engine
            .delete_database(database_name)
            .map_err(Error::Connection)?;
        await_request(request).await.map_err(Error::Connection)?;
        info!("{} deleted database {}", prefix::DB, database_name);
        Ok(())
    }

    /// Drop the collection.
    ///
    /// Fire-and-forget: the drop runs as a version change on the engine's
    /// schedule. From the moment this returns every dispatch fails with
    /// [`Error::CollectionNotFound`]; the state reads `Opening` until the
    /// upgraded connection is in place.
    pub fn teardown(&self) {
        let Some(current) = self.connection() else {
            return;
        };
        self.torn_down.set(true);
        self.state.set(ConnectionState::Opening);
        let next = current.version() + 1;
        current.close();
        info!(
            "{} tearing down {} at version {}",
            prefix::DB,
            self.collection_name,
            next
        );

        let slot = self.connection.clone();
        let state = self.state.clone();
        let step = UpgradeStep::DeleteCollection {
            name: self.collection_name.clone(),
        };
        begin_open(
            &self.engine,
            &self.database_name,
            Some(next),
            step,
            move |outcome| match outcome {
                Ok(opened) => {
                    *slot.borrow_mut() = Some(opened.connection);
                    state.set(ConnectionState::Open);
                }
                Err(err) => {
                    warn!("{} teardown failed: {}", prefix::DB, err);
                    state.set(ConnectionState::Failed);
                }
            },
        );
    }

    /// Close the connection. Later dispatches fail.
    pub fn close(&self) {
        if let Some(connection) = self.connection() {
            connection.close();
        }
        self.state.set(ConnectionState::Closed);
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Whether [`StorageHandle::teardown`] dropped this handle's collection.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    /// The current connection, if the handle has one.
    pub fn connection(&self) -> Option<E::Connection> {
        self.connection.borrow().clone()
    }
}
