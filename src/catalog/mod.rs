//! Schema catalog: schemas, tables, indexes, sequences, users, roles,
//! settings, comments, aggregates, and user data types, all addressed
//! through one flattened `DbObject` row in a `SYS` meta table (spec.md
//! §4.8).
//!
//! New top-level module -- the teacher has exactly one hardcoded table
//! and no schema layer. Grounded on `persistence/snapshot.rs`'s
//! "meta-state persisted as serialized rows through the `Storage` trait"
//! shape, generalized here so the meta table is not a separate snapshot
//! file but an ordinary `MVCCTransactionMap` instance -- spec.md §4.8's
//! "Meta table is stored like any table" -- reusing exactly the same
//! commit/rollback/visibility machinery user tables get.

pub mod object;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use crate::error::Error;
use crate::ids::ObjectId;
use crate::mvcc_map::MVCCTransactionMap;
use crate::parser::SchemaParser;
use crate::transaction::Transaction;
use crate::transaction_engine::TransactionEngine;

pub use object::{DbObject, ObjectKind, SysRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogState {
    Uninitialized,
    Initializing,
    Open,
    Closing,
    Closed,
}

const SYS_MAP_NAME: &str = "SYS";

/// Exclusive, session-reentrant lock over `SYS` (spec.md §4.8 step 1:
/// "a session already holding it is idempotent").
struct MetaLock {
    owner: Mutex<Option<u64>>,
    released: Condvar,
}

impl MetaLock {
    fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    fn acquire(&self, session_id: u64) {
        let mut owner = self.owner.lock().unwrap();
        loop {
            match *owner {
                Some(id) if id == session_id => return,
                None => {
                    *owner = Some(session_id);
                    return;
                }
                Some(_) => owner = self.released.wait(owner).unwrap(),
            }
        }
    }

    fn release(&self, session_id: u64) {
        let mut owner = self.owner.lock().unwrap();
        if *owner == Some(session_id) {
            *owner = None;
            self.released.notify_all();
        }
    }
}

fn encode_key(id: ObjectId) -> Vec<u8> {
    id.0.to_be_bytes().to_vec()
}

fn encode_row(row: &SysRow) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(row).map_err(|e| Error::Internal(format!("failed to encode catalog row: {e}")))
}

fn decode_row(bytes: &[u8]) -> Result<SysRow, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::Internal(format!("failed to decode catalog row: {e}")))
}

pub struct Catalog {
    engine: Arc<TransactionEngine<Vec<u8>, Vec<u8>>>,
    sys: MVCCTransactionMap<Vec<u8>, Vec<u8>>,
    parser: Box<dyn SchemaParser>,
    state: RwLock<CatalogState>,
    meta_lock: MetaLock,
    next_id: AtomicI64,
    freed_ids: Mutex<Vec<i64>>,
    objects: RwLock<HashMap<i64, DbObject>>,
    by_qualified_name: RwLock<HashMap<String, i64>>,
}

impl Catalog {
    pub fn new(engine: Arc<TransactionEngine<Vec<u8>, Vec<u8>>>, parser: Box<dyn SchemaParser>) -> Self {
        let sys = MVCCTransactionMap::new(SYS_MAP_NAME, engine.clone());

        Self {
            engine,
            sys,
            parser,
            state: RwLock::new(CatalogState::Uninitialized),
            meta_lock: MetaLock::new(),
            next_id: AtomicI64::new(1),
            freed_ids: Mutex::new(Vec::new()),
            objects: RwLock::new(HashMap::new()),
            by_qualified_name: RwLock::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> CatalogState {
        *self.state.read().unwrap()
    }

    /// `open()`: initialize, load `SYS` in id order re-instantiating each
    /// row through the external parser, and record the database as open
    /// (spec.md §4.8).
    pub fn open(&self, system_txn: &Arc<Transaction<Vec<u8>, Vec<u8>>>) -> Result<(), Error> {
        *self.state.write().unwrap() = CatalogState::Initializing;

        let mut cursor = self.sys.cursor(system_txn, None);
        while let Some((_, bytes)) = cursor.next()? {
            let row = decode_row(&bytes)?;
            let decl = self.parser.parse(&row.sql)?;

            let object = DbObject {
                id: row.id,
                kind: row.kind,
                schema: decl.schema,
                name: decl.name,
                sql: row.sql,
            };

            self.index_object(object);
        }

        if let Some(max_id) = self.objects.read().unwrap().keys().max().copied() {
            self.next_id.store(max_id + 1, Ordering::Release);
        }

        *self.state.write().unwrap() = CatalogState::Open;
        log::info!("catalog open, {} object(s) loaded from SYS", self.objects.read().unwrap().len());
        Ok(())
    }

    /// Refuses re-entrance while sessions remain open; otherwise closes
    /// tables via the system session and marks the catalog closed
    /// (spec.md §4.8's `close()`). `active_sessions`/`from_shutdown_hook`
    /// let callers express the "defer unless from a shutdown hook" rule
    /// without this module needing to know about `Session` itself.
    pub fn close(&self, active_sessions: usize, from_shutdown_hook: bool) -> Result<(), Error> {
        if self.state() == CatalogState::Closed {
            return Err(Error::DatabaseClosed);
        }

        if active_sessions > 0 && !from_shutdown_hook {
            log::warn!("catalog close deferred: {active_sessions} active session(s)");
            return Ok(());
        }

        *self.state.write().unwrap() = CatalogState::Closing;
        self.engine.shutdown();
        *self.state.write().unwrap() = CatalogState::Closed;
        log::info!("catalog closed");
        Ok(())
    }

    fn allocate_id(&self) -> ObjectId {
        if let Some(id) = self.freed_ids.lock().unwrap().pop() {
            return ObjectId(id);
        }
        ObjectId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn index_object(&self, object: DbObject) {
        self.by_qualified_name
            .write()
            .unwrap()
            .insert(object.qualified_name(), object.id.0);
        self.objects.write().unwrap().insert(object.id.0, object);
    }

    /// The full DDL flow of spec.md §4.8: lock `SYS`, allocate an id,
    /// register the object under the catalog monitor, then append its
    /// row to `SYS` so the MVCC layer durably persists it on commit.
    #[tracing::instrument(level = "debug", skip(self, t), fields(name = %name))]
    pub fn create_object(
        &self,
        t: &Arc<Transaction<Vec<u8>, Vec<u8>>>,
        session_id: u64,
        kind: ObjectKind,
        schema: Option<String>,
        name: String,
        sql: String,
    ) -> Result<DbObject, Error> {
        self.meta_lock.acquire(session_id);

        let qualified = match &schema {
            Some(schema) => format!("{schema}.{name}"),
            None => name.clone(),
        };

        if self.by_qualified_name.read().unwrap().contains_key(&qualified) {
            self.meta_lock.release(session_id);
            return Err(Self::already_exists_error(kind, &qualified));
        }

        let id = self.allocate_id();
        let object = DbObject {
            id,
            kind,
            schema,
            name,
            sql,
        };

        self.index_object(object.clone());

        let row = object.sys_row();
        let encoded = match encode_row(&row) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.meta_lock.release(session_id);
                return Err(e);
            }
        };

        if let Err(e) = self.sys.put(t, encode_key(id), encoded) {
            self.meta_lock.release(session_id);
            return Err(e);
        }

        Ok(object)
    }

    #[tracing::instrument(level = "debug", skip(self, t))]
    pub fn drop_object(&self, t: &Arc<Transaction<Vec<u8>, Vec<u8>>>, session_id: u64, qualified_name: &str) -> Result<(), Error> {
        self.meta_lock.acquire(session_id);

        let id = match self.by_qualified_name.read().unwrap().get(qualified_name).copied() {
            Some(id) => id,
            None => {
                self.meta_lock.release(session_id);
                return Err(Error::TableNotFound(qualified_name.to_string()));
            }
        };

        self.objects.write().unwrap().remove(&id);
        self.by_qualified_name.write().unwrap().remove(qualified_name);

        if let Err(e) = self.sys.remove(t, encode_key(ObjectId(id))) {
            self.meta_lock.release(session_id);
            return Err(e);
        }

        Ok(())
    }

    pub fn release_lock(&self, session_id: u64) {
        self.meta_lock.release(session_id);
    }

    pub fn find(&self, qualified_name: &str) -> Option<DbObject> {
        let id = *self.by_qualified_name.read().unwrap().get(qualified_name)?;
        self.objects.read().unwrap().get(&id).cloned()
    }

    fn already_exists_error(kind: ObjectKind, name: &str) -> Error {
        match kind {
            ObjectKind::Schema => Error::SchemaAlreadyExists(name.to_string()),
            ObjectKind::Table | ObjectKind::Index => Error::TableAlreadyExists(name.to_string()),
            ObjectKind::User => Error::UserAlreadyExists(name.to_string()),
            ObjectKind::Role => Error::RoleAlreadyExists(name.to_string()),
            ObjectKind::Sequence => Error::SequenceAlreadyExists(name.to_string()),
            ObjectKind::Setting | ObjectKind::Comment | ObjectKind::Aggregate | ObjectKind::UserDataType => {
                Error::InvalidValue(format!("object already exists: {name}"))
            }
        }
    }
}
