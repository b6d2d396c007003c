//! Version manager.
//!
//! Coordinates entries, visibility and the lock table on behalf of
//! transactions. Entries are never updated in place: an update is a delete
//! of the old entry plus an insert of the new one, both under the same
//! transaction.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::Mutex;

use super::lock::LockTable;
use super::version::{wrap_entry_raw, Entry, EntrySource};
use super::visibility::{is_version_skip, is_visible};
use crate::common::{CacheRef, RefCountCache};
use crate::data::DataManager;
use crate::error::{Error, Result};
use crate::storage::Address;
use crate::transaction::{TransactionId, TransactionManager, SUPER_XID};

/// Isolation levels supported by the version manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read Committed: every read sees the latest committed version.
    ReadCommitted = 0,
    /// Repeatable Read: all reads see the versions committed before the
    /// transaction began.
    RepeatableRead = 1,
}

impl IsolationLevel {
    /// Whether this isolation level uses a snapshot of active transactions.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead)
    }
}

/// Why a transaction was aborted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    ConcurrentUpdate,
}

impl AbortReason {
    pub fn to_error(self) -> Error {
        match self {
            AbortReason::Deadlock => Error::Deadlock,
            AbortReason::ConcurrentUpdate => Error::ConcurrentUpdate,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_error(), f)
    }
}

/// An active transaction as seen by the version manager.
#[derive(Debug)]
pub struct Transaction {
    xid: TransactionId,
    level: IsolationLevel,
    /// Transactions active when this one began.
    snapshot: HashSet<TransactionId>,
    abort_reason: Mutex<Option<AbortReason>>,
}

impl Transaction {
    pub fn new(
        xid: TransactionId,
        level: IsolationLevel,
        snapshot: HashSet<TransactionId>,
    ) -> Self {
        Self {
            xid,
            level,
            snapshot,
            abort_reason: Mutex::new(None),
        }
    }

    pub fn xid(&self) -> TransactionId {
        self.xid
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    pub fn in_snapshot(&self, xid: TransactionId) -> bool {
        xid != SUPER_XID && self.snapshot.contains(&xid)
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        *self.abort_reason.lock()
    }

    fn check_not_aborted(&self) -> Result<()> {
        match self.abort_reason() {
            Some(reason) => Err(reason.to_error()),
            None => Ok(()),
        }
    }
}

type EntryRef = CacheRef<EntrySource>;

pub struct VersionManager {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    entries: Arc<RefCountCache<EntrySource>>,
    active: DashMap<TransactionId, Arc<Transaction>>,
    begin_lock: Mutex<()>,
    lock_table: LockTable,
}

impl VersionManager {
    pub fn new(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let entries = Arc::new(RefCountCache::new(EntrySource::new(Arc::clone(&dm)), 0));
        let active = DashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(
                SUPER_XID,
                IsolationLevel::ReadCommitted,
                HashSet::new(),
            )),
        );
        Self {
            tm,
            dm,
            entries,
            active,
            begin_lock: Mutex::new(()),
            lock_table: LockTable::new(),
        }
    }

    pub fn tm(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    pub fn dm(&self) -> &Arc<DataManager> {
        &self.dm
    }

    /// Begins a new transaction.
    pub fn begin(&self, level: IsolationLevel) -> Result<TransactionId> {
        let _guard = self.begin_lock.lock();
        let xid = self.tm.begin()?;
        let snapshot = if level.uses_snapshot() {
            self.active
                .iter()
                .map(|t| *t.key())
                .filter(|active| !active.is_super())
                .collect()
        } else {
            HashSet::new()
        };
        self.active
            .insert(xid, Arc::new(Transaction::new(xid, level, snapshot)));
        debug!("began {} ({:?})", xid, level);
        Ok(xid)
    }

    fn transaction(&self, xid: TransactionId) -> Result<Arc<Transaction>> {
        self.active
            .get(&xid)
            .map(|t| Arc::clone(t.value()))
            .ok_or(Error::NoSuchTransaction(xid.0))
    }

    /// Load an entry; `None` if it does not exist or was invalidated.
    fn entry(&self, uid: Address) -> Result<Option<EntryRef>> {
        match self.entries.get(uid.0) {
            Ok(entry) => Ok(Some(entry)),
            Err(Error::NullEntry) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read `uid` as seen by `xid`.
    pub fn read(&self, xid: TransactionId, uid: Address) -> Result<Option<Vec<u8>>> {
        let t = self.transaction(xid)?;
        t.check_not_aborted()?;

        let Some(entry) = self.entry(uid)? else {
            return Ok(None);
        };
        if is_visible(&self.tm, &t, entry.xmin(), entry.xmax())? {
            Ok(Some(entry.data()))
        } else {
            Ok(None)
        }
    }

    /// Insert a new entry created by `xid`.
    pub fn insert(&self, xid: TransactionId, data: &[u8]) -> Result<Address> {
        let t = self.transaction(xid)?;
        t.check_not_aborted()?;
        self.dm.insert(xid, &wrap_entry_raw(xid, data))
    }

    /// Delete `uid` on behalf of `xid`.
    ///
    /// Returns `false` if the entry is not visible to `xid` or `xid` already
    /// deleted it. Blocks while another transaction holds the entry.
    pub fn delete(&self, xid: TransactionId, uid: Address) -> Result<bool> {
        let t = self.transaction(xid)?;
        t.check_not_aborted()?;

        let Some(entry) = self.entry(uid)? else {
            return Ok(false);
        };
        if !is_visible(&self.tm, &t, entry.xmin(), entry.xmax())? {
            return Ok(false);
        }

        let waiter = match self.lock_table.add(xid, uid) {
            Ok(waiter) => waiter,
            Err(Error::Deadlock) => {
                self.internal_abort(&t, AbortReason::Deadlock);
                return Err(Error::Deadlock);
            }
            Err(e) => return Err(e),
        };
        if let Some(waiter) = waiter {
            waiter.wait()?;
        }

        if entry.xmax() == xid {
            return Ok(false);
        }
        if is_version_skip(&self.tm, &t, entry.xmax())? {
            self.internal_abort(&t, AbortReason::ConcurrentUpdate);
            return Err(Error::ConcurrentUpdate);
        }

        entry.set_xmax(xid)?;
        Ok(true)
    }

    /// Commits a transaction.
    ///
    /// A transaction the engine already aborted fails with the reason it was
    /// aborted for.
    pub fn commit(&self, xid: TransactionId) -> Result<()> {
        if xid.is_super() {
            return Ok(());
        }
        let t = self.transaction(xid)?;
        t.check_not_aborted()?;

        self.tm.commit(xid)?;
        self.active.remove(&xid);
        self.lock_table.remove(xid);
        debug!("committed {}", xid);
        Ok(())
    }

    /// Aborts a transaction.
    pub fn abort(&self, xid: TransactionId) -> Result<()> {
        if xid.is_super() {
            return Ok(());
        }
        let t = self.transaction(xid)?;
        let result = match t.abort_reason() {
            Some(_) => Ok(()),
            None => {
                self.lock_table.remove(xid);
                self.tm.abort(xid)
            }
        };
        self.active.remove(&xid);
        debug!("aborted {}", xid);
        result
    }

    /// Abort on the engine's initiative; the transaction stays registered
    /// until the caller aborts it.
    fn internal_abort(&self, t: &Transaction, reason: AbortReason) {
        *t.abort_reason.lock() = Some(reason);
        self.lock_table.remove(t.xid());
        if let Err(e) = self.tm.abort(t.xid()) {
            warn!("marking {} aborted failed: {}", t.xid(), e);
        }
        debug!("{} aborted automatically: {}", t.xid(), reason);
    }

    /// Number of registered transactions, the super transaction included.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Release every cached entry.
    pub fn close(&self) -> Result<()> {
        self.entries.close()
    }
}
