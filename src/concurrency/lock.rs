//! Lock table for entry deletion.
//!
//! Each entry can be held by one transaction at a time. A transaction asking
//! for a held entry is queued behind the holder unless the wait would close a
//! cycle in the wait-for graph, in which case the request is refused with
//! [`Error::Deadlock`]. Locks are only released all at once, when the
//! transaction finishes.

use crate::error::{Error, Result};
use crate::storage::Address;
use crate::transaction::TransactionId;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Waiting,
    Granted,
    Cancelled,
}

/// Handle a queued transaction blocks on until the entry is handed to it.
#[derive(Debug)]
pub struct Waiter {
    state: Mutex<WaitState>,
    cv: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self {
            state: Mutex::new(WaitState::Waiting),
            cv: Condvar::new(),
        }
    }

    /// Block until the lock is granted. Fails with
    /// [`Error::ConcurrentUpdate`] if the waiting transaction was removed
    /// from the table in the meantime.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        while *state == WaitState::Waiting {
            self.cv.wait(&mut state);
        }
        match *state {
            WaitState::Granted => Ok(()),
            _ => Err(Error::ConcurrentUpdate),
        }
    }

    fn finish(&self, state: WaitState) {
        *self.state.lock() = state;
        self.cv.notify_all();
    }
}

#[derive(Default)]
struct LockState {
    /// Entries held by each transaction.
    x2u: HashMap<TransactionId, Vec<Address>>,
    /// Holder of each entry.
    u2x: HashMap<Address, TransactionId>,
    /// Transactions queued on each entry, oldest first.
    wait: HashMap<Address, VecDeque<TransactionId>>,
    /// Waiter of each queued transaction.
    waiters: HashMap<TransactionId, Arc<Waiter>>,
    /// Entry each queued transaction waits for.
    wait_u: HashMap<TransactionId, Address>,
}

impl LockState {
    fn holds(&self, xid: TransactionId, uid: Address) -> bool {
        self.x2u
            .get(&xid)
            .is_some_and(|uids| uids.contains(&uid))
    }

    /// Every transaction waits for at most one entry, so the wait-for graph
    /// is a functional graph: follow holder -> waited entry -> holder from
    /// each unvisited holder, stamping nodes with the walk that reached them.
    fn has_deadlock(&self) -> bool {
        let mut stamps: HashMap<TransactionId, u32> = HashMap::new();
        let mut stamp = 0;
        for &start in self.x2u.keys() {
            if stamps.contains_key(&start) {
                continue;
            }
            stamp += 1;
            let mut xid = start;
            loop {
                if let Some(&seen) = stamps.get(&xid) {
                    if seen == stamp {
                        return true;
                    }
                    break;
                }
                stamps.insert(xid, stamp);
                let Some(uid) = self.wait_u.get(&xid) else {
                    break;
                };
                let Some(&holder) = self.u2x.get(uid) else {
                    break;
                };
                xid = holder;
            }
        }
        false
    }

    fn unqueue(&mut self, xid: TransactionId, uid: Address) {
        if let Some(queue) = self.wait.get_mut(&uid) {
            queue.retain(|&waiting| waiting != xid);
            if queue.is_empty() {
                self.wait.remove(&uid);
            }
        }
    }

    /// Hand `uid` to the oldest transaction still waiting for it.
    fn select_new_holder(&mut self, uid: Address) {
        self.u2x.remove(&uid);
        let Some(mut queue) = self.wait.remove(&uid) else {
            return;
        };
        while let Some(xid) = queue.pop_front() {
            let Some(waiter) = self.waiters.remove(&xid) else {
                continue;
            };
            self.u2x.insert(uid, xid);
            self.x2u.entry(xid).or_default().push(uid);
            self.wait_u.remove(&xid);
            waiter.finish(WaitState::Granted);
            break;
        }
        if !queue.is_empty() {
            self.wait.insert(uid, queue);
        }
    }
}

#[derive(Default)]
pub struct LockTable {
    state: Mutex<LockState>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for `uid` on behalf of `xid`.
    ///
    /// Returns `None` when the lock is held right away, or a waiter to block
    /// on when another transaction holds it.
    pub fn add(&self, xid: TransactionId, uid: Address) -> Result<Option<Arc<Waiter>>> {
        let mut state = self.state.lock();
        if state.holds(xid, uid) {
            return Ok(None);
        }
        if !state.u2x.contains_key(&uid) {
            state.u2x.insert(uid, xid);
            state.x2u.entry(xid).or_default().push(uid);
            return Ok(None);
        }

        state.wait_u.insert(xid, uid);
        state.wait.entry(uid).or_default().push_back(xid);
        if state.has_deadlock() {
            state.wait_u.remove(&xid);
            state.unqueue(xid, uid);
            debug!("deadlock: {} waiting for {}", xid, uid);
            return Err(Error::Deadlock);
        }

        let waiter = Arc::new(Waiter::new());
        state.waiters.insert(xid, Arc::clone(&waiter));
        Ok(Some(waiter))
    }

    /// Release everything `xid` holds and drop it from any queue.
    pub fn remove(&self, xid: TransactionId) {
        let mut state = self.state.lock();
        if let Some(uids) = state.x2u.remove(&xid) {
            for uid in uids {
                state.select_new_holder(uid);
            }
        }
        if let Some(uid) = state.wait_u.remove(&xid) {
            state.unqueue(xid, uid);
        }
        if let Some(waiter) = state.waiters.remove(&xid) {
            waiter.finish(WaitState::Cancelled);
        }
    }

    pub fn holder(&self, uid: Address) -> Option<TransactionId> {
        self.state.lock().u2x.get(&uid).copied()
    }

    pub fn held_by(&self, xid: TransactionId) -> Vec<Address> {
        self.state
            .lock()
            .x2u
            .get(&xid)
            .cloned()
            .unwrap_or_default()
    }
}
