//! Version visibility rules.
//!
//! Whether transaction `t` sees an entry depends only on the entry's
//! XMIN/XMAX, the commit status of those transactions and, under
//! repeatable read, the set of transactions active when `t` began.

use super::mvcc::{IsolationLevel, Transaction};
use crate::error::Result;
use crate::transaction::{TransactionId, TransactionManager, SUPER_XID};

/// Whether a delete by `t` would overwrite a deletion `t` must not see.
pub fn is_version_skip(
    tm: &TransactionManager,
    t: &Transaction,
    xmax: TransactionId,
) -> Result<bool> {
    match t.level() {
        IsolationLevel::ReadCommitted => Ok(false),
        IsolationLevel::RepeatableRead => {
            Ok(tm.is_committed(xmax)? && (xmax > t.xid() || t.in_snapshot(xmax)))
        }
    }
}

pub fn is_visible(
    tm: &TransactionManager,
    t: &Transaction,
    xmin: TransactionId,
    xmax: TransactionId,
) -> Result<bool> {
    match t.level() {
        IsolationLevel::ReadCommitted => read_committed(tm, t, xmin, xmax),
        IsolationLevel::RepeatableRead => repeatable_read(tm, t, xmin, xmax),
    }
}

fn read_committed(
    tm: &TransactionManager,
    t: &Transaction,
    xmin: TransactionId,
    xmax: TransactionId,
) -> Result<bool> {
    let xid = t.xid();
    if xmin == xid && xmax == SUPER_XID {
        return Ok(true);
    }
    if !tm.is_committed(xmin)? {
        return Ok(false);
    }
    if xmax == SUPER_XID {
        return Ok(true);
    }
    Ok(xmax != xid && !tm.is_committed(xmax)?)
}

fn repeatable_read(
    tm: &TransactionManager,
    t: &Transaction,
    xmin: TransactionId,
    xmax: TransactionId,
) -> Result<bool> {
    let xid = t.xid();
    if xmin == xid && xmax == SUPER_XID {
        return Ok(true);
    }
    if !(tm.is_committed(xmin)? && xmin < xid && !t.in_snapshot(xmin)) {
        return Ok(false);
    }
    if xmax == SUPER_XID {
        return Ok(true);
    }
    if xmax == xid {
        return Ok(false);
    }
    Ok(!tm.is_committed(xmax)? || xmax > xid || t.in_snapshot(xmax))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn rc(xid: TransactionId) -> Transaction {
        Transaction::new(xid, IsolationLevel::ReadCommitted, HashSet::new())
    }

    fn rr(xid: TransactionId, snapshot: &[TransactionId]) -> Transaction {
        Transaction::new(
            xid,
            IsolationLevel::RepeatableRead,
            snapshot.iter().copied().collect(),
        )
    }

    #[test]
    fn test_own_writes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let tm = TransactionManager::create(&dir.path().join("db"))?;
        let t1 = tm.begin()?;

        for t in [rc(t1), rr(t1, &[])] {
            assert!(is_visible(&tm, &t, t1, SUPER_XID)?);
            // Created and deleted by itself.
            assert!(!is_visible(&tm, &t, t1, t1)?);
        }

        Ok(())
    }

    #[test]
    fn test_read_committed() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let tm = TransactionManager::create(&dir.path().join("db"))?;
        let writer = tm.begin()?;
        let reader = tm.begin()?;
        let t = rc(reader);

        // Uncommitted insert.
        assert!(!is_visible(&tm, &t, writer, SUPER_XID)?);
        tm.commit(writer)?;
        assert!(is_visible(&tm, &t, writer, SUPER_XID)?);

        // Uncommitted delete keeps it visible, committed delete hides it.
        let deleter = tm.begin()?;
        assert!(is_visible(&tm, &t, writer, deleter)?);
        tm.commit(deleter)?;
        assert!(!is_visible(&tm, &t, writer, deleter)?);

        assert!(!is_version_skip(&tm, &t, deleter)?);

        Ok(())
    }

    #[test]
    fn test_repeatable_read() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let tm = TransactionManager::create(&dir.path().join("db"))?;
        let before = tm.begin()?;
        tm.commit(before)?;
        let concurrent = tm.begin()?;
        let reader = tm.begin()?;
        let t = rr(reader, &[concurrent]);

        assert!(is_visible(&tm, &t, before, SUPER_XID)?);

        // Committed after the reader began: still invisible.
        tm.commit(concurrent)?;
        assert!(!is_visible(&tm, &t, concurrent, SUPER_XID)?);

        // Started after the reader.
        let later = tm.begin()?;
        tm.commit(later)?;
        assert!(!is_visible(&tm, &t, later, SUPER_XID)?);

        // Deletions the reader must not see keep the row visible.
        assert!(is_visible(&tm, &t, before, concurrent)?);
        assert!(is_visible(&tm, &t, before, later)?);
        assert!(is_version_skip(&tm, &t, concurrent)?);
        assert!(is_version_skip(&tm, &t, later)?);

        // A deletion committed before the reader began hides it.
        let old_deleter = TransactionId(before.0);
        assert!(!is_visible(&tm, &t, before, old_deleter)?);
        assert!(!is_version_skip(&tm, &t, old_deleter)?);

        Ok(())
    }

    #[test]
    fn test_super_xid_in_snapshot() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let tm = TransactionManager::create(&dir.path().join("db"))?;
        let reader = tm.begin()?;
        let t = rr(reader, &[SUPER_XID]);

        // Entries written under the super transaction are always visible.
        assert!(!t.in_snapshot(SUPER_XID));
        assert!(is_visible(&tm, &t, SUPER_XID, SUPER_XID)?);

        Ok(())
    }
}
