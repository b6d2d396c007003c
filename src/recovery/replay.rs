//! Log replay.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use super::log_record::LogRecord;
use crate::data::item::set_raw_invalid;
use crate::error::Result;
use crate::storage::page::data_page;
use crate::storage::{Address, Logger, Page, PageCache, PageId};
use crate::transaction::{TransactionId, TransactionManager};

/// What a recovery run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of records in the log.
    pub records_analyzed: usize,
    /// Number of records redone.
    pub records_redone: usize,
    /// Number of records undone.
    pub records_undone: usize,
    /// Undos skipped because a committed transaction wrote the item later.
    pub undos_skipped: usize,
    /// Transactions found active and marked aborted.
    pub transactions_aborted: usize,
    /// Page count the page file was cut back to.
    pub max_page: u32,
}

impl fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {} redone, {} undone ({} skipped), {} transactions aborted, {} pages",
            self.records_analyzed,
            self.records_redone,
            self.records_undone,
            self.undos_skipped,
            self.transactions_aborted,
            self.max_page
        )
    }
}

/// Bring the page file back to a state containing exactly the effects of
/// committed transactions.
///
/// Running it again on its own output changes nothing.
pub fn recover(
    tm: &TransactionManager,
    logger: &Logger,
    pages: &PageCache,
) -> Result<RecoveryStats> {
    let mut stats = RecoveryStats::default();

    let records = analysis_phase(logger, pages, &mut stats)?;
    let committed = committed_transactions(tm, &records)?;
    let last_committed_write = redo_phase(pages, &records, &committed, &mut stats)?;
    undo_phase(pages, &records, &committed, &last_committed_write, &mut stats)?;
    abort_active(tm, &mut stats)?;

    Ok(stats)
}

fn analysis_phase(
    logger: &Logger,
    pages: &PageCache,
    stats: &mut RecoveryStats,
) -> Result<Vec<LogRecord>> {
    logger.rewind();
    let mut records = vec![];
    let mut max_page = 1;
    while let Some(payload) = logger.next()? {
        let record = LogRecord::decode(&payload)?;
        max_page = max_page.max(record.page_id().0);
        records.push(record);
    }
    logger.rewind();

    pages.truncate(max_page)?;
    stats.records_analyzed = records.len();
    stats.max_page = max_page;
    debug!("analysis: {} records, max page {}", records.len(), max_page);

    Ok(records)
}

fn committed_transactions(
    tm: &TransactionManager,
    records: &[LogRecord],
) -> Result<HashMap<TransactionId, bool>> {
    let mut committed = HashMap::new();
    for record in records {
        let xid = record.xid();
        if !committed.contains_key(&xid) {
            committed.insert(xid, tm.is_committed(xid)?);
        }
    }
    Ok(committed)
}

/// Redo committed records in log order. Returns, per address, the index of
/// the last committed record that wrote it.
fn redo_phase(
    pages: &PageCache,
    records: &[LogRecord],
    committed: &HashMap<TransactionId, bool>,
    stats: &mut RecoveryStats,
) -> Result<HashMap<Address, usize>> {
    let mut last_committed_write = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        if !committed.get(&record.xid()).copied().unwrap_or(false) {
            continue;
        }
        with_page(pages, record.page_id(), |page| match record {
            LogRecord::Insert { offset, raw, .. } => {
                data_page::recover_insert(page, raw, *offset)
            }
            LogRecord::Update {
                address, new_raw, ..
            } => data_page::recover_update(page, new_raw, address.offset()),
        })?;
        last_committed_write.insert(record.address(), index);
        stats.records_redone += 1;
    }
    Ok(last_committed_write)
}

/// Undo uncommitted records newest first.
fn undo_phase(
    pages: &PageCache,
    records: &[LogRecord],
    committed: &HashMap<TransactionId, bool>,
    last_committed_write: &HashMap<Address, usize>,
    stats: &mut RecoveryStats,
) -> Result<()> {
    for (index, record) in records.iter().enumerate().rev() {
        if committed.get(&record.xid()).copied().unwrap_or(false) {
            continue;
        }
        if last_committed_write
            .get(&record.address())
            .is_some_and(|&later| later > index)
        {
            stats.undos_skipped += 1;
            continue;
        }
        with_page(pages, record.page_id(), |page| match record {
            LogRecord::Insert { offset, raw, .. } => {
                let mut raw = raw.clone();
                set_raw_invalid(&mut raw);
                data_page::recover_insert(page, &raw, *offset);
            }
            LogRecord::Update {
                address, old_raw, ..
            } => data_page::recover_update(page, old_raw, address.offset()),
        })?;
        stats.records_undone += 1;
    }
    Ok(())
}

fn abort_active(tm: &TransactionManager, stats: &mut RecoveryStats) -> Result<()> {
    for value in 1..=tm.xid_count() {
        let xid = TransactionId(value);
        if !tm.state(xid)?.is_terminal() {
            tm.abort(xid)?;
            stats.transactions_aborted += 1;
        }
    }
    Ok(())
}

fn with_page(pages: &PageCache, page_id: PageId, f: impl FnOnce(&Page)) -> Result<()> {
    let page = pages.get_page(page_id)?;
    f(&page);
    page.release()
}
