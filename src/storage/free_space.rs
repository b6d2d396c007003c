//! Free-space index.
//!
//! Pages are bucketed by free space in steps of `PAGE_SIZE / 40`. A page
//! handed out by `select` leaves the index until it is added back, so two
//! inserts never pick the same page at once.

use crate::storage::{PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::VecDeque;

const INTERVALS_NO: usize = 40;
const THRESHOLD: usize = PAGE_SIZE / INTERVALS_NO;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: PageId,
    pub free_space: usize,
}

pub struct FreeSpaceIndex {
    lists: Mutex<Vec<VecDeque<PageInfo>>>,
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(vec![VecDeque::new(); INTERVALS_NO + 1]),
        }
    }

    pub fn add(&self, page_id: PageId, free_space: usize) {
        let bucket = (free_space / THRESHOLD).min(INTERVALS_NO);
        self.lists.lock()[bucket].push_back(PageInfo {
            page_id,
            free_space,
        });
    }

    /// Take a page with at least `size` bytes free.
    ///
    /// The search starts one bucket above `size`, where every page is big
    /// enough. The last bucket holds pages of any size above its bound, so
    /// there the exact free space is checked.
    pub fn select(&self, size: usize) -> Option<PageInfo> {
        let mut lists = self.lists.lock();
        let mut bucket = size / THRESHOLD;
        if bucket < INTERVALS_NO {
            bucket += 1;
        }
        while bucket <= INTERVALS_NO {
            let list = &mut lists[bucket];
            if let Some(kth) = list.iter().position(|info| info.free_space >= size) {
                return list.remove(kth);
            }
            bucket += 1;
        }
        None
    }
}
