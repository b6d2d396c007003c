//! B+Tree node layout and operations.
//!
//! A node is stored as one data item:
//! `[1B leaf][2B key count][8B sibling]` followed by `2 * BALANCE_NUMBER + 2`
//! slots of `[8B child][8B key]`.
//!
//! In a leaf, `child` is the indexed address and `key` its key. In an
//! internal node, child `i` covers the keys below key `i`; the right-most
//! key of the right-most node on a level is `u64::MAX`.

use byteorder::{BigEndian, ByteOrder};

use crate::data::{DataManager, ItemRef};
use crate::error::{Error, Result};
use crate::storage::Address;
use crate::transaction::SUPER_XID;

const OF_LEAF: usize = 0;
const OF_KEY_COUNT: usize = 1;
const OF_SIBLING: usize = 3;
const NODE_HEADER_SIZE: usize = 11;

const SLOT_SIZE: usize = 16;

pub const BALANCE_NUMBER: usize = 32;
pub const MAX_SLOTS: usize = BALANCE_NUMBER * 2 + 2;
pub const NODE_SIZE: usize = NODE_HEADER_SIZE + SLOT_SIZE * MAX_SLOTS;

fn is_leaf(raw: &[u8]) -> bool {
    raw[OF_LEAF] == 1
}

fn set_leaf(raw: &mut [u8], leaf: bool) {
    raw[OF_LEAF] = leaf as u8;
}

fn key_count(raw: &[u8]) -> usize {
    BigEndian::read_u16(&raw[OF_KEY_COUNT..OF_SIBLING]) as usize
}

fn set_key_count(raw: &mut [u8], count: usize) {
    BigEndian::write_u16(&mut raw[OF_KEY_COUNT..OF_SIBLING], count as u16);
}

fn sibling(raw: &[u8]) -> u64 {
    BigEndian::read_u64(&raw[OF_SIBLING..NODE_HEADER_SIZE])
}

fn set_sibling(raw: &mut [u8], sibling: u64) {
    BigEndian::write_u64(&mut raw[OF_SIBLING..NODE_HEADER_SIZE], sibling);
}

fn slot(kth: usize) -> usize {
    NODE_HEADER_SIZE + kth * SLOT_SIZE
}

fn child(raw: &[u8], kth: usize) -> u64 {
    let at = slot(kth);
    BigEndian::read_u64(&raw[at..at + 8])
}

fn set_child(raw: &mut [u8], kth: usize, child: u64) {
    let at = slot(kth);
    BigEndian::write_u64(&mut raw[at..at + 8], child);
}

fn key(raw: &[u8], kth: usize) -> u64 {
    let at = slot(kth) + 8;
    BigEndian::read_u64(&raw[at..at + 8])
}

fn set_key(raw: &mut [u8], kth: usize, key: u64) {
    let at = slot(kth) + 8;
    BigEndian::write_u64(&mut raw[at..at + 8], key);
}

/// Move slots `[kth, count)` one slot to the right.
fn shift_from(raw: &mut [u8], kth: usize) {
    let count = key_count(raw);
    raw.copy_within(slot(kth)..slot(count), slot(kth + 1));
}

/// Build a node from `(child, key)` pairs.
pub fn build_raw(leaf: bool, entries: &[(u64, u64)], sibling: u64) -> Vec<u8> {
    let mut raw = vec![0u8; NODE_SIZE];
    set_leaf(&mut raw, leaf);
    set_key_count(&mut raw, entries.len());
    set_sibling(&mut raw, sibling);
    for (kth, &(child, key)) in entries.iter().enumerate() {
        set_child(&mut raw, kth, child);
        set_key(&mut raw, kth, key);
    }
    raw
}

/// An empty leaf, the root of a new tree.
pub fn nil_root_raw() -> Vec<u8> {
    build_raw(true, &[], 0)
}

/// Root over two nodes after the old root split at `key`.
pub fn new_root_raw(left: Address, right: Address, key: u64) -> Vec<u8> {
    build_raw(false, &[(left.0, key), (right.0, u64::MAX)], 0)
}

/// Insert `(child, key)` in place. Returns `false` when the key belongs to a
/// node further right.
///
/// In an internal node `split` names the child that split into `child`;
/// the new slot goes right after it. Equal keys on both sides of a split
/// make the key alone ambiguous.
fn insert_raw(raw: &mut [u8], child: u64, new_key: u64, split: Option<u64>) -> bool {
    let count = key_count(raw);
    let by_child = split
        .filter(|_| !is_leaf(raw))
        .and_then(|left| (0..count).find(|&kth| self::child(raw, kth) == left));
    let kth = match by_child {
        Some(kth) => kth,
        None => {
            let kth = (0..count)
                .find(|&kth| key(raw, kth) >= new_key)
                .unwrap_or(count);
            if kth == count && sibling(raw) != 0 {
                return false;
            }
            kth
        }
    };

    if is_leaf(raw) {
        shift_from(raw, kth);
        set_child(raw, kth, child);
        set_key(raw, kth, new_key);
    } else {
        // The new child takes over the keys from `new_key` up to the old
        // bound of slot `kth`.
        let old_key = key(raw, kth);
        set_key(raw, kth, new_key);
        shift_from(raw, kth + 1);
        set_child(raw, kth + 1, child);
        set_key(raw, kth + 1, old_key);
    }
    set_key_count(raw, count + 1);
    true
}

/// Upper half of a full node, inheriting its sibling.
fn upper_half_raw(raw: &[u8]) -> Vec<u8> {
    let mut upper = vec![0u8; NODE_SIZE];
    set_leaf(&mut upper, is_leaf(raw));
    set_key_count(&mut upper, BALANCE_NUMBER);
    set_sibling(&mut upper, sibling(raw));
    upper[slot(0)..slot(BALANCE_NUMBER)]
        .copy_from_slice(&raw[slot(BALANCE_NUMBER)..slot(2 * BALANCE_NUMBER)]);
    upper
}

/// Where to continue a descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Child covering the key.
    Child(Address),
    /// The key is beyond this node; try its right sibling.
    Sibling(Option<Address>),
}

/// Matches found in one leaf.
#[derive(Debug, Default)]
pub struct LeafRange {
    pub addresses: Vec<Address>,
    /// Set when the range may continue in the sibling.
    pub sibling: Option<Address>,
}

/// Outcome of inserting into one node.
#[derive(Debug, Default)]
pub struct InsertResult {
    /// The key belongs further right.
    pub sibling: Option<Address>,
    /// The node split: the new right node and its first key.
    pub split: Option<(Address, u64)>,
}

fn address(uid: u64) -> Option<Address> {
    (uid != 0).then_some(Address(uid))
}

/// A loaded node. Dropping it releases the underlying item.
pub struct Node {
    uid: Address,
    item: ItemRef,
}

impl Node {
    pub fn load(dm: &DataManager, uid: Address) -> Result<Node> {
        let item = dm.read(uid)?.ok_or(Error::MissingRecord(uid.0))?;
        Ok(Node { uid, item })
    }

    pub fn uid(&self) -> Address {
        self.uid
    }

    pub fn is_leaf(&self) -> bool {
        self.item.read(is_leaf)
    }

    pub fn key_count(&self) -> usize {
        self.item.read(key_count)
    }

    /// Child an insert of `search_key` descends into.
    pub fn search_next(&self, search_key: u64) -> Next {
        self.next_where(|bound| search_key < bound)
    }

    /// Left-most child that may hold `search_key`. Copies of a split key can
    /// stay in the child left of it, so a lookup starts there.
    pub fn search_first(&self, search_key: u64) -> Next {
        self.next_where(|bound| search_key <= bound)
    }

    fn next_where(&self, covers: impl Fn(u64) -> bool) -> Next {
        self.item.read(|raw| {
            let count = key_count(raw);
            match (0..count).find(|&kth| covers(key(raw, kth))) {
                Some(kth) => Next::Child(Address(child(raw, kth))),
                None => Next::Sibling(address(sibling(raw))),
            }
        })
    }

    pub fn leaf_search_range(&self, lo: u64, hi: u64) -> LeafRange {
        self.item.read(|raw| {
            let count = key_count(raw);
            let mut kth = 0;
            while kth < count && key(raw, kth) < lo {
                kth += 1;
            }
            let mut addresses = Vec::new();
            while kth < count && key(raw, kth) <= hi {
                addresses.push(Address(child(raw, kth)));
                kth += 1;
            }
            let sibling = if kth == count {
                address(sibling(raw))
            } else {
                None
            };
            LeafRange { addresses, sibling }
        })
    }

    /// Insert `(child, key)`, splitting the node when it fills up. Every
    /// change is logged under the super transaction; a failure leaves the
    /// node untouched.
    ///
    /// `split_child` is the child of this node that split into `child`, for
    /// internal nodes.
    pub fn insert_and_split(
        &self,
        dm: &DataManager,
        child: u64,
        new_key: u64,
        split_child: Option<Address>,
    ) -> Result<InsertResult> {
        let split_child = split_child.map(|uid| uid.0);
        let mut edit = self.item.edit();
        if !edit.update(|raw| insert_raw(raw, child, new_key, split_child)) {
            let next = edit.read(sibling);
            edit.rollback();
            return Ok(InsertResult {
                sibling: address(next),
                split: None,
            });
        }

        let mut split = None;
        if edit.read(key_count) == 2 * BALANCE_NUMBER {
            let upper = edit.read(upper_half_raw);
            let upper_uid = dm.insert(SUPER_XID, &upper)?;
            edit.update(|raw| {
                set_key_count(raw, BALANCE_NUMBER);
                set_sibling(raw, upper_uid.0);
            });
            split = Some((upper_uid, key(&upper, 0)));
        }

        edit.commit(SUPER_XID)?;
        Ok(InsertResult {
            sibling: None,
            split,
        })
    }
}
