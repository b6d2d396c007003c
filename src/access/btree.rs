pub mod node;

use self::node::{new_root_raw, nil_root_raw, Next, Node};
use crate::data::{DataManager, ItemRef};
use crate::error::{Error, Result};
use crate::storage::Address;
use crate::transaction::SUPER_XID;
use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use std::sync::Arc;

/// B+Tree index from `u64` keys to addresses.
///
/// The tree is reached through a boot record holding the address of the
/// current root, so the root can move when it splits. Nodes are data items
/// written under the super transaction: index structure is never rolled
/// back, and readers filter stale matches through the version manager.
/// Nodes split but never merge; a node that does not cover a key passes the
/// search on to its right sibling.
pub struct BPlusTree {
    dm: Arc<DataManager>,
    boot: ItemRef,
    boot_lock: Mutex<()>,
}

impl BPlusTree {
    /// Create an empty tree and return the address of its boot record.
    pub fn create(dm: &DataManager) -> Result<Address> {
        let root = dm.insert(SUPER_XID, &nil_root_raw())?;
        dm.insert(SUPER_XID, &root.0.to_be_bytes())
    }

    /// Open the tree whose boot record is at `boot_uid`.
    pub fn load(boot_uid: Address, dm: Arc<DataManager>) -> Result<Self> {
        let boot = dm
            .read(boot_uid)?
            .ok_or(Error::MissingRecord(boot_uid.0))?;
        Ok(Self {
            dm,
            boot,
            boot_lock: Mutex::new(()),
        })
    }

    pub fn boot_uid(&self) -> Address {
        self.boot.address()
    }

    fn root_uid(&self) -> Address {
        let _guard = self.boot_lock.lock();
        Address(self.boot.read(BigEndian::read_u64))
    }

    fn update_root_uid(&self, left: Address, right: Address, key: u64) -> Result<()> {
        let _guard = self.boot_lock.lock();
        let new_root = self.dm.insert(SUPER_XID, &new_root_raw(left, right, key))?;
        let mut edit = self.boot.edit();
        edit.update(|raw| BigEndian::write_u64(raw, new_root.0));
        edit.commit(SUPER_XID)
    }

    /// Child of `node_uid`'s level an insert of `key` goes to, moving right
    /// along siblings as needed.
    fn search_next(&self, node_uid: Address, key: u64) -> Result<Address> {
        self.descend(node_uid, |node| node.search_next(key))
    }

    fn descend(&self, mut node_uid: Address, next: impl Fn(&Node) -> Next) -> Result<Address> {
        loop {
            match next(&Node::load(&self.dm, node_uid)?) {
                Next::Child(child) => return Ok(child),
                Next::Sibling(Some(sibling)) => node_uid = sibling,
                Next::Sibling(None) => return Err(Error::MissingRecord(node_uid.0)),
            }
        }
    }

    /// Left-most leaf that may hold `key`.
    fn search_leaf(&self, mut node_uid: Address, key: u64) -> Result<Address> {
        loop {
            if Node::load(&self.dm, node_uid)?.is_leaf() {
                return Ok(node_uid);
            }
            node_uid = self.descend(node_uid, |node| node.search_first(key))?;
        }
    }

    pub fn search(&self, key: u64) -> Result<Vec<Address>> {
        self.search_range(key, key)
    }

    /// Addresses of every key in `[lo, hi]`, in key order.
    pub fn search_range(&self, lo: u64, hi: u64) -> Result<Vec<Address>> {
        if lo > hi || lo == u64::MAX {
            return Ok(Vec::new());
        }
        let mut leaf_uid = self.search_leaf(self.root_uid(), lo)?;
        let mut addresses = Vec::new();
        loop {
            let range = Node::load(&self.dm, leaf_uid)?.leaf_search_range(lo, hi);
            addresses.extend(range.addresses);
            match range.sibling {
                Some(sibling) => leaf_uid = sibling,
                None => break,
            }
        }
        Ok(addresses)
    }

    /// Index `address` under `key`. Duplicate keys are kept.
    pub fn insert(&self, key: u64, address: Address) -> Result<()> {
        if key == u64::MAX {
            return Err(Error::KeyOutOfRange);
        }

        let root_uid = self.root_uid();
        let mut path = Vec::new();
        let mut node_uid = root_uid;
        while !Node::load(&self.dm, node_uid)?.is_leaf() {
            path.push(node_uid);
            node_uid = self.search_next(node_uid, key)?;
        }

        let mut pending = self.insert_and_split(node_uid, address.0, key, None)?;
        while let Some((split_node, new_node, new_key)) = pending {
            pending = match path.pop() {
                Some(parent) => {
                    self.insert_and_split(parent, new_node.0, new_key, Some(split_node))?
                }
                None => {
                    self.update_root_uid(root_uid, new_node, new_key)?;
                    None
                }
            };
        }
        Ok(())
    }

    /// Insert into the node on `node_uid`'s level that covers `key`.
    /// Returns the node that split, its new right node and the split key.
    fn insert_and_split(
        &self,
        mut node_uid: Address,
        child: u64,
        key: u64,
        split: Option<Address>,
    ) -> Result<Option<(Address, Address, u64)>> {
        loop {
            let node = Node::load(&self.dm, node_uid)?;
            let result = node.insert_and_split(&self.dm, child, key, split)?;
            match result.sibling {
                Some(sibling) => node_uid = sibling,
                None => {
                    return Ok(result.split.map(|(new_node, key)| (node_uid, new_node, key)));
                }
            }
        }
    }

    /// Release the boot record.
    pub fn close(self) -> Result<()> {
        self.boot.release()
    }
}
