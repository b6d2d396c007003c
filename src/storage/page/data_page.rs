//! Data page layout: `[2B free-space offset][records...]`.
//!
//! Records are appended at the free-space offset and never moved, so an
//! address stays valid for the life of the file.

use crate::storage::page::Page;
use crate::storage::PAGE_SIZE;
use byteorder::{BigEndian, ByteOrder};

const OF_FREE: usize = 0;
pub const OF_DATA: usize = 2;

/// Largest record a single page can hold.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - OF_DATA;

pub fn init_raw() -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    set_fso(&mut raw, OF_DATA as u16);
    raw
}

fn fso(data: &[u8]) -> u16 {
    BigEndian::read_u16(&data[OF_FREE..OF_DATA])
}

fn set_fso(data: &mut [u8], offset: u16) {
    BigEndian::write_u16(&mut data[OF_FREE..OF_DATA], offset);
}

/// Append `raw` and return the offset it was written at.
///
/// The caller has checked that the page has room.
pub fn insert(page: &Page, raw: &[u8]) -> u16 {
    let mut data = page.write();
    let offset = fso(&data);
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
    set_fso(&mut data, offset + raw.len() as u16);
    offset
}

/// Offset the next insert will be written at.
pub fn free_offset(page: &Page) -> u16 {
    fso(&page.read())
}

pub fn free_space(page: &Page) -> usize {
    PAGE_SIZE - fso(&page.read()) as usize
}

/// Redo an insert: write `raw` at `offset`, raising the free-space offset
/// when the record ends past it.
pub fn recover_insert(page: &Page, raw: &[u8], offset: u16) {
    let mut data = page.write();
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);

    let end = offset + raw.len() as u16;
    if fso(&data) < end {
        set_fso(&mut data, end);
    }
}

/// Redo or undo an update: overwrite the bytes at `offset`.
pub fn recover_update(page: &Page, raw: &[u8], offset: u16) {
    let mut data = page.write();
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
}
