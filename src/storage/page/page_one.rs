//! Page one: the clean-shutdown marker.
//!
//! A random token is written at `[100, 108)` on every open and copied to
//! `[108, 116)` on a clean close. If the two differ at open, the previous
//! session crashed and the log has to be replayed.

use crate::storage::page::Page;
use crate::storage::PAGE_SIZE;
use rand::RngCore;

const OF_TOKEN: usize = 100;
const TOKEN_LEN: usize = 8;

pub fn init_raw() -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    fill_open_token(&mut raw);
    raw
}

fn fill_open_token(raw: &mut [u8]) {
    rand::thread_rng().fill_bytes(&mut raw[OF_TOKEN..OF_TOKEN + TOKEN_LEN]);
}

pub fn set_open_token(page: &Page) {
    fill_open_token(&mut page.write());
}

pub fn set_close_token(page: &Page) {
    page.write()
        .copy_within(OF_TOKEN..OF_TOKEN + TOKEN_LEN, OF_TOKEN + TOKEN_LEN);
}

/// Whether the last session closed cleanly.
pub fn check_token(page: &Page) -> bool {
    let data = page.read();
    data[OF_TOKEN..OF_TOKEN + TOKEN_LEN] == data[OF_TOKEN + TOKEN_LEN..OF_TOKEN + 2 * TOKEN_LEN]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PageId;

    #[test]
    fn test_token_lifecycle() {
        let page = Page::new(PageId(1), init_raw());
        assert!(!check_token(&page));

        set_close_token(&page);
        assert!(check_token(&page));

        set_open_token(&page);
        assert!(!check_token(&page));
    }
}
