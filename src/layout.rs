//! User-area allocator: the flat sequence of payload blocks on a 1K card.
//!
//! The sequence skips block 0 and every sector trailer, giving 47 blocks
//! (752 bytes).  It is a compile-time constant and the addressing contract
//! the record codec relies on; it is never derived from a live card.

use crate::geometry::{is_reserved, BLOCK_SIZE};

/// Every non-reserved block address, ascending.
pub const USER_BLOCKS: [u8; 47] = [
     1,  2,      4,  5,  6,      8,  9, 10,     12, 13, 14,     // sectors 0-3
    16, 17, 18,     20, 21, 22,     24, 25, 26,     28, 29, 30,     // sectors 4-7
    32, 33, 34,     36, 37, 38,     40, 41, 42,     44, 45, 46,     // sectors 8-11
    48, 49, 50,     52, 53, 54,     56, 57, 58,     60, 61, 62,     // sectors 12-15
];

/// Number of user blocks.
pub const USER_BLOCK_COUNT: usize = USER_BLOCKS.len();
/// Bytes available in the user area.
pub const CAPACITY_BYTES: usize = USER_BLOCK_COUNT * BLOCK_SIZE;

/// The `index`-th user block address, or `None` past the end of the area.
#[inline]
pub fn block_address_at(index: usize) -> Option<u8> {
    USER_BLOCKS.get(index).copied()
}

#[inline]
pub const fn capacity_bytes() -> usize {
    CAPACITY_BYTES
}

/// Blocks needed to hold `byte_len` bytes.
#[inline]
pub const fn block_count(byte_len: usize) -> usize {
    byte_len.div_ceil(BLOCK_SIZE)
}

#[inline]
pub fn is_user_block(addr: u8) -> bool {
    !is_reserved(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TOTAL_BLOCKS;

    #[test]
    fn table_matches_geometry() {
        let derived: Vec<u8> = (0..TOTAL_BLOCKS).filter(|&b| is_user_block(b)).collect();
        assert_eq!(derived, USER_BLOCKS.to_vec());
        assert_eq!(USER_BLOCK_COUNT, 47);
        assert_eq!(capacity_bytes(), 752);
    }

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(block_count(0), 0);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(16), 1);
        assert_eq!(block_count(17), 2);
        assert_eq!(block_count(CAPACITY_BYTES), USER_BLOCK_COUNT);
    }

    #[test]
    fn addresses_by_index() {
        assert_eq!(block_address_at(0), Some(1));
        assert_eq!(block_address_at(2), Some(4));
        assert_eq!(block_address_at(46), Some(62));
        assert_eq!(block_address_at(47), None);
    }
}
