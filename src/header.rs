use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::geometry::{Block, BLOCK_SIZE};
use crate::layout::CAPACITY_BYTES;

/// `type (1) | stored_len (2, LE)`.
pub const HEADER_SIZE: usize = 3;
/// Largest `stored_len` a card can hold.
pub const MAX_PAYLOAD: usize = CAPACITY_BYTES - HEADER_SIZE;
/// Payload bytes that share the first user block with the header.
pub const FIRST_BLOCK_PAYLOAD: usize = BLOCK_SIZE - HEADER_SIZE;
/// Bit 7 of the type byte marks a record whose write has not been committed.
pub const IN_PROGRESS_FLAG: u8 = 0x80;

/// Application tag stored in byte 0 of the user area.  Opaque to the codec
/// except for [`RecordType::ENCRYPTED`], whose length must be block aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType(pub u8);

impl RecordType {
    pub const NONE:      RecordType = RecordType(0x00);
    pub const PLAINTEXT: RecordType = RecordType(0x01);
    pub const ENCRYPTED: RecordType = RecordType(0x02);

    #[inline]
    pub fn is_encrypted(self) -> bool {
        self == RecordType::ENCRYPTED
    }

    #[inline]
    pub fn is_in_progress(self) -> bool {
        self.0 & IN_PROGRESS_FLAG != 0
    }

    #[inline]
    pub fn with_in_progress(self) -> Self {
        RecordType(self.0 | IN_PROGRESS_FLAG)
    }

    #[inline]
    pub fn without_in_progress(self) -> Self {
        RecordType(self.0 & !IN_PROGRESS_FLAG)
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::NONE      => "none",
            RecordType::PLAINTEXT => "plaintext",
            RecordType::ENCRYPTED => "encrypted",
            _                     => "custom",
        }
    }
}

impl From<u8> for RecordType {
    fn from(v: u8) -> Self {
        RecordType(v)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x} ({})", self.0, self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HeaderFault {
    #[error("stored length {0} exceeds payload capacity of {MAX_PAYLOAD} bytes")]
    LengthExceedsCapacity(u16),
    #[error("encrypted record length {0} is not a multiple of {BLOCK_SIZE}")]
    MisalignedCiphertext(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub stored_len:  u16,
}

impl RecordHeader {
    pub fn new(record_type: RecordType, stored_len: u16) -> Self {
        Self { record_type, stored_len }
    }

    /// `type | stored_len (LE)`
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.record_type.0;
        LittleEndian::write_u16(&mut buf[1..3], self.stored_len);
        buf
    }

    /// Parse the header out of the first user block.
    pub fn from_block(block: &Block) -> Self {
        Self {
            record_type: RecordType(block[0]),
            stored_len:  LittleEndian::read_u16(&block[1..3]),
        }
    }

    /// Reject lengths the card cannot hold and ciphertext that is not block aligned.
    pub fn validate(&self) -> Result<(), HeaderFault> {
        if self.stored_len as usize > MAX_PAYLOAD {
            return Err(HeaderFault::LengthExceedsCapacity(self.stored_len));
        }
        if self.record_type.is_encrypted() && self.stored_len as usize % BLOCK_SIZE != 0 {
            return Err(HeaderFault::MisalignedCiphertext(self.stored_len));
        }
        Ok(())
    }

    /// Bytes the record occupies in the user area, header included.
    pub fn footprint(&self) -> usize {
        HEADER_SIZE + self.stored_len as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_is_little_endian() {
        let header = RecordHeader::new(RecordType::PLAINTEXT, 0x0102);
        assert_eq!(header.to_bytes(), [0x01, 0x02, 0x01]);

        let mut block = [0xFFu8; BLOCK_SIZE];
        block[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        assert_eq!(RecordHeader::from_block(&block), header);
    }

    #[test]
    fn validation_limits() {
        assert!(RecordHeader::new(RecordType::PLAINTEXT, MAX_PAYLOAD as u16).validate().is_ok());
        assert_eq!(
            RecordHeader::new(RecordType::PLAINTEXT, CAPACITY_BYTES as u16 + 1).validate(),
            Err(HeaderFault::LengthExceedsCapacity(CAPACITY_BYTES as u16 + 1)),
        );
        assert_eq!(
            RecordHeader::new(RecordType::ENCRYPTED, 17).validate(),
            Err(HeaderFault::MisalignedCiphertext(17)),
        );
        assert!(RecordHeader::new(RecordType::ENCRYPTED, 32).validate().is_ok());
        assert!(RecordHeader::new(RecordType(0x7E), 17).validate().is_ok());
    }

    #[test]
    fn in_progress_bit() {
        let staged = RecordType::ENCRYPTED.with_in_progress();
        assert_eq!(staged.0, 0x82);
        assert!(staged.is_in_progress());
        assert!(!staged.is_encrypted());
        assert_eq!(staged.without_in_progress(), RecordType::ENCRYPTED);
    }
}
