use thiserror::Error;

use crate::crypto::CryptoError;
use crate::geometry::PiccType;
use crate::header::{HeaderFault, RecordType};
use crate::transport::PiccError;

/// Everything that can abort a card operation.
#[derive(Error, Debug)]
pub enum CardError {
    #[error("Authentication failed for sector {sector} (block {block}): {source}")]
    Auth {
        sector: u8,
        block:  u8,
        #[source]
        source: PiccError,
    },
    #[error("I/O failure at block {block}: {source}")]
    Io {
        block: u8,
        #[source]
        source: PiccError,
    },
    #[error("Block {0} is reserved or out of range")]
    InvalidAddress(u8),
    #[error("Invalid record header: {0}")]
    InvalidHeader(#[from] HeaderFault),
    #[error("Output buffer too small: record holds {needed} bytes, buffer has {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("Record declares {expected} bytes but the user area ended after {copied}")]
    LengthMismatch { expected: usize, copied: usize },
    #[error("Payload of {len} bytes exceeds the {max} bytes available")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Unsupported card: {picc_type} (SAK {sak:#04x})")]
    UnsupportedCard { picc_type: PiccType, sak: u8 },
    #[error("Card selection failed: {0}")]
    Select(#[source] PiccError),
    #[error("Record {0} was left mid-write")]
    InterruptedWrite(RecordType),
    #[error("Record type {0} collides with the write-in-progress bit")]
    ReservedType(RecordType),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl CardError {
    /// Failures the application can resolve by overwriting the card.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CardError::InvalidHeader(_) | CardError::InterruptedWrite(_))
    }

    /// Block at which a transport failure happened, if any.
    pub fn failed_block(&self) -> Option<u8> {
        match self {
            CardError::Auth { block, .. } | CardError::Io { block, .. } => Some(*block),
            CardError::InvalidAddress(block) => Some(*block),
            _ => None,
        }
    }
}
