//! Block transport: the card collaborator and the authenticated session on top of it.
//!
//! [`MifareClassic`] is the narrow interface a reader driver exposes
//! (select, Key A authentication, 16-byte block read/write, halt, stop crypto).
//! [`CardSession`] owns one selected card and routes every block access
//! through the [`SectorAuthenticator`], refusing writes to reserved blocks
//! before anything reaches the wire.

pub mod memory;

pub use memory::{Faults, MemoryCard};

use log::{debug, error, trace};
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::auth::SectorAuthenticator;
use crate::error::CardError;
use crate::geometry::{is_reserved, Block, CardInfo, KEY_LEN, TOTAL_BLOCKS};

/// Sector authentication key.
pub type KeyA = [u8; KEY_LEN];

/// Factory default Key A.
pub const DEFAULT_KEY_A: KeyA = [0xFF; KEY_LEN];

/// Wire-level status reported by the reader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PiccError {
    #[error("Timeout in communication")]
    Timeout,
    #[error("Card answered NAK {0:#03x}")]
    Nak(u8),
    #[error("Authentication rejected")]
    AuthRejected,
    #[error("Sector not authenticated")]
    NotAuthenticated,
    #[error("Access to block {0} denied")]
    AccessDenied(u8),
    #[error("No card in the field")]
    NoCard,
}

/// Operations a MIFARE Classic reader driver provides.
pub trait MifareClassic {
    /// Detect and select the card in the field.
    fn select(&mut self) -> Result<CardInfo, PiccError>;
    /// Three-pass Key A authentication against the sector owning `block`.
    fn authenticate_key_a(&mut self, block: u8, key: &KeyA, uid: &[u8]) -> Result<(), PiccError>;
    fn read_block(&mut self, block: u8) -> Result<Block, PiccError>;
    fn write_block(&mut self, block: u8, data: &Block) -> Result<(), PiccError>;
    /// Put the card to sleep (HLTA).
    fn halt(&mut self) -> Result<(), PiccError>;
    /// Drop the reader-side crypto session.
    fn stop_crypto(&mut self);
}

impl<T: MifareClassic + ?Sized> MifareClassic for &mut T {
    fn select(&mut self) -> Result<CardInfo, PiccError> {
        (**self).select()
    }
    fn authenticate_key_a(&mut self, block: u8, key: &KeyA, uid: &[u8]) -> Result<(), PiccError> {
        (**self).authenticate_key_a(block, key, uid)
    }
    fn read_block(&mut self, block: u8) -> Result<Block, PiccError> {
        (**self).read_block(block)
    }
    fn write_block(&mut self, block: u8, data: &Block) -> Result<(), PiccError> {
        (**self).write_block(block, data)
    }
    fn halt(&mut self) -> Result<(), PiccError> {
        (**self).halt()
    }
    fn stop_crypto(&mut self) {
        (**self).stop_crypto()
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// Per-card state: the selected card, its identity, Key A and the sector cache.
pub struct CardSession<C: MifareClassic> {
    card:        C,
    info:        CardInfo,
    key_a:       KeyA,
    auth:        SectorAuthenticator,
    read_delay:  Duration,
    write_delay: Duration,
}

impl<C: MifareClassic> CardSession<C> {
    /// Select the card and check it is a MIFARE Classic 1K.
    ///
    /// Anything else is refused before a single block is touched.
    pub fn open(mut card: C, key_a: KeyA) -> Result<Self, CardError> {
        let info = card.select().map_err(CardError::Select)?;
        debug!("Card selected: UID {} ({})", info.uid_hex(), info.picc_type());
        if !info.is_supported() {
            error!("Refusing card {}: {} is not supported", info.uid_hex(), info.picc_type());
            let _ = card.halt();
            return Err(CardError::UnsupportedCard { picc_type: info.picc_type(), sak: info.sak });
        }
        Ok(Self {
            card,
            info,
            key_a,
            auth:        SectorAuthenticator::new(),
            read_delay:  Duration::ZERO,
            write_delay: Duration::ZERO,
        })
    }

    /// Pause after every block read / write.
    pub fn with_delays(mut self, read_delay: Duration, write_delay: Duration) -> Self {
        self.read_delay  = read_delay;
        self.write_delay = write_delay;
        self
    }

    pub fn info(&self) -> &CardInfo {
        &self.info
    }

    /// Read any addressable block, authenticating its sector first.
    pub fn read_block(&mut self, addr: u8) -> Result<Block, CardError> {
        if addr >= TOTAL_BLOCKS {
            return Err(CardError::InvalidAddress(addr));
        }
        self.auth.ensure_sector(&mut self.card, addr, &self.key_a, &self.info.uid)?;
        let block = self.card.read_block(addr).map_err(|source| {
            error!("Read error (block {addr}): {source}");
            // The card drops its crypto state after a NAK or timeout.
            self.auth.invalidate();
            CardError::Io { block: addr, source }
        })?;
        trace!("Read block {addr:2}: {}", hex::encode(block));
        pause(self.read_delay);
        Ok(block)
    }

    /// Write a user block.  Block 0 and sector trailers are refused without
    /// touching the card.
    pub fn write_block(&mut self, addr: u8, data: &Block) -> Result<(), CardError> {
        if is_reserved(addr) {
            error!("Write error: attempt to write reserved block {addr}");
            return Err(CardError::InvalidAddress(addr));
        }
        self.auth.ensure_sector(&mut self.card, addr, &self.key_a, &self.info.uid)?;
        self.card.write_block(addr, data).map_err(|source| {
            error!("Write error (block {addr}): {source}");
            self.auth.invalidate();
            CardError::Io { block: addr, source }
        })?;
        trace!("Wrote block {addr:2}");
        pause(self.write_delay);
        Ok(())
    }

    /// Tear down the crypto session; the card stays selected.
    pub fn release(&mut self) {
        self.card.stop_crypto();
        self.auth.invalidate();
    }

    /// Halt the card, stop crypto and hand the reader back.
    pub fn close(mut self) -> C {
        if let Err(e) = self.card.halt() {
            debug!("Halt failed: {e}");
        }
        self.release();
        self.card
    }

    /// Authentication handshakes performed so far in this session.
    pub fn handshakes(&self) -> u32 {
        self.auth.handshakes()
    }

    pub fn card(&self) -> &C {
        &self.card
    }

    pub fn card_mut(&mut self) -> &mut C {
        &mut self.card
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
