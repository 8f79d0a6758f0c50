//! Software MIFARE Classic 1K card.
//!
//! Models what the codec depends on: Key A checked against each sector
//! trailer, a block access only succeeding inside the authenticated sector,
//! crypto state lost on a rejected handshake, a failed block access,
//! `stop_crypto` or `halt`, and a read-only manufacturer block.  Faults can be injected per block or sector.
//!
//! # Image format
//! Cards persist as the raw 1024-byte dump (`.mfd`) used by common MIFARE
//! tooling: blocks 0..63 back to back, trailers included.

use std::fs;
use std::io;
use std::path::Path;

use crate::geometry::{
    is_trailer, manufacturer_block, parse_manufacturer_block, sector_of, trailer_of, Block,
    CardInfo, ATQA_CLASSIC_1K, BLOCK_SIZE, FACTORY_TRAILER, KEY_LEN, SAK_CLASSIC_1K, SECTOR_COUNT,
    TOTAL_BLOCKS,
};
use crate::layout::USER_BLOCKS;
use super::{KeyA, MifareClassic, PiccError};

/// Size of a raw card dump.
pub const IMAGE_SIZE: usize = TOTAL_BLOCKS as usize * BLOCK_SIZE;

/// NAK a real card answers to a refused write.
const NAK_INVALID_OPERATION: u8 = 0x04;

/// Injected failures.  Each stays active until cleared.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail_write_at:      Option<u8>,
    pub fail_read_at:       Option<u8>,
    pub reject_auth_sector: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct MemoryCard {
    blocks:        [Block; TOTAL_BLOCKS as usize],
    present:       bool,
    selected:      bool,
    authenticated: Option<u8>,
    auth_count:    u32,
    read_count:    u32,
    write_count:   u32,
    faults:        Faults,
}

impl MemoryCard {
    /// A factory-fresh card with the given 4-byte UID.
    pub fn blank(uid: [u8; 4]) -> Self {
        let mut blocks = [[0u8; BLOCK_SIZE]; TOTAL_BLOCKS as usize];
        blocks[0] = manufacturer_block(uid, SAK_CLASSIC_1K, ATQA_CLASSIC_1K);
        for sector in 0..SECTOR_COUNT {
            blocks[trailer_of(sector) as usize] = FACTORY_TRAILER;
        }
        Self::from_blocks(blocks)
    }

    fn from_blocks(blocks: [Block; TOTAL_BLOCKS as usize]) -> Self {
        Self {
            blocks,
            present:       true,
            selected:      false,
            authenticated: None,
            auth_count:    0,
            read_count:    0,
            write_count:   0,
            faults:        Faults::default(),
        }
    }

    // ── Image I/O ────────────────────────────────────────────────────────────

    pub fn from_image(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != IMAGE_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!(
                "card image must be {IMAGE_SIZE} bytes, got {}", bytes.len()
            )));
        }
        let mut blocks = [[0u8; BLOCK_SIZE]; TOTAL_BLOCKS as usize];
        for (block, chunk) in blocks.iter_mut().zip(bytes.chunks_exact(BLOCK_SIZE)) {
            block.copy_from_slice(chunk);
        }
        Ok(Self::from_blocks(blocks))
    }

    pub fn to_image(&self) -> Vec<u8> {
        self.blocks.concat()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::from_image(&fs::read(path)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.to_image())
    }

    // ── Direct access (bypasses authentication) ─────────────────────────────

    /// # Panics
    /// If `addr` is not below 64.
    pub fn block(&self, addr: u8) -> &Block {
        &self.blocks[addr as usize]
    }

    /// Overwrite a block directly, as a corrupting reader or a bad tear would.
    ///
    /// # Panics
    /// If `addr` is not below 64.
    pub fn set_block(&mut self, addr: u8, data: Block) {
        self.blocks[addr as usize] = data;
    }

    /// The 752 user-area bytes in allocator order.
    pub fn user_area(&self) -> Vec<u8> {
        USER_BLOCKS.iter().flat_map(|&addr| self.blocks[addr as usize]).collect()
    }

    /// Replace Key A of `sector` in its trailer.
    ///
    /// # Panics
    /// If `sector` is not below 16.
    pub fn set_key_a(&mut self, sector: u8, key: &KeyA) {
        self.blocks[trailer_of(sector) as usize][..KEY_LEN].copy_from_slice(key);
    }

    pub fn info(&self) -> CardInfo {
        parse_manufacturer_block(&self.blocks[0])
    }

    // ── Test hooks ───────────────────────────────────────────────────────────

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    pub fn clear_faults(&mut self) {
        self.faults = Faults::default();
    }

    /// Take the card out of the field.
    pub fn remove(&mut self) {
        self.present       = false;
        self.selected      = false;
        self.authenticated = None;
    }

    pub fn insert(&mut self) {
        self.present = true;
    }

    pub fn auth_count(&self) -> u32 {
        self.auth_count
    }

    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn authenticated_sector(&self) -> Option<u8> {
        self.authenticated
    }

    fn check_access(&self, block: u8) -> Result<(), PiccError> {
        if !self.present || !self.selected {
            return Err(PiccError::NoCard);
        }
        if block >= TOTAL_BLOCKS {
            return Err(PiccError::Nak(NAK_INVALID_OPERATION));
        }
        if self.authenticated != Some(sector_of(block)) {
            return Err(PiccError::NotAuthenticated);
        }
        Ok(())
    }

    fn read_authenticated(&mut self, block: u8) -> Result<Block, PiccError> {
        self.check_access(block)?;
        if self.faults.fail_read_at == Some(block) {
            return Err(PiccError::Timeout);
        }
        self.read_count += 1;
        let mut data = self.blocks[block as usize];
        if is_trailer(block) {
            // Key A is never readable.
            data[..KEY_LEN].fill(0);
        }
        Ok(data)
    }

    fn write_authenticated(&mut self, block: u8, data: &Block) -> Result<(), PiccError> {
        self.check_access(block)?;
        if block == 0 {
            return Err(PiccError::AccessDenied(0));
        }
        if self.faults.fail_write_at == Some(block) {
            return Err(PiccError::Nak(NAK_INVALID_OPERATION));
        }
        self.write_count += 1;
        self.blocks[block as usize] = *data;
        Ok(())
    }
}

impl Default for MemoryCard {
    fn default() -> Self {
        Self::blank([0xDE, 0xAD, 0xBE, 0xEF])
    }
}

impl MifareClassic for MemoryCard {
    fn select(&mut self) -> Result<CardInfo, PiccError> {
        if !self.present {
            return Err(PiccError::NoCard);
        }
        self.selected      = true;
        self.authenticated = None;
        Ok(self.info())
    }

    fn authenticate_key_a(&mut self, block: u8, key: &KeyA, uid: &[u8]) -> Result<(), PiccError> {
        if !self.present || !self.selected {
            return Err(PiccError::NoCard);
        }
        if block >= TOTAL_BLOCKS {
            return Err(PiccError::Nak(NAK_INVALID_OPERATION));
        }
        self.auth_count += 1;
        // A failed handshake leaves the card without any crypto session.
        self.authenticated = None;

        let sector = sector_of(block);
        let stored = &self.blocks[trailer_of(sector) as usize][..KEY_LEN];
        let rejected = self.faults.reject_auth_sector == Some(sector)
            || stored != key.as_slice()
            || uid != &self.blocks[0][..4];
        if rejected {
            return Err(PiccError::AuthRejected);
        }
        self.authenticated = Some(sector);
        Ok(())
    }

    fn read_block(&mut self, block: u8) -> Result<Block, PiccError> {
        let result = self.read_authenticated(block);
        if result.is_err() {
            self.authenticated = None;
        }
        result
    }

    fn write_block(&mut self, block: u8, data: &Block) -> Result<(), PiccError> {
        let result = self.write_authenticated(block, data);
        if result.is_err() {
            self.authenticated = None;
        }
        result
    }

    fn halt(&mut self) -> Result<(), PiccError> {
        if !self.present {
            return Err(PiccError::NoCard);
        }
        self.selected      = false;
        self.authenticated = None;
        Ok(())
    }

    fn stop_crypto(&mut self) {
        self.authenticated = None;
    }
}
