//! Fixed geometry of the MIFARE Classic 1K card family and card classification.
//!
//! # Layout
//! A 1K card holds 64 blocks of 16 bytes, grouped into 16 sectors of 4 blocks.
//! Block 0 is the manufacturer block (UID, BCC, SAK, ATQA) and the last block
//! of every sector is the trailer (Key A, access bits, Key B).  Neither is ever
//! used for payload.
//!
//! The geometry is never probed from a live card.  A session classifies the
//! selected card from its SAK/ATQA and refuses anything that is not a 1K card.

use serde::Serialize;
use std::fmt;

/// Bytes per block.
pub const BLOCK_SIZE: usize = 16;
/// Blocks per sector (the last one is the trailer).
pub const BLOCKS_PER_SECTOR: u8 = 4;
/// Sectors on a 1K card.
pub const SECTOR_COUNT: u8 = 16;
/// Total addressable blocks on a 1K card.
pub const TOTAL_BLOCKS: u8 = SECTOR_COUNT * BLOCKS_PER_SECTOR;
/// Length of a sector key (Key A / Key B).
pub const KEY_LEN: usize = 6;

/// SAK reported by MIFARE Classic 1K cards.
pub const SAK_CLASSIC_1K: u8 = 0x08;
/// ATQA reported by 4-byte-UID MIFARE Classic 1K cards (on-card byte order).
pub const ATQA_CLASSIC_1K: [u8; 2] = [0x04, 0x00];

/// One 16-byte block.
pub type Block = [u8; BLOCK_SIZE];

/// Trailer of a card fresh from the factory: Key A = FF.., access bits
/// `FF 07 80` (transport configuration), GPB `69`, Key B = FF...
pub const FACTORY_TRAILER: Block = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0x07, 0x80, 0x69,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

#[inline]
pub const fn sector_of(block: u8) -> u8 {
    block / BLOCKS_PER_SECTOR
}

/// Trailer block address of `sector`.
#[inline]
pub const fn trailer_of(sector: u8) -> u8 {
    sector * BLOCKS_PER_SECTOR + (BLOCKS_PER_SECTOR - 1)
}

#[inline]
pub const fn is_trailer(block: u8) -> bool {
    block % BLOCKS_PER_SECTOR == BLOCKS_PER_SECTOR - 1
}

/// Block 0, every trailer, and anything past the end of the card.
#[inline]
pub const fn is_reserved(block: u8) -> bool {
    block == 0 || block >= TOTAL_BLOCKS || is_trailer(block)
}

// ── Card classification ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PiccType {
    MifareMini,
    MifareClassic1K,
    MifareClassic4K,
    Ntag,
    Unknown,
}

impl PiccType {
    /// Classify from the SAK byte, ignoring bit 7 as MFRC522-style readers do.
    pub fn from_sak(sak: u8) -> Self {
        match sak & 0x7F {
            0x09 => PiccType::MifareMini,
            0x08 => PiccType::MifareClassic1K,
            0x18 => PiccType::MifareClassic4K,
            0x00 => PiccType::Ntag,
            _    => PiccType::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PiccType::MifareMini      => "MIFARE Mini, 320 bytes",
            PiccType::MifareClassic1K => "MIFARE 1KB",
            PiccType::MifareClassic4K => "MIFARE 4KB",
            PiccType::Ntag            => "MIFARE Ultralight or NTAG",
            PiccType::Unknown         => "Unknown type",
        }
    }
}

impl fmt::Display for PiccType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of the selected card, as reported by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardInfo {
    pub uid:  Vec<u8>,
    pub sak:  u8,
    pub atqa: [u8; 2],
}

impl CardInfo {
    pub fn picc_type(&self) -> PiccType {
        PiccType::from_sak(self.sak)
    }

    /// Only the 16 x 4 x 16 layout is understood by the record codec.
    pub fn is_supported(&self) -> bool {
        self.picc_type() == PiccType::MifareClassic1K
    }

    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }
}

// ── Manufacturer block ───────────────────────────────────────────────────────

/// Block check character over a 4-byte UID.
pub fn bcc(uid: &[u8; 4]) -> u8 {
    uid.iter().fold(0, |acc, b| acc ^ b)
}

/// Build block 0 for a 4-byte-UID card: `UID(4) | BCC | SAK | ATQA(2) | maker data(8)`.
pub fn manufacturer_block(uid: [u8; 4], sak: u8, atqa: [u8; 2]) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    block[..4].copy_from_slice(&uid);
    block[4] = bcc(&uid);
    block[5] = sak;
    block[6..8].copy_from_slice(&atqa);
    block[8..].copy_from_slice(b"CARDVLT1");
    block
}

/// Read the card identity back out of block 0.
pub fn parse_manufacturer_block(block: &Block) -> CardInfo {
    CardInfo {
        uid:  block[..4].to_vec(),
        sak:  block[5],
        atqa: [block[6], block[7]],
    }
}
