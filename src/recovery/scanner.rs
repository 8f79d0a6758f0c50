//! Whole-card scanner.
//!
//! Reads all 47 user blocks regardless of what the header claims, so a card
//! left behind by an aborted write can be diagnosed before it is overwritten.
//! Unlike the record codec, a failing block does not stop the scan; it is
//! logged in the report and the scan moves on.

use chrono::Utc;
use log::{info, warn};

use super::{CardHealth, HeaderVerdict, InspectionReport};
use crate::error::CardError;
use crate::geometry::BLOCK_SIZE;
use crate::header::{RecordHeader, HEADER_SIZE};
use crate::layout::{block_count, CAPACITY_BYTES, USER_BLOCKS};
use crate::transport::{CardSession, MifareClassic};

/// Read the full user area (752 bytes) in allocator order.  Aborts on the first failure.
pub fn dump_user_area<C: MifareClassic>(session: &mut CardSession<C>) -> Result<Vec<u8>, CardError> {
    let mut out = Vec::with_capacity(CAPACITY_BYTES);
    for &addr in USER_BLOCKS.iter() {
        match session.read_block(addr) {
            Ok(block) => out.extend_from_slice(&block),
            Err(e) => {
                warn!("User area dump failed at block {addr}: {e}");
                session.release();
                return Err(e);
            }
        }
    }
    session.release();
    Ok(out)
}

/// Scan every user block and judge the record stored on the card.
///
/// `staged` selects whether a set bit 7 in the type byte means an interrupted write.
pub fn inspect<C: MifareClassic>(session: &mut CardSession<C>, staged: bool) -> InspectionReport {
    let mut area = vec![0u8; CAPACITY_BYTES];
    let mut unreadable = Vec::new();

    for (i, &addr) in USER_BLOCKS.iter().enumerate() {
        match session.read_block(addr) {
            Ok(block) => area[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE].copy_from_slice(&block),
            Err(e) => {
                warn!("Block {addr} unreadable during scan: {e}");
                unreadable.push(addr);
            }
        }
    }
    session.release();

    let header_readable = !unreadable.contains(&USER_BLOCKS[0]);
    let header = if header_readable {
        let mut first = [0u8; BLOCK_SIZE];
        first.copy_from_slice(&area[..BLOCK_SIZE]);
        judge_header(RecordHeader::from_block(&first), staged)
    } else {
        HeaderVerdict::Unreadable
    };

    let footprint_bytes = match &header {
        HeaderVerdict::Empty { .. } => HEADER_SIZE,
        HeaderVerdict::Valid { stored_len, .. } => HEADER_SIZE + *stored_len as usize,
        _ => 0,
    };
    let footprint_blocks = block_count(footprint_bytes);

    // Residue only means something when the header can be trusted.
    let residue_blocks: Vec<u8> = if footprint_bytes == 0 {
        Vec::new()
    } else {
        USER_BLOCKS
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let start = (i * BLOCK_SIZE).max(footprint_bytes);
                let end = (i + 1) * BLOCK_SIZE;
                start < end && area[start..end].iter().any(|&b| b != 0)
            })
            .map(|(_, &addr)| addr)
            .collect()
    };

    let health = if !unreadable.is_empty() {
        CardHealth::Unreadable
    } else {
        match &header {
            HeaderVerdict::Invalid { .. } | HeaderVerdict::Interrupted { .. } => CardHealth::Corrupt,
            _ if !residue_blocks.is_empty() => CardHealth::Residue,
            _ => CardHealth::Clean,
        }
    };

    let report = InspectionReport {
        scanned_at: Utc::now(),
        uid: session.info().uid_hex(),
        header,
        footprint_blocks,
        unreadable_blocks: unreadable,
        residue_blocks,
        digest: blake3::hash(&area).to_hex().to_string(),
        health,
    };
    info!("{}", report.summary());
    report
}

fn judge_header(header: RecordHeader, staged: bool) -> HeaderVerdict {
    let RecordHeader { record_type, stored_len } = header;
    if staged && record_type.is_in_progress() {
        return HeaderVerdict::Interrupted { record_type: record_type.without_in_progress(), stored_len };
    }
    match header.validate() {
        Err(fault) => HeaderVerdict::Invalid { record_type, stored_len, fault },
        Ok(()) if stored_len == 0 => HeaderVerdict::Empty { record_type },
        Ok(()) => HeaderVerdict::Valid { record_type, stored_len },
    }
}
