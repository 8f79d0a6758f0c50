//! Record codec: one `{type, length, bytes}` record spread over the user area.
//!
//! # On-card layout
//! The record is serialised as a single stream
//! `type (1) | stored_len (2, LE) | stored bytes` and cut into 16-byte chunks,
//! one per user block in allocator order.  The last data chunk is zero padded
//! and every user block after it is overwritten with zeros, so a shorter
//! record never leaves residue of a longer one.
//!
//! # Failure policy
//! The first failing block aborts the operation.  Blocks already written stay
//! written; there is no rollback.  Every failure path tears down the crypto
//! session before returning.
//!
//! # Staged commit
//! With [`RecordCodec::staged`] the header block is first written with the
//! write-in-progress bit set and rewritten with the final type only once
//! every other block has landed.  A reader in staged mode reports such a
//! header as [`CardError::InterruptedWrite`].

pub mod sealed;

pub use sealed::{Payload, SealedRecords};

use log::{debug, info, warn};

use crate::error::CardError;
use crate::geometry::{Block, BLOCK_SIZE};
use crate::header::{RecordHeader, RecordType, FIRST_BLOCK_PAYLOAD, HEADER_SIZE, MAX_PAYLOAD};
use crate::layout::{block_count, USER_BLOCKS};
use crate::transport::{CardSession, MifareClassic};

/// Type and length of a record read into a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub record_type: RecordType,
    pub len:         usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec {
    staged_commit: bool,
}

impl RecordCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that marks records in progress until fully written.
    pub fn staged() -> Self {
        Self { staged_commit: true }
    }

    pub fn with_staged_commit(staged_commit: bool) -> Self {
        Self { staged_commit }
    }

    pub fn is_staged(&self) -> bool {
        self.staged_commit
    }

    // ── Write ────────────────────────────────────────────────────────────────

    /// Store `payload` under `record_type`, zeroing the rest of the user area.
    pub fn write<C: MifareClassic>(
        &self,
        session:     &mut CardSession<C>,
        record_type: RecordType,
        payload:     &[u8],
    ) -> Result<(), CardError> {
        let result = self.write_record(session, record_type, payload);
        if let Err(e) = &result {
            warn!("Record write aborted: {e}");
            session.release();
        }
        result
    }

    fn write_record<C: MifareClassic>(
        &self,
        session:     &mut CardSession<C>,
        record_type: RecordType,
        payload:     &[u8],
    ) -> Result<(), CardError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(CardError::PayloadTooLarge { len: payload.len(), max: MAX_PAYLOAD });
        }
        if self.staged_commit && record_type.is_in_progress() {
            return Err(CardError::ReservedType(record_type));
        }

        let header = RecordHeader::new(record_type, payload.len() as u16);
        // Never store a header the read path would reject.
        header.validate()?;
        let mut stream = Vec::with_capacity(header.footprint());
        stream.extend_from_slice(&header.to_bytes());
        stream.extend_from_slice(payload);

        let data_blocks = block_count(stream.len());
        let mut first_block = chunk_block(&stream, 0);
        if self.staged_commit {
            first_block[0] = record_type.with_in_progress().0;
        }

        debug!(
            "Writing record {record_type}: {} payload bytes in {data_blocks} block(s), zeroing {}",
            payload.len(),
            USER_BLOCKS.len() - data_blocks,
        );
        for (i, &addr) in USER_BLOCKS.iter().enumerate() {
            let block = if i == 0 { first_block } else { chunk_block(&stream, i) };
            session.write_block(addr, &block)?;
        }

        if self.staged_commit {
            first_block[0] = record_type.0;
            session.write_block(USER_BLOCKS[0], &first_block)?;
            debug!("Committed record header {record_type}");
        }

        info!("Stored {} byte record {record_type}", payload.len());
        Ok(())
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    /// Read the header block only.
    pub fn read_header<C: MifareClassic>(&self, session: &mut CardSession<C>) -> Result<RecordHeader, CardError> {
        let result = session.read_block(USER_BLOCKS[0]).map(|b| RecordHeader::from_block(&b));
        if result.is_err() {
            session.release();
        }
        result
    }

    /// Read the record into `buf`, returning its type and length.
    ///
    /// An empty record (`stored_len == 0`) succeeds without touching any block
    /// past the header block.
    pub fn read<C: MifareClassic>(
        &self,
        session: &mut CardSession<C>,
        buf:     &mut [u8],
    ) -> Result<RecordInfo, CardError> {
        let result = self.read_record(session, buf);
        if let Err(e) = &result {
            warn!("Record read aborted: {e}");
            session.release();
        }
        result
    }

    /// Read the record into a freshly allocated buffer.
    pub fn read_to_vec<C: MifareClassic>(
        &self,
        session: &mut CardSession<C>,
    ) -> Result<(RecordType, Vec<u8>), CardError> {
        let mut buf = vec![0u8; MAX_PAYLOAD];
        let info = self.read(session, &mut buf)?;
        buf.truncate(info.len);
        Ok((info.record_type, buf))
    }

    fn read_record<C: MifareClassic>(
        &self,
        session: &mut CardSession<C>,
        buf:     &mut [u8],
    ) -> Result<RecordInfo, CardError> {
        let first = session.read_block(USER_BLOCKS[0])?;
        let header = RecordHeader::from_block(&first);
        debug!("Header: type {}, stored length {}", header.record_type, header.stored_len);

        if self.staged_commit && header.record_type.is_in_progress() {
            return Err(CardError::InterruptedWrite(header.record_type.without_in_progress()));
        }
        header.validate()?;

        let len = header.stored_len as usize;
        let record_type = header.record_type;
        if len == 0 {
            return Ok(RecordInfo { record_type, len: 0 });
        }
        if buf.len() < len {
            return Err(CardError::BufferTooSmall { needed: len, available: buf.len() });
        }

        let mut copied = len.min(FIRST_BLOCK_PAYLOAD);
        buf[..copied].copy_from_slice(&first[HEADER_SIZE..HEADER_SIZE + copied]);

        for &addr in &USER_BLOCKS[1..] {
            if copied == len {
                break;
            }
            let block = session.read_block(addr)?;
            let n = (len - copied).min(BLOCK_SIZE);
            buf[copied..copied + n].copy_from_slice(&block[..n]);
            copied += n;
        }
        if copied < len {
            return Err(CardError::LengthMismatch { expected: len, copied });
        }

        info!("Read {len} byte record {record_type}");
        Ok(RecordInfo { record_type, len })
    }
}

/// The `index`-th 16-byte chunk of `stream`, zero padded; all zeros past the end.
fn chunk_block(stream: &[u8], index: usize) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    let start = index * BLOCK_SIZE;
    if start < stream.len() {
        let end = (start + BLOCK_SIZE).min(stream.len());
        block[..end - start].copy_from_slice(&stream[start..end]);
    }
    block
}
