pub mod scanner;

pub use scanner::{dump_user_area, inspect};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::header::{HeaderFault, RecordType};

/// What the header block says about the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HeaderVerdict {
    /// `stored_len == 0`.
    Empty { record_type: RecordType },
    Valid { record_type: RecordType, stored_len: u16 },
    /// Header present but unusable; the application may offer to overwrite.
    Invalid { record_type: RecordType, stored_len: u16, fault: HeaderFault },
    /// The write-in-progress bit is still set.
    Interrupted { record_type: RecordType, stored_len: u16 },
    /// The header block itself could not be read.
    Unreadable,
}

/// Overall verdict of an inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardHealth {
    /// Valid or empty record, zeros after it, every block readable.
    Clean,
    /// Valid record but non-zero bytes after its footprint.
    Residue,
    /// Invalid or interrupted header.
    Corrupt,
    /// At least one user block could not be read.
    Unreadable,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub scanned_at:        DateTime<Utc>,
    pub uid:               String,
    pub header:            HeaderVerdict,
    /// User blocks covered by header + stored bytes.
    pub footprint_blocks:  usize,
    pub unreadable_blocks: Vec<u8>,
    /// User blocks past the footprint holding non-zero bytes.
    pub residue_blocks:    Vec<u8>,
    /// BLAKE3 of the 752 user-area bytes (unreadable blocks count as zeros).
    pub digest:            String,
    pub health:            CardHealth,
}

impl InspectionReport {
    pub fn summary(&self) -> String {
        let header = match &self.header {
            HeaderVerdict::Empty { record_type } => format!("empty ({record_type})"),
            HeaderVerdict::Valid { record_type, stored_len } => format!("{record_type}, {stored_len} bytes"),
            HeaderVerdict::Invalid { fault, .. } => format!("invalid: {fault}"),
            HeaderVerdict::Interrupted { record_type, .. } => format!("interrupted write of {record_type}"),
            HeaderVerdict::Unreadable => "unreadable".to_string(),
        };
        format!(
            "{:?}: card {} holds {}; {} residue block(s), {} unreadable block(s)",
            self.health,
            self.uid,
            header,
            self.residue_blocks.len(),
            self.unreadable_blocks.len(),
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
