//! High-level [`PasswordCard`] API, the surface the menu logic talks to.
//!
//! ```
//! use cardvault::transport::MemoryCard;
//! use cardvault::vault::{PasswordCard, Protection};
//! use cardvault::CardConfig;
//!
//! let mut card = MemoryCard::default();
//! let config = CardConfig::default();
//!
//! let mut vault = PasswordCard::open(&mut card, &config)?;
//! vault.store_password(b"Pwd_AB3x9Z", Protection::Encrypted)?;
//! let secret = vault.load_password()?.expect("record present");
//! assert_eq!(secret.as_str(), Some("Pwd_AB3x9Z"));
//! vault.finish();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Every operation ends with the crypto session torn down, whether it
//! succeeded or not.  [`PasswordCard::finish`] halts the card.

use log::info;

use crate::codec::{Payload, SealedRecords};
use crate::config::{CardConfig, CipherKeySource};
use crate::crypto::KeyProvider;
use crate::error::CardError;
use crate::geometry::CardInfo;
use crate::header::RecordType;
use crate::layout::CAPACITY_BYTES;
use crate::recovery::{self, InspectionReport};
use crate::transport::{CardSession, MifareClassic};

/// How a password is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Plain,
    Encrypted,
}

impl Protection {
    pub fn record_type(self) -> RecordType {
        match self {
            Protection::Plain     => RecordType::PLAINTEXT,
            Protection::Encrypted => RecordType::ENCRYPTED,
        }
    }
}

pub struct PasswordCard<C: MifareClassic, K: KeyProvider = CipherKeySource> {
    session: CardSession<C>,
    records: SealedRecords<K>,
}

impl<C: MifareClassic> PasswordCard<C, CipherKeySource> {
    /// Select the card and set it up from `config`.
    pub fn open(card: C, config: &CardConfig) -> Result<Self, CardError> {
        Self::with_keys(card, config, config.cipher.clone())
    }
}

impl<C: MifareClassic, K: KeyProvider> PasswordCard<C, K> {
    /// Like [`PasswordCard::open`] with a custom key provider.
    pub fn with_keys(card: C, config: &CardConfig, keys: K) -> Result<Self, CardError> {
        let session = CardSession::open(card, config.key_a)?
            .with_delays(config.read_delay(), config.write_delay());
        info!("Card {} ready", session.info().uid_hex());
        Ok(Self { session, records: SealedRecords::new(config.codec(), keys) })
    }

    pub fn info(&self) -> &CardInfo {
        self.session.info()
    }

    pub fn capacity(&self) -> usize {
        CAPACITY_BYTES
    }

    pub fn store_password(&mut self, secret: &[u8], protection: Protection) -> Result<(), CardError> {
        let result = match protection {
            Protection::Encrypted => self.records.write_encrypted(&mut self.session, secret),
            Protection::Plain     => self.records.write_raw(&mut self.session, RecordType::PLAINTEXT, secret),
        };
        self.session.release();
        result
    }

    /// Store an application-defined record untouched.  [`RecordType::ENCRYPTED`]
    /// is never stored raw; its payload is encrypted like [`Protection::Encrypted`].
    pub fn store_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<(), CardError> {
        if record_type.is_encrypted() {
            return self.store_password(payload, Protection::Encrypted);
        }
        let result = self.records.write_raw(&mut self.session, record_type, payload);
        self.session.release();
        result
    }

    /// The stored record, decrypted; `None` when the card holds an empty record.
    pub fn load_password(&mut self) -> Result<Option<Payload>, CardError> {
        let result = self.records.read(&mut self.session);
        self.session.release();
        Ok(Some(result?).filter(|p| !p.is_empty()))
    }

    /// Replace whatever is stored with an empty `none` record.
    pub fn erase(&mut self) -> Result<(), CardError> {
        self.store_record(RecordType::NONE, &[])
    }

    pub fn dump_user_area(&mut self) -> Result<Vec<u8>, CardError> {
        recovery::dump_user_area(&mut self.session)
    }

    pub fn inspect(&mut self) -> InspectionReport {
        recovery::inspect(&mut self.session, self.records.codec().is_staged())
    }

    pub fn handshakes(&self) -> u32 {
        self.session.handshakes()
    }

    /// Halt the card and give the reader back.
    pub fn finish(self) -> C {
        self.session.close()
    }
}
