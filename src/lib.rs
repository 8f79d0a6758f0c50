pub mod geometry;
pub mod layout;
pub mod header;
pub mod error;
pub mod auth;
pub mod transport;
pub mod codec;
pub mod crypto;
pub mod recovery;
pub mod config;
pub mod vault;

pub use geometry::{CardInfo, PiccType};
pub use header::{RecordHeader, RecordType, MAX_PAYLOAD};
pub use error::CardError;
pub use transport::{CardSession, MemoryCard, MifareClassic, PiccError};
pub use codec::{Payload, RecordCodec, SealedRecords};
pub use crypto::{KeyProvider, PassphraseKey, StaticKey};
pub use recovery::{CardHealth, InspectionReport};
pub use config::CardConfig;
pub use vault::{PasswordCard, Protection};
