//! Reader configuration, stored as JSON.
//!
//! ```json
//! {
//!   "key_a": "ffffffffffff",
//!   "cipher": { "static": { "key": "4b1f930ea752c83d61f02a9c75e418b6" } },
//!   "staged_commit": false,
//!   "read_delay_ms": 10,
//!   "write_delay_ms": 20
//! }
//! ```
//!
//! Every field is optional; missing fields take the defaults of
//! [`CardConfig::default`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::codec::RecordCodec;
use crate::crypto::{derive_key, CipherKey, CryptoError, KeyProvider, DEFAULT_CIPHER_KEY};
use crate::transport::{KeyA, DEFAULT_KEY_A};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where the record cipher key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherKeySource {
    /// Compiled-in or configured 16-byte key.
    Static {
        #[serde(with = "hex_array")]
        key: CipherKey,
    },
    /// Argon2id over a passphrase; `salt` is at least 8 bytes of text.
    Passphrase { passphrase: String, salt: String },
}

impl Default for CipherKeySource {
    fn default() -> Self {
        CipherKeySource::Static { key: DEFAULT_CIPHER_KEY }
    }
}

impl KeyProvider for CipherKeySource {
    fn cipher_key(&self) -> Result<Zeroizing<CipherKey>, CryptoError> {
        match self {
            CipherKeySource::Static { key } => Ok(Zeroizing::new(*key)),
            CipherKeySource::Passphrase { passphrase, salt } => {
                derive_key(passphrase, salt.as_bytes()).map(Zeroizing::new)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    #[serde(with = "hex_array")]
    pub key_a:          KeyA,
    pub cipher:         CipherKeySource,
    pub staged_commit:  bool,
    pub read_delay_ms:  u64,
    pub write_delay_ms: u64,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            key_a:          DEFAULT_KEY_A,
            cipher:         CipherKeySource::default(),
            staged_commit:  false,
            read_delay_ms:  0,
            write_delay_ms: 0,
        }
    }
}

impl CardConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None    => Ok(Self::default()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }

    pub fn codec(&self) -> RecordCodec {
        RecordCodec::with_staged_commit(self.staged_commit)
    }
}

/// Fixed-size byte arrays as lowercase hex strings.
mod hex_array {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim()).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected {N} bytes, got {}", v.len())))
    }
}
