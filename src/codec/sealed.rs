//! Encryption layer over [`RecordCodec`].
//!
//! Encrypted secrets are padded with a terminator, AES-128 encrypted and
//! stored as [`RecordType::ENCRYPTED`]; everything else passes through as is.

use log::{debug, warn};
use zeroize::Zeroizing;

use super::RecordCodec;
use crate::crypto::{self, padded_len, KeyProvider};
use crate::error::CardError;
use crate::header::{RecordType, MAX_PAYLOAD};
use crate::transport::{CardSession, MifareClassic};

/// A record as the application sees it: decrypted when it was encrypted.
pub struct Payload {
    pub record_type: RecordType,
    data:            Zeroizing<Vec<u8>>,
}

impl Payload {
    pub fn new(record_type: RecordType, data: Vec<u8>) -> Self {
        Self { record_type, data: Zeroizing::new(data) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("record_type", &self.record_type)
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

pub struct SealedRecords<K: KeyProvider> {
    codec: RecordCodec,
    keys:  K,
}

impl<K: KeyProvider> SealedRecords<K> {
    pub fn new(codec: RecordCodec, keys: K) -> Self {
        Self { codec, keys }
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Encrypt `plaintext` and store it as an encrypted record.
    pub fn write_encrypted<C: MifareClassic>(
        &self,
        session:   &mut CardSession<C>,
        plaintext: &[u8],
    ) -> Result<(), CardError> {
        let padded = padded_len(plaintext.len());
        if padded > MAX_PAYLOAD {
            session.release();
            return Err(CardError::PayloadTooLarge { len: padded, max: MAX_PAYLOAD });
        }
        let ciphertext = self
            .keys
            .cipher_key()
            .and_then(|key| crypto::seal(&key, plaintext))
            .inspect_err(|_| session.release())?;
        debug!("Sealed {} plaintext bytes into {} ciphertext bytes", plaintext.len(), ciphertext.len());
        self.codec.write(session, RecordType::ENCRYPTED, &ciphertext)
    }

    /// Store `payload` unchanged under `record_type`.
    pub fn write_raw<C: MifareClassic>(
        &self,
        session:     &mut CardSession<C>,
        record_type: RecordType,
        payload:     &[u8],
    ) -> Result<(), CardError> {
        self.codec.write(session, record_type, payload)
    }

    /// Read the record, decrypting it when its type says so.
    pub fn read<C: MifareClassic>(&self, session: &mut CardSession<C>) -> Result<Payload, CardError> {
        let (record_type, stored) = self.codec.read_to_vec(session)?;
        let stored = Zeroizing::new(stored);
        if !record_type.is_encrypted() || stored.is_empty() {
            return Ok(Payload::new(record_type, stored.to_vec()));
        }

        let plaintext = self
            .keys
            .cipher_key()
            .and_then(|key| crypto::open(&key, &stored))
            .inspect_err(|e| {
                warn!("Decryption failed: {e}");
                session.release();
            })?;
        debug!("Decrypted {} bytes, plaintext length {}", stored.len(), plaintext.len());
        Ok(Payload { record_type, data: plaintext })
    }
}
