//! AES-128 record encryption and cipher key providers.
//!
//! Padding:    plaintext || 0x00 terminator || 0x00.. up to a 16-byte multiple
//! Encryption: AES-128, each 16-byte block independently, in place
//! Recovery:   plaintext length = offset of the first 0x00 after decryption
//!
//! Because the terminator doubles as the length field, encrypted payloads
//! cannot contain a zero byte.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Cipher block size.
pub const CIPHER_BLOCK: usize = 16;
/// AES-128 key length.
pub const CIPHER_KEY_LEN: usize = 16;
/// Marks the end of the plaintext inside a decrypted record.
pub const TERMINATOR: u8 = 0x00;

pub type CipherKey = [u8; CIPHER_KEY_LEN];

/// Compiled-in key shared by every card written with the default configuration.
pub const DEFAULT_CIPHER_KEY: CipherKey = [
    0x4b, 0x1f, 0x93, 0x0e, 0xa7, 0x52, 0xc8, 0x3d,
    0x61, 0xf0, 0x2a, 0x9c, 0x75, 0xe4, 0x18, 0xb6,
];

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Buffer of {0} bytes is not a multiple of the {CIPHER_BLOCK}-byte cipher block")]
    Misaligned(usize),
    #[error("Plaintext contains a zero byte at offset {0}; it would be read back truncated")]
    EmbeddedTerminator(usize),
}

// ── Key providers ────────────────────────────────────────────────────────────

/// Source of the record cipher key.
pub trait KeyProvider {
    fn cipher_key(&self) -> Result<Zeroizing<CipherKey>, CryptoError>;
}

impl<K: KeyProvider + ?Sized> KeyProvider for &K {
    fn cipher_key(&self) -> Result<Zeroizing<CipherKey>, CryptoError> {
        (**self).cipher_key()
    }
}

impl<K: KeyProvider + ?Sized> KeyProvider for Box<K> {
    fn cipher_key(&self) -> Result<Zeroizing<CipherKey>, CryptoError> {
        (**self).cipher_key()
    }
}

/// A fixed key held in memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StaticKey(CipherKey);

impl StaticKey {
    pub fn new(key: CipherKey) -> Self {
        Self(key)
    }
}

impl Default for StaticKey {
    fn default() -> Self {
        Self(DEFAULT_CIPHER_KEY)
    }
}

impl KeyProvider for StaticKey {
    fn cipher_key(&self) -> Result<Zeroizing<CipherKey>, CryptoError> {
        Ok(Zeroizing::new(self.0))
    }
}

/// A key stretched from a passphrase with Argon2id on every request.
pub struct PassphraseKey {
    passphrase: Zeroizing<String>,
    salt:       Vec<u8>,
}

impl PassphraseKey {
    pub fn new(passphrase: impl Into<String>, salt: impl Into<Vec<u8>>) -> Self {
        Self { passphrase: Zeroizing::new(passphrase.into()), salt: salt.into() }
    }
}

impl KeyProvider for PassphraseKey {
    fn cipher_key(&self) -> Result<Zeroizing<CipherKey>, CryptoError> {
        derive_key(&self.passphrase, &self.salt).map(Zeroizing::new)
    }
}

/// Derive a 128-bit cipher key from a passphrase and a salt using Argon2id.
///
/// `salt` must be at least 8 bytes.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<CipherKey, CryptoError> {
    let params = Params::new(19 * 1024, 2, 1, Some(CIPHER_KEY_LEN))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; CIPHER_KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

// ── Padding ──────────────────────────────────────────────────────────────────

/// Ciphertext length for a plaintext of `len` bytes (terminator included).
#[inline]
pub const fn padded_len(len: usize) -> usize {
    (len + 1).div_ceil(CIPHER_BLOCK) * CIPHER_BLOCK
}

/// Offset of the first terminator, or the whole buffer when there is none.
pub fn terminated_len(buf: &[u8]) -> usize {
    buf.iter().position(|&b| b == TERMINATOR).unwrap_or(buf.len())
}

/// Copy `plaintext` into a zeroed buffer of [`padded_len`] bytes.
pub fn pad(plaintext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if let Some(pos) = plaintext.iter().position(|&b| b == TERMINATOR) {
        return Err(CryptoError::EmbeddedTerminator(pos));
    }
    let mut buf = Zeroizing::new(vec![0u8; padded_len(plaintext.len())]);
    buf[..plaintext.len()].copy_from_slice(plaintext);
    Ok(buf)
}

// ── Block cipher ─────────────────────────────────────────────────────────────

pub fn encrypt_in_place(key: &CipherKey, buf: &mut [u8]) -> Result<(), CryptoError> {
    if buf.len() % CIPHER_BLOCK != 0 {
        return Err(CryptoError::Misaligned(buf.len()));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for chunk in buf.chunks_exact_mut(CIPHER_BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

pub fn decrypt_in_place(key: &CipherKey, buf: &mut [u8]) -> Result<(), CryptoError> {
    if buf.len() % CIPHER_BLOCK != 0 {
        return Err(CryptoError::Misaligned(buf.len()));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for chunk in buf.chunks_exact_mut(CIPHER_BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

/// Pad and encrypt `plaintext`.  The result is always a non-empty multiple of 16.
pub fn seal(key: &CipherKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut buf = pad(plaintext)?;
    encrypt_in_place(key, &mut buf)?;
    Ok(std::mem::take(&mut *buf))
}

/// Decrypt `ciphertext` and cut it at the terminator.
pub fn open(key: &CipherKey, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut buf = Zeroizing::new(ciphertext.to_vec());
    decrypt_in_place(key, &mut buf)?;
    let len = terminated_len(&buf);
    buf.truncate(len);
    Ok(buf)
}
