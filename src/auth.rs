//! Sector authentication cache.
//!
//! Each Key A handshake is a multi-round-trip exchange with the card, so the
//! authenticator remembers the last sector it opened and skips the handshake
//! while consecutive blocks stay inside that sector.

use log::{trace, warn};

use crate::error::CardError;
use crate::geometry::{sector_of, trailer_of};
use crate::transport::{KeyA, MifareClassic};

#[derive(Debug, Default)]
pub struct SectorAuthenticator {
    current:    Option<u8>,
    handshakes: u32,
}

impl SectorAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure the sector owning `block` is authenticated with `key`.
    ///
    /// On failure the cache is left as it was and the card stays selected;
    /// tearing the crypto session down is the caller's decision.
    pub fn ensure_sector<C>(&mut self, card: &mut C, block: u8, key: &KeyA, uid: &[u8]) -> Result<(), CardError>
    where
        C: MifareClassic + ?Sized,
    {
        let sector = sector_of(block);
        if self.current == Some(sector) {
            return Ok(());
        }

        let trailer = trailer_of(sector);
        trace!("Authenticating sector {sector} via trailer block {trailer}");
        self.handshakes += 1;
        match card.authenticate_key_a(trailer, key, uid) {
            Ok(()) => {
                self.current = Some(sector);
                Ok(())
            }
            Err(source) => {
                warn!("Auth error (block {block}, sector {sector}): {source}");
                Err(CardError::Auth { sector, block, source })
            }
        }
    }

    /// Sector the card currently holds a crypto session for.
    pub fn current(&self) -> Option<u8> {
        self.current
    }

    /// Forget the cached sector; required whenever the card's crypto state is reset.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    /// Handshakes attempted since construction.
    pub fn handshakes(&self) -> u32 {
        self.handshakes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryCard, PiccError, DEFAULT_KEY_A};

    #[test]
    fn skips_handshake_inside_cached_sector() {
        let mut card = MemoryCard::default();
        let uid = card.select().unwrap().uid;
        let mut auth = SectorAuthenticator::new();

        for block in [4, 5, 6] {
            auth.ensure_sector(&mut card, block, &DEFAULT_KEY_A, &uid).unwrap();
        }
        assert_eq!(auth.current(), Some(1));
        assert_eq!(auth.handshakes(), 1);
        assert_eq!(card.auth_count(), 1);
    }

    #[test]
    fn rejected_handshake_keeps_cache() {
        let mut card = MemoryCard::default();
        let uid = card.select().unwrap().uid;
        card.faults_mut().reject_auth_sector = Some(2);
        let mut auth = SectorAuthenticator::new();

        auth.ensure_sector(&mut card, 1, &DEFAULT_KEY_A, &uid).unwrap();
        let err = auth.ensure_sector(&mut card, 8, &DEFAULT_KEY_A, &uid).unwrap_err();
        assert!(matches!(err, CardError::Auth { sector: 2, block: 8, source: PiccError::AuthRejected }));
        assert_eq!(auth.current(), Some(0));
        assert_eq!(auth.handshakes(), 2);
        assert!(card.is_selected());
    }
}
