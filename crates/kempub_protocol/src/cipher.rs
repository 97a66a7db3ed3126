//! Connection cipher stages
//!
//! Every connection moves through three cipher stages: pass-through for
//! CONNECT/CONNECT_ACK, a KEM-based handshake cipher for the AUTHENTICATE
//! and SESSION_KEY exchange, and a symmetric session cipher for bulk
//! traffic. All three share one trait so the codec stays cipher-agnostic.

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;

use crate::error::ProtocolError;
use crate::keys::{self, KyberPrivateKey, KyberPublicKey, SESSION_KEY_LENGTH};

const NONCE_LENGTH: usize = 12;

pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// Identity cipher for the CONNECT phase.
pub struct PlainCipher;

impl Cipher for PlainCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(ciphertext.to_vec())
    }
}

/// Handshake cipher backed by the KEM.
///
/// Each encrypt performs a fresh encapsulation against the peer's public
/// key and seals the plaintext under the resulting shared secret, producing
/// `[kem_ct][nonce][aead_ct]`. Decrypt decapsulates with the holder's
/// private key. Deliberately expensive; used for four handshake frames per
/// connection and then discarded.
pub struct KemCipher {
    private: KyberPrivateKey,
    peer_public: Option<KyberPublicKey>,
}

impl KemCipher {
    /// A cipher that can only decrypt (the peer's key is not yet known).
    pub fn new(private: KyberPrivateKey) -> Self {
        Self {
            private,
            peer_public: None,
        }
    }

    /// A cipher bound to a peer, able to encrypt toward it.
    pub fn with_peer(private: KyberPrivateKey, peer_public: KyberPublicKey) -> Self {
        Self {
            private,
            peer_public: Some(peer_public),
        }
    }
}

impl Cipher for KemCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let peer = self
            .peer_public
            .as_ref()
            .ok_or(ProtocolError::EncryptionFailed)?;
        let (key, kem_ct) = keys::encapsulate(peer);
        let sealed = seal(&key, plaintext, &[])?;
        let mut out = kem_ct;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let kem_len = keys::kem_ciphertext_length();
        if ciphertext.len() < kem_len {
            return Err(ProtocolError::DecryptionFailed);
        }
        let (kem_ct, sealed) = ciphertext.split_at(kem_len);
        let key = keys::decapsulate(&self.private, kem_ct)?;
        open(&key, sealed, &[])
    }
}

/// Symmetric session cipher: ChaCha20-Poly1305 under a KEM-derived key,
/// 12-byte random nonce prepended to the ciphertext.
///
/// While `enabled` is false both directions pass bytes through unchanged,
/// so one object can be held across the handshake-to-session transition.
pub struct SessionCipher {
    key: [u8; SESSION_KEY_LENGTH],
    enabled: bool,
}

impl SessionCipher {
    pub fn new(key: [u8; SESSION_KEY_LENGTH]) -> Self {
        Self { key, enabled: true }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Encrypt with associated data that is authenticated but not encrypted.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if !self.enabled {
            return Ok(plaintext.to_vec());
        }
        seal(&self.key, plaintext, aad)
    }

    /// Decrypt a frame produced by [`Self::encrypt_with_aad`]. Fails when
    /// the associated data does not match.
    pub fn decrypt_with_aad(
        &self,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        if !self.enabled {
            return Ok(ciphertext.to_vec());
        }
        open(&self.key, ciphertext, aad)
    }
}

impl Cipher for SessionCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.encrypt_with_aad(plaintext, &[])
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        self.decrypt_with_aad(ciphertext, &[])
    }
}

fn seal(
    key: &[u8; SESSION_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key));

    let mut nonce = [0u8; NONCE_LENGTH];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            GenericArray::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| ProtocolError::EncryptionFailed)?;

    // Prepend nonce to ciphertext
    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(
    key: &[u8; SESSION_KEY_LENGTH],
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if data.len() < NONCE_LENGTH {
        return Err(ProtocolError::DecryptionFailed);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LENGTH);
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key));

    cipher
        .decrypt(
            GenericArray::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| ProtocolError::DecryptionFailed)
}
