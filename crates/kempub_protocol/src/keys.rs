//! Kyber768 key material
//!
//! Thin wrappers around the kyber768 KEM types together with their PEM
//! representation. The PEM tags are part of the external interface: the
//! public block is sent verbatim inside CONNECT_ACK.

use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};

use crate::error::ProtocolError;

pub const PUBLIC_KEY_TAG: &str = "KYBER768 PUBLIC KEY";
pub const PRIVATE_KEY_TAG: &str = "KYBER768 PRIVATE KEY";

/// Length of the symmetric session key derived from a KEM shared secret.
pub const SESSION_KEY_LENGTH: usize = 32;

#[derive(Clone)]
pub struct KyberPublicKey(kyber768::PublicKey);

#[derive(Clone)]
pub struct KyberPrivateKey(kyber768::SecretKey);

/// Generate a fresh Kyber768 key pair.
pub fn generate_key_pair() -> (KyberPublicKey, KyberPrivateKey) {
    let (pk, sk) = kyber768::keypair();
    (KyberPublicKey(pk), KyberPrivateKey(sk))
}

/// Encapsulate against `public`: returns the derived 32-byte session key
/// and the KEM ciphertext to transmit.
pub fn encapsulate(public: &KyberPublicKey) -> ([u8; SESSION_KEY_LENGTH], Vec<u8>) {
    let (shared, ct) = kyber768::encapsulate(&public.0);
    let mut key = [0u8; SESSION_KEY_LENGTH];
    key.copy_from_slice(&shared.as_bytes()[..SESSION_KEY_LENGTH]);
    (key, ct.as_bytes().to_vec())
}

/// Decapsulate `ciphertext` with `private`, recovering the session key.
///
/// Kyber uses implicit rejection, so a tampered ciphertext yields a garbage
/// key here and the subsequent AEAD open fails.
pub fn decapsulate(
    private: &KyberPrivateKey,
    ciphertext: &[u8],
) -> Result<[u8; SESSION_KEY_LENGTH], ProtocolError> {
    let ct = kyber768::Ciphertext::from_bytes(ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailed)?;
    let shared = kyber768::decapsulate(&ct, &private.0);
    let mut key = [0u8; SESSION_KEY_LENGTH];
    key.copy_from_slice(&shared.as_bytes()[..SESSION_KEY_LENGTH]);
    Ok(key)
}

/// Byte length of a kyber768 KEM ciphertext on the wire.
pub fn kem_ciphertext_length() -> usize {
    kyber768::ciphertext_bytes()
}

impl KyberPublicKey {
    pub fn from_pem(data: &[u8]) -> Result<Self, ProtocolError> {
        let block = parse_pem(data, PUBLIC_KEY_TAG)?;
        let key = kyber768::PublicKey::from_bytes(block.contents())
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PUBLIC_KEY_TAG, self.0.as_bytes().to_vec()))
    }

    pub fn load(path: &str) -> Result<Self, ProtocolError> {
        let data = std::fs::read(path)?;
        Self::from_pem(&data)
    }

    pub fn save(&self, path: &str) -> Result<(), ProtocolError> {
        std::fs::write(path, self.to_pem())?;
        Ok(())
    }
}

impl KyberPrivateKey {
    pub fn from_pem(data: &[u8]) -> Result<Self, ProtocolError> {
        let block = parse_pem(data, PRIVATE_KEY_TAG)?;
        let key = kyber768::SecretKey::from_bytes(block.contents())
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(PRIVATE_KEY_TAG, self.0.as_bytes().to_vec()))
    }

    pub fn load(path: &str) -> Result<Self, ProtocolError> {
        let data = std::fs::read(path)?;
        Self::from_pem(&data)
    }

    /// Write the private PEM with owner-only permissions.
    pub fn save(&self, path: &str) -> Result<(), ProtocolError> {
        std::fs::write(path, self.to_pem())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for KyberPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KyberPublicKey").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for KyberPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KyberPrivateKey").finish_non_exhaustive()
    }
}

fn parse_pem(data: &[u8], expected_tag: &str) -> Result<pem::Pem, ProtocolError> {
    let block = pem::parse(data).map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    if block.tag() != expected_tag {
        return Err(ProtocolError::InvalidKey(format!(
            "expected PEM tag '{}', got '{}'",
            expected_tag,
            block.tag()
        )));
    }
    Ok(block)
}
