//! Transparent message-body encryption for secure chats.
//!
//! The adapter is keyed by the chat's string identity (`aad`): a per-chat key
//! is derived from the master key with a BLAKE3 KDF so that ciphertext from
//! one chat never decrypts under another chat's identity.  Ciphertext framing
//! is `nonce || ciphertext` with a 24-byte XChaCha20 nonce.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{KDF_CONTEXT_CHAT_KEY, NONCE_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

/// Pluggable encrypt/decrypt of message bodies, consulted only for chats
/// marked secure.  `aad` is the chat's string identifier.
pub trait CryptoAdapter: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError>;
}

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// BLAKE3 KDF with domain separation
fn derive_chat_key(master: &SymmetricKey, aad: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_CHAT_KEY);
    hasher.update(master);
    hasher.update(aad.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Default adapter: XChaCha20-Poly1305 under a per-chat derived key.
pub struct ChaChaAdapter {
    master: SymmetricKey,
}

impl ChaChaAdapter {
    pub fn new(master: SymmetricKey) -> Self {
        Self { master }
    }
}

impl CryptoAdapter for ChaChaAdapter {
    fn encrypt(&self, plaintext: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError> {
        let key = derive_chat_key(&self.master, aad);
        let cipher = XChaCha20Poly1305::new(&key.into());
        let nonce_bytes = generate_nonce();
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    fn decrypt(&self, data: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let key = derive_chat_key(&self.master, aad);
        let cipher = XChaCha20Poly1305::new(&key.into());
        let nonce = XNonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
