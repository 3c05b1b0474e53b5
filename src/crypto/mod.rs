//! Hybrid cryptography: RSA-OAEP key transport + AES bulk encryption.
//!
//! The [`CryptoManager`] is constructed once at startup (loading or
//! generating the server keypair) and shared behind an `Arc`; nothing in the
//! crate reaches for ambient key state.

pub mod aes;
pub mod hashing;
pub mod rsa;

use crate::config::SecurityConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

/// Crypto failures.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unsupported algorithm: {0}")]
    BadAlgorithm(String),

    #[error("decryption failed")]
    DecryptFailure,

    #[error("key file access failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key encoding: {0}")]
    BadEncoding(String),

    #[error("rsa operation failed: {0}")]
    Rsa(String),

    #[error("{0}")]
    WeakPassword(String),
}

/// Selected AES mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesMode {
    Gcm,
    Cbc,
}

impl AesMode {
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        match s {
            "GCM" => Ok(Self::Gcm),
            "CBC" => Ok(Self::Cbc),
            other => Err(CryptoError::BadAlgorithm(format!(
                "unsupported AES mode: {other}"
            ))),
        }
    }
}

/// Owns the server RSA keypair and the configured AES mode.
pub struct CryptoManager {
    key_pair: rsa::RsaKeyPair,
    aes_mode: AesMode,
}

impl CryptoManager {
    pub fn new(key_pair: rsa::RsaKeyPair, aes_mode: AesMode) -> Self {
        Self { key_pair, aes_mode }
    }

    /// Load the keypair from disk, or generate and persist a fresh one when
    /// the private key file is absent.
    pub fn initialize(security: &SecurityConfig) -> Result<Self, CryptoError> {
        let key_pair = if Path::new(&security.rsa_private_key_path).exists() {
            let pair = rsa::RsaKeyPair::load(&security.rsa_private_key_path)?;
            info!(path = %security.rsa_private_key_path, "RSA keypair loaded");
            pair
        } else {
            info!(bits = security.rsa_key_size, "Generating RSA keypair");
            let pair = rsa::RsaKeyPair::generate(security.rsa_key_size)?;
            pair.save(
                &security.rsa_private_key_path,
                &security.rsa_public_key_path,
            )?;
            info!("RSA keypair generated and saved");
            pair
        };

        Ok(Self::new(key_pair, AesMode::parse(&security.aes_mode)?))
    }

    /// The server public key as PEM for the `PUBKEY` greeting line.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.key_pair.public_key_pem()
    }

    /// Generate a fresh AES session key.
    pub fn generate_session_key(&self, bits: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        aes::generate_key(bits).map(Zeroizing::new)
    }

    /// Encrypt a message under the session key; returns base64 for the wire.
    pub fn encrypt_message(&self, session_key: &[u8], message: &str) -> Result<String, CryptoError> {
        let sealed = match self.aes_mode {
            AesMode::Gcm => aes::encrypt_gcm(session_key, message.as_bytes())?,
            AesMode::Cbc => aes::encrypt_cbc(session_key, message.as_bytes())?,
        };
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a base64 wire payload under the session key.
    pub fn decrypt_message(&self, session_key: &[u8], payload: &str) -> Result<String, CryptoError> {
        let data = BASE64
            .decode(payload)
            .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
        let plaintext = match self.aes_mode {
            AesMode::Gcm => aes::decrypt_gcm(session_key, &data)?,
            AesMode::Cbc => aes::decrypt_cbc(session_key, &data)?,
        };
        String::from_utf8(plaintext).map_err(|e| CryptoError::BadEncoding(e.to_string()))
    }

    /// Wrap a session key to a client public key with RSA-OAEP, base64 for
    /// the wire. Used only when `features.encrypt_session_key` is on.
    pub fn wrap_session_key(
        &self,
        client_key: &::rsa::RsaPublicKey,
        session_key: &[u8],
    ) -> Result<String, CryptoError> {
        let wrapped = rsa::encrypt_oaep(client_key, session_key)?;
        Ok(BASE64.encode(wrapped))
    }

    /// Unwrap an RSA-OAEP payload addressed to the server key.
    pub fn unwrap_with_private_key(&self, payload: &str) -> Result<Vec<u8>, CryptoError> {
        let data = BASE64
            .decode(payload)
            .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
        rsa::decrypt_oaep(&self.key_pair.private, &data)
    }
}
