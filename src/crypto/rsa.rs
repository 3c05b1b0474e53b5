//! RSA keypair management and OAEP key transport.
//!
//! Keys persist as PEM. The private key uses a PKCS#1 body under the
//! `RSA PRIVATE KEY` label with owner-only file permissions. The public key
//! carries a PKIX (SubjectPublicKeyInfo) body under the `RSA PUBLIC KEY`
//! label: the reference client parses that label but decodes the body as
//! PKIX, so the mismatch is load-bearing and must be preserved.

use super::CryptoError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::io::Write;
use std::path::Path;

/// An RSA keypair.
pub struct RsaKeyPair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh keypair. Only 2048- and 4096-bit keys are accepted.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        if bits != 2048 && bits != 4096 {
            return Err(CryptoError::BadAlgorithm(format!(
                "RSA key size must be 2048 or 4096, got {bits}"
            )));
        }

        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
            .map_err(|e| CryptoError::Rsa(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Load the keypair from a PKCS#1 PEM private key file. The public half
    /// is derived from the private key.
    pub fn load<P: AsRef<Path>>(private_path: P) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(private_path)?;
        let private = RsaPrivateKey::from_pkcs1_pem(&pem)
            .map_err(|e| CryptoError::BadEncoding(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Persist both halves. The private key file is created with permissions
    /// that exclude group/other access.
    pub fn save<P: AsRef<Path>>(&self, private_path: P, public_path: P) -> Result<(), CryptoError> {
        let private_pem = self
            .private
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| CryptoError::Rsa(e.to_string()))?;

        if let Some(parent) = private_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        write_private(private_path.as_ref(), private_pem.as_bytes())?;
        std::fs::write(public_path, self.public_key_pem()?)?;
        Ok(())
    }

    /// The public key as PEM: PKIX DER body under the `RSA PUBLIC KEY` label.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        let der = self
            .public
            .to_public_key_der()
            .map_err(|e| CryptoError::Rsa(e.to_string()))?;
        Ok(pem_wrap("RSA PUBLIC KEY", der.as_bytes()))
    }
}

#[cfg(unix)]
fn write_private(path: &Path, pem: &[u8]) -> Result<(), CryptoError> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(pem)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, pem: &[u8]) -> Result<(), CryptoError> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(pem)?;
    Ok(())
}

/// Parse a PEM public key with a PKIX body, whatever the block label says.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    let der = pem_unwrap(pem)?;
    public_key_from_der(&der)
}

/// Parse a PKIX (SubjectPublicKeyInfo) DER public key.
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| CryptoError::BadEncoding(e.to_string()))
}

/// Encrypt with RSA-OAEP (SHA-256, empty label).
pub fn encrypt_oaep(public: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    public
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Decrypt with RSA-OAEP (SHA-256, empty label).
pub fn decrypt_oaep(private: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    private
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::DecryptFailure)
}

/// Wrap DER bytes in a PEM block with the given label, 64-column body.
fn pem_wrap(label: &str, der: &[u8]) -> String {
    let body = BASE64.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in body.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

/// Extract and decode the base64 body of the first PEM block.
fn pem_unwrap(pem: &str) -> Result<Vec<u8>, CryptoError> {
    let mut body = String::new();
    let mut in_block = false;
    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN ") {
            in_block = true;
        } else if line.starts_with("-----END ") {
            break;
        } else if in_block {
            body.push_str(line);
        }
    }
    if body.is_empty() {
        return Err(CryptoError::BadEncoding("no PEM block found".into()));
    }
    BASE64
        .decode(body)
        .map_err(|e| CryptoError::BadEncoding(e.to_string()))
}
