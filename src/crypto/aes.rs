//! AES bulk encryption: GCM and CBC/PKCS#7.
//!
//! Wire layouts: GCM is `nonce(12) || ciphertext+tag`, CBC is
//! `iv(16) || ciphertext`. Associated data is always empty.

use super::CryptoError;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AesGcm, Nonce};
use rand::RngCore;

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

const GCM_NONCE_LEN: usize = 12;
const CBC_IV_LEN: usize = 16;

/// Generate a random AES key of the given size in bits (128, 192, or 256).
pub fn generate_key(bits: usize) -> Result<Vec<u8>, CryptoError> {
    if bits != 128 && bits != 192 && bits != 256 {
        return Err(CryptoError::BadAlgorithm(format!(
            "AES key size must be 128, 192, or 256 bits, got {bits}"
        )));
    }
    let mut key = vec![0u8; bits / 8];
    rand::rngs::OsRng.fill_bytes(&mut key);
    Ok(key)
}

fn check_key_len(key: &[u8]) -> Result<(), CryptoError> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(CryptoError::BadAlgorithm(format!(
            "AES key must be 16, 24, or 32 bytes, got {n}"
        ))),
    }
}

/// Encrypt with AES-GCM; the nonce is prepended to the sealed output.
pub fn encrypt_gcm(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_key_len(key)?;

    let mut nonce_bytes = [0u8; GCM_NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .expect("length checked")
            .encrypt(nonce, plaintext),
        24 => Aes192Gcm::new_from_slice(key)
            .expect("length checked")
            .encrypt(nonce, plaintext),
        _ => Aes256Gcm::new_from_slice(key)
            .expect("length checked")
            .encrypt(nonce, plaintext),
    }
    .map_err(|_| CryptoError::DecryptFailure)?;

    let mut out = Vec::with_capacity(GCM_NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt AES-GCM output produced by [`encrypt_gcm`].
pub fn decrypt_gcm(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_key_len(key)?;
    if data.len() < GCM_NONCE_LEN {
        return Err(CryptoError::DecryptFailure);
    }

    let (nonce_bytes, sealed) = data.split_at(GCM_NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .expect("length checked")
            .decrypt(nonce, sealed),
        24 => Aes192Gcm::new_from_slice(key)
            .expect("length checked")
            .decrypt(nonce, sealed),
        _ => Aes256Gcm::new_from_slice(key)
            .expect("length checked")
            .decrypt(nonce, sealed),
    }
    .map_err(|_| CryptoError::DecryptFailure)
}

/// Encrypt with AES-CBC and PKCS#7 padding; the IV is prepended.
pub fn encrypt_cbc(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_key_len(key)?;

    let mut iv = [0u8; CBC_IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, &iv)
            .expect("lengths checked")
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, &iv)
            .expect("lengths checked")
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(key, &iv)
            .expect("lengths checked")
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    let mut out = Vec::with_capacity(CBC_IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt AES-CBC output produced by [`encrypt_cbc`].
pub fn decrypt_cbc(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_key_len(key)?;
    if data.len() < CBC_IV_LEN || (data.len() - CBC_IV_LEN) % CBC_IV_LEN != 0 {
        return Err(CryptoError::DecryptFailure);
    }

    let (iv, ciphertext) = data.split_at(CBC_IV_LEN);

    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .expect("lengths checked")
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .expect("lengths checked")
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .expect("lengths checked")
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    }
    .map_err(|_| CryptoError::DecryptFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_sizes() {
        assert_eq!(generate_key(128).unwrap().len(), 16);
        assert_eq!(generate_key(192).unwrap().len(), 24);
        assert_eq!(generate_key(256).unwrap().len(), 32);
        assert!(matches!(
            generate_key(512),
            Err(CryptoError::BadAlgorithm(_))
        ));
    }

    #[test]
    fn gcm_roundtrip() {
        let key = generate_key(256).unwrap();
        let sealed = encrypt_gcm(&key, b"attack at dawn").unwrap();
        assert_eq!(decrypt_gcm(&key, &sealed).unwrap(), b"attack at dawn");
    }

    #[test]
    fn gcm_detects_tampering() {
        let key = generate_key(256).unwrap();
        let mut sealed = encrypt_gcm(&key, b"attack at dawn").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            decrypt_gcm(&key, &sealed),
            Err(CryptoError::DecryptFailure)
        ));
    }

    #[test]
    fn gcm_rejects_short_input() {
        let key = generate_key(256).unwrap();
        assert!(decrypt_gcm(&key, &[0u8; 4]).is_err());
    }

    #[test]
    fn cbc_roundtrip() {
        let key = generate_key(256).unwrap();
        // Exercise both a block-aligned and a ragged plaintext.
        for msg in [&b"0123456789abcdef"[..], &b"short"[..]] {
            let sealed = encrypt_cbc(&key, msg).unwrap();
            assert_eq!(decrypt_cbc(&key, &sealed).unwrap(), msg);
        }
    }

    #[test]
    fn cbc_wrong_key_fails_padding() {
        let key = generate_key(256).unwrap();
        let other = generate_key(256).unwrap();
        let sealed = encrypt_cbc(&key, b"attack at dawn").unwrap();
        // Overwhelmingly likely to produce invalid padding under the wrong key.
        assert!(decrypt_cbc(&other, &sealed).is_err());
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(matches!(
            encrypt_gcm(&[0u8; 15], b"x"),
            Err(CryptoError::BadAlgorithm(_))
        ));
        assert!(matches!(
            encrypt_cbc(&[0u8; 31], b"x"),
            Err(CryptoError::BadAlgorithm(_))
        ));
    }
}
