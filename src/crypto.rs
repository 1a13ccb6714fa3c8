//! Tuya wire encryption: AES-128-ECB with PKCS#7 padding, and the
//! well-known key used to decrypt v3.3+ discovery beacons.
//!
//! Only ECB is implemented — the 3.4+ GCM-framed variant is out of scope
//! (see the Non-goals in the specification).

use crate::error::{CoreError, Result};
use aes::Aes128;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use ecb::{Decryptor, Encryptor};
use md5::{Digest, Md5};

/// Password hashed to produce the key that decrypts v3.3+ discovery beacons
/// on port 6667.
const DISCOVERY_PASSWORD_33: &[u8] = b"yGAdlopoPVldABfn";

/// Derive the discovery-beacon decryption key for protocol 3.3: MD5 of a
/// constant ASCII password.
pub fn discovery_key_v33() -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(DISCOVERY_PASSWORD_33);
    hasher.finalize().into()
}

/// Derive the 16-byte AES key for a device from its user-provided local key
/// string. Keys shorter than 16 bytes are zero-padded on the right; this is
/// the "if shorter, truncated to 16" rule read the other way around (the
/// source is truncated *to* 16 bytes of key material, the remainder is
/// implicitly zero).
pub fn device_key(local_key: &[u8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    let n = local_key.len().min(16);
    key[..n].copy_from_slice(&local_key[..n]);
    key
}

/// AES-128-ECB encryption with manual PKCS#7 padding.
pub fn encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let pad_len = 16 - (plaintext.len() % 16);
    let mut out = Vec::with_capacity(plaintext.len() + pad_len);
    out.extend_from_slice(plaintext);
    out.resize(out.len() + pad_len, pad_len as u8);

    let mut encryptor = Encryptor::<Aes128>::new(key.into());
    for chunk in out.chunks_mut(16) {
        let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
        encryptor.encrypt_block_mut(block);
    }
    out
}

/// AES-128-ECB decryption. Unpadding is lenient per spec: if the trailing
/// byte is in `(0, 16)`, treat it as PKCS#7 padding and strip it; otherwise
/// keep the plaintext as-is. This tolerates devices that occasionally emit
/// non-padded frames — the caller only relies on the result being
/// JSON-parseable, not on the padding being cryptographically verified.
pub fn decrypt(key: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    if !ciphertext.len().is_multiple_of(16) {
        return Err(CoreError::DecryptionFailed);
    }

    let mut decryptor = Decryptor::<Aes128>::new(key.into());
    let mut plaintext = ciphertext.to_vec();
    for chunk in plaintext.chunks_mut(16) {
        let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
        decryptor.decrypt_block_mut(block);
    }

    let pad_len = *plaintext.last().unwrap() as usize;
    if pad_len > 0 && pad_len < 16 && pad_len <= plaintext.len() {
        plaintext.truncate(plaintext.len() - pad_len);
    }
    Ok(plaintext)
}
