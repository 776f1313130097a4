//! Crypt filter methods: `V2` (RC4), `AESV2` (AES-128-CBC), `AESV3`
//! (AES-256-CBC) and `Identity`. The filter computes its own per-object key
//! where the revision calls for one.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use rand::Rng;

use super::pkcs5::Pkcs5;
use crate::object::ObjectId;
use crate::DecryptionError;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const AES_SALT: [u8; 4] = [0x73, 0x41, 0x6C, 0x54];

/// Derive the object key for R ≤ 4:
/// `MD5(file_key || id[0..3] || gen[0..2] || "sAlT"?)`, truncated to
/// `min(16, file_key_len + 5)`.
pub fn object_key(file_key: &[u8], id: ObjectId, aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(file_key);
    hasher.update(&id.0.to_le_bytes()[..3]);
    hasher.update(&id.1.to_le_bytes()[..2]);
    if aes {
        hasher.update(AES_SALT);
    }
    let digest = hasher.finalize();
    let len = (file_key.len() + 5).min(16);
    digest[..len].to_vec()
}

pub trait CryptFilter {
    /// The `/CFM` name this filter answers to.
    fn method(&self) -> &'static [u8];

    fn decrypt(&self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError>;

    fn encrypt(&self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError>;

    /// Whether encrypted payloads grow by an IV and padding.
    fn is_aes(&self) -> bool {
        false
    }
}

/// No transformation; selecting it turns object decryption off.
pub struct IdentityCryptFilter;

impl CryptFilter for IdentityCryptFilter {
    fn method(&self) -> &'static [u8] {
        b"Identity"
    }

    fn decrypt(&self, _key: &[u8], _id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        Ok(data.to_vec())
    }

    fn encrypt(&self, _key: &[u8], _id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        Ok(data.to_vec())
    }
}

/// RC4 with the per-object key (method `V2`).
pub struct Rc4CryptFilter;

impl CryptFilter for Rc4CryptFilter {
    fn method(&self) -> &'static [u8] {
        b"V2"
    }

    fn decrypt(&self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        Ok(super::rc4::rc4_apply(&object_key(file_key, id, false), data))
    }

    fn encrypt(&self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        self.decrypt(file_key, id, data)
    }
}

/// AES-128-CBC with the per-object key (method `AESV2`). The first 16 bytes
/// of the payload are the IV.
pub struct Aes128CryptFilter;

impl CryptFilter for Aes128CryptFilter {
    fn method(&self) -> &'static [u8] {
        b"AESV2"
    }

    fn decrypt(&self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let key = object_key(file_key, id, true);
        aes_decrypt(|iv| Aes128CbcDec::new_from_slices(&key, iv).ok(), data)
    }

    fn encrypt(&self, file_key: &[u8], id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        let key = object_key(file_key, id, true);
        aes_encrypt(|iv| Aes128CbcEnc::new_from_slices(&key, iv).ok(), data)
    }

    fn is_aes(&self) -> bool {
        true
    }
}

/// AES-256-CBC with the file key itself (method `AESV3`).
pub struct Aes256CryptFilter;

impl CryptFilter for Aes256CryptFilter {
    fn method(&self) -> &'static [u8] {
        b"AESV3"
    }

    fn decrypt(&self, file_key: &[u8], _id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        aes_decrypt(|iv| Aes256CbcDec::new_from_slices(file_key, iv).ok(), data)
    }

    fn encrypt(&self, file_key: &[u8], _id: ObjectId, data: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        aes_encrypt(|iv| Aes256CbcEnc::new_from_slices(file_key, iv).ok(), data)
    }

    fn is_aes(&self) -> bool {
        true
    }
}

fn aes_decrypt<D: BlockDecryptMut>(
    make: impl FnOnce(&[u8]) -> Option<D>, data: &[u8],
) -> Result<Vec<u8>, DecryptionError> {
    if data.len() < 16 || (data.len() - 16) % 16 != 0 {
        return Err(DecryptionError::InvalidCipherText);
    }
    let (iv, ciphertext) = data.split_at(16);
    let cipher = make(iv).ok_or(DecryptionError::InvalidCipherText)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs5>(ciphertext)
        .map_err(|_| DecryptionError::InvalidCipherText)
}

fn aes_encrypt<E: BlockEncryptMut>(
    make: impl FnOnce(&[u8]) -> Option<E>, data: &[u8],
) -> Result<Vec<u8>, DecryptionError> {
    let iv: [u8; 16] = rand::rng().random();
    let cipher = make(&iv).ok_or(DecryptionError::InvalidCipherText)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs5>(data);
    let mut out = iv.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}
