//! The standard security handler: key derivation for revisions 2 through 6,
//! password authentication, and per-object string/stream cryptography.

pub mod crypt_filters;
mod pkcs5;
mod rc4;

pub use crypt_filters::{
    Aes128CryptFilter, Aes256CryptFilter, CryptFilter, IdentityCryptFilter, Rc4CryptFilter,
};
pub use rc4::rc4_apply;

use std::fmt;
use std::rc::Rc;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, KeyInit};
use bitflags::bitflags;
use log::warn;
use md5::{Digest, Md5};
use rand::Rng;
use sha2::{Sha256, Sha384, Sha512};

use crate::document::Document;
use crate::object::{Dictionary, Object, ObjectId};
use crate::{DecryptionError, Error, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256EcbEnc = ecb::Encryptor<aes::Aes256>;
type Aes256EcbDec = ecb::Decryptor<aes::Aes256>;

/// The 32-byte password pad from the standard security handler.
pub const PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

bitflags! {
    /// The user-access flags carried in `/P`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY_CONTENTS = 1 << 3;
        const COPY = 1 << 4;
        const MODIFY_ANNOTATIONS = 1 << 5;
        const FILL_FORMS = 1 << 8;
        const EXTRACT_FOR_ACCESSIBILITY = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_FAITHFUL = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::all()
    }
}

impl Permissions {
    pub fn from_p(p: i64) -> Permissions {
        Permissions::from_bits_truncate(p as u32)
    }

    /// The `/P` value: the flag bits with every reserved bit set, as a signed
    /// 32-bit number.
    pub fn to_p(self) -> i64 {
        i64::from((self.bits() | 0xFFFF_F0C0) as i32)
    }
}

/// Which credential unlocked the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRole {
    User,
    Owner,
    /// The file key was supplied directly, bypassing password derivation.
    HexKey,
}

/// Requested parameters when regenerating encryption on write.
#[derive(Debug, Clone)]
pub struct EncryptionRequest {
    pub user_password: String,
    pub owner_password: String,
    pub revision: i64,
    pub permissions: Permissions,
    pub encrypt_metadata: bool,
}

#[derive(Clone)]
pub struct EncryptionState {
    pub revision: i64,
    pub version: i64,
    /// File key length in bytes.
    pub key_length: usize,
    pub file_key: Vec<u8>,
    pub encrypt_metadata: bool,
    pub permissions: Permissions,
    pub role: PasswordRole,
    pub o: Vec<u8>,
    pub u: Vec<u8>,
    pub oe: Vec<u8>,
    pub ue: Vec<u8>,
    pub perms: Vec<u8>,
    string_filter: Rc<dyn CryptFilter>,
    stream_filter: Rc<dyn CryptFilter>,
}

impl fmt::Debug for EncryptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionState")
            .field("revision", &self.revision)
            .field("version", &self.version)
            .field("key_length", &self.key_length)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl EncryptionState {
    /// Authenticate `password` against the document's encryption dictionary
    /// and derive the file key. The password is tried as the user password
    /// first, then as the owner password.
    pub fn decode(document: &Document, password: &str) -> Result<EncryptionState> {
        let dict = encryption_dictionary(document)?;
        let mut state = Self::from_dictionary(&dict)?;
        let id0 = document
            .trailer
            .opt(b"ID")
            .and_then(|id| id.as_array().ok())
            .and_then(|id| id.first())
            .and_then(|first| first.as_str().ok())
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| {
                warn!("trailer has no /ID, deriving the key from an empty one");
                Vec::new()
            });

        if state.revision <= 4 {
            state.authenticate_r4(password, &id0)?;
        } else {
            state.authenticate_r6(password)?;
        }
        Ok(state)
    }

    /// Bypass password derivation entirely and trust the supplied hex key.
    pub fn decode_with_hex_key(document: &Document, hex_key: &str) -> Result<EncryptionState> {
        let dict = encryption_dictionary(document)?;
        let mut state = Self::from_dictionary(&dict)?;
        let mut key = Vec::with_capacity(hex_key.len() / 2);
        let bytes = hex_key.as_bytes();
        for pair in bytes.chunks(2) {
            let high = crate::tokenizer::hex_value(pair[0]);
            let low = pair.get(1).copied().and_then(crate::tokenizer::hex_value);
            match (high, low) {
                (Some(high), Some(low)) => key.push((high << 4) | low),
                _ => return Err(Error::Decryption(DecryptionError::InvalidKeyLength(hex_key.len()))),
            }
        }
        if key.len() != state.key_length {
            return Err(Error::Decryption(DecryptionError::InvalidKeyLength(key.len())));
        }
        state.file_key = key;
        state.role = PasswordRole::HexKey;
        Ok(state)
    }

    fn from_dictionary(dict: &Dictionary) -> Result<EncryptionState> {
        let filter = dict.get(b"Filter").and_then(Object::as_name).unwrap_or(b"Standard");
        if filter != b"Standard" {
            return Err(Error::Unsupported("only the standard security handler is supported"));
        }
        let version = dict.opt(b"V").and_then(|v| v.as_i64().ok()).unwrap_or(0);
        if ![1, 2, 4, 5].contains(&version) {
            return Err(Error::Decryption(DecryptionError::UnsupportedVersion(version)));
        }
        let revision = dict.opt(b"R").and_then(|r| r.as_i64().ok()).unwrap_or(0);
        if !(2..=6).contains(&revision) {
            return Err(Error::Decryption(DecryptionError::UnsupportedRevision(revision)));
        }
        let key_bits = match version {
            1 => 40,
            5 => 256,
            _ => dict.opt(b"Length").and_then(|l| l.as_i64().ok()).unwrap_or(40),
        };
        if key_bits % 8 != 0 || !(40..=256).contains(&key_bits) {
            return Err(Error::Decryption(DecryptionError::InvalidKeyLength(key_bits as usize)));
        }
        let get_bytes = |key: &[u8]| {
            dict.opt(key).and_then(|v| v.as_str().ok()).map(<[u8]>::to_vec).unwrap_or_default()
        };
        let permissions = dict
            .opt(b"P")
            .and_then(|p| p.as_i64().ok())
            .map(Permissions::from_p)
            .unwrap_or_default();
        let encrypt_metadata = dict
            .opt(b"EncryptMetadata")
            .and_then(|m| m.as_bool().ok())
            .unwrap_or(true);

        let (string_filter, stream_filter) = Self::select_filters(dict, version)?;

        Ok(EncryptionState {
            revision,
            version,
            key_length: key_bits as usize / 8,
            file_key: Vec::new(),
            encrypt_metadata,
            permissions,
            role: PasswordRole::User,
            o: get_bytes(b"O"),
            u: get_bytes(b"U"),
            oe: get_bytes(b"OE"),
            ue: get_bytes(b"UE"),
            perms: get_bytes(b"Perms"),
            string_filter,
            stream_filter,
        })
    }

    fn select_filters(
        dict: &Dictionary, version: i64,
    ) -> Result<(Rc<dyn CryptFilter>, Rc<dyn CryptFilter>)> {
        if version < 4 {
            let rc4: Rc<dyn CryptFilter> = Rc::new(Rc4CryptFilter);
            return Ok((rc4.clone(), rc4));
        }
        let filter_for = |selector: &[u8]| -> Result<Rc<dyn CryptFilter>> {
            let name = dict
                .opt(selector)
                .and_then(|f| f.as_name().ok())
                .unwrap_or(b"Identity");
            if name == b"Identity" {
                return Ok(Rc::new(IdentityCryptFilter));
            }
            let method = dict
                .opt(b"CF")
                .and_then(|cf| cf.as_dict().ok())
                .and_then(|cf| cf.opt(name))
                .and_then(|entry| entry.as_dict().ok())
                .and_then(|entry| entry.opt(b"CFM"))
                .and_then(|m| m.as_name().ok())
                .unwrap_or(b"Identity");
            match method {
                b"Identity" => Ok(Rc::new(IdentityCryptFilter) as Rc<dyn CryptFilter>),
                b"V2" => Ok(Rc::new(Rc4CryptFilter)),
                b"AESV2" => Ok(Rc::new(Aes128CryptFilter)),
                b"AESV3" => Ok(Rc::new(Aes256CryptFilter)),
                _ => Err(Error::Decryption(DecryptionError::InvalidCryptFilterMethod)),
            }
        };
        Ok((filter_for(b"StrF")?, filter_for(b"StmF")?))
    }

    fn authenticate_r4(&mut self, password: &str, id0: &[u8]) -> Result<()> {
        let padded = pad_password(&encode_password_r4(password)?);

        // As the user password.
        let key = self.file_key_r4(&padded, id0);
        if self.check_user_key_r4(&key, id0) {
            self.file_key = key;
            self.role = PasswordRole::User;
            return Ok(());
        }

        // As the owner password: decrypting /O yields the padded user
        // password.
        let user_padded = self.decrypt_owner_entry(&padded);
        let key = self.file_key_r4(&user_padded, id0);
        if self.check_user_key_r4(&key, id0) {
            self.file_key = key;
            self.role = PasswordRole::Owner;
            return Ok(());
        }
        Err(Error::InvalidPassword)
    }

    fn file_key_r4(&self, padded_password: &[u8], id0: &[u8]) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(padded_password);
        hasher.update(&self.o[..self.o.len().min(32)]);
        hasher.update((self.permissions.to_p() as i32).to_le_bytes());
        hasher.update(id0);
        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update([0xFF, 0xFF, 0xFF, 0xFF]);
        }
        let mut digest = hasher.finalize().to_vec();
        if self.revision >= 3 {
            for _ in 0..50 {
                digest = Md5::digest(&digest[..self.key_length]).to_vec();
            }
        }
        digest.truncate(self.key_length);
        digest
    }

    fn compute_user_entry(&self, key: &[u8], id0: &[u8]) -> Vec<u8> {
        if self.revision == 2 {
            return rc4_apply(key, &PAD);
        }
        let mut hasher = Md5::new();
        hasher.update(PAD);
        hasher.update(id0);
        let mut value = rc4_apply(key, &hasher.finalize());
        for i in 1..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|&b| b ^ i).collect();
            value = rc4_apply(&round_key, &value);
        }
        value.resize(32, 0);
        value
    }

    fn check_user_key_r4(&self, key: &[u8], id0: &[u8]) -> bool {
        let expected = self.compute_user_entry(key, id0);
        let compare = if self.revision >= 3 { 16 } else { 32 };
        self.u.len() >= compare && expected[..compare] == self.u[..compare]
    }

    fn owner_rc4_key(&self, padded_owner: &[u8]) -> Vec<u8> {
        let mut digest = Md5::digest(padded_owner).to_vec();
        if self.revision >= 3 {
            for _ in 0..50 {
                digest = Md5::digest(&digest).to_vec();
            }
        }
        digest.truncate(self.key_length);
        digest
    }

    fn decrypt_owner_entry(&self, padded_owner: &[u8]) -> Vec<u8> {
        let rc4_key = self.owner_rc4_key(padded_owner);
        let mut value = self.o.clone();
        value.truncate(32);
        if self.revision == 2 {
            return rc4_apply(&rc4_key, &value);
        }
        for i in (0..=19u8).rev() {
            let round_key: Vec<u8> = rc4_key.iter().map(|&b| b ^ i).collect();
            value = rc4_apply(&round_key, &value);
        }
        value
    }

    fn authenticate_r6(&mut self, password: &str) -> Result<()> {
        let password = encode_password_r6(password)?;
        if self.u.len() < 48 || self.o.len() < 48 {
            return Err(Error::Decryption(DecryptionError::InvalidEncryptionDictionary));
        }
        let (u_hash, u_salts) = self.u[..48].split_at(32);
        let (u_validation_salt, u_key_salt) = u_salts.split_at(8);
        let (o_hash, o_salts) = self.o[..48].split_at(32);
        let (o_validation_salt, o_key_salt) = o_salts.split_at(8);

        let hash = self.r56_hash(&password, u_validation_salt, &[]);
        if hash == u_hash {
            let intermediate = self.r56_hash(&password, u_key_salt, &[]);
            self.file_key = aes256_cbc_nopad_decrypt(&intermediate, &self.ue)?;
            self.role = PasswordRole::User;
        } else {
            let hash = self.r56_hash(&password, o_validation_salt, &self.u[..48]);
            if hash != o_hash {
                return Err(Error::InvalidPassword);
            }
            let intermediate = self.r56_hash(&password, o_key_salt, &self.u[..48]);
            self.file_key = aes256_cbc_nopad_decrypt(&intermediate, &self.oe)?;
            self.role = PasswordRole::Owner;
        }
        self.verify_perms();
        Ok(())
    }

    fn r56_hash(&self, password: &[u8], salt: &[u8], udata: &[u8]) -> Vec<u8> {
        if self.revision == 5 {
            let mut hasher = Sha256::new();
            hasher.update(password);
            hasher.update(salt);
            hasher.update(udata);
            hasher.finalize().to_vec()
        } else {
            hash_r6(password, salt, udata)
        }
    }

    fn verify_perms(&self) {
        if self.perms.len() != 16 {
            return;
        }
        let Ok(cipher) = Aes256EcbDec::new_from_slice(&self.file_key) else {
            return;
        };
        let Ok(block) = cipher.decrypt_padded_vec_mut::<NoPadding>(&self.perms) else {
            warn!("could not decrypt /Perms");
            return;
        };
        if &block[9..12] != b"adb" {
            warn!("/Perms does not validate against the file key");
            return;
        }
        let p = i32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        if i64::from(p) != self.permissions.to_p() {
            warn!("/Perms disagrees with /P, keeping /P");
        }
    }

    /// Build a state with freshly generated cryptographic values. Revisions 4
    /// (AES-128) and 6 (AES-256) are generated; lower revisions are only ever
    /// preserved from existing files. `id0` is the first document ID half the
    /// writer has settled on; R4 key derivation depends on it.
    pub fn generate(request: &EncryptionRequest, id0: &[u8]) -> Result<EncryptionState> {
        match request.revision {
            2 | 3 => Self::generate_rc4(request, id0),
            4 => Self::generate_r4(request, id0),
            6 => Self::generate_r6(request),
            _ => Err(Error::Unsupported("encryption can be generated with R2, R3, R4 or R6")),
        }
    }

    /// Legacy RC4 files: 40-bit for R2, 128-bit for R3.
    fn generate_rc4(request: &EncryptionRequest, id0: &[u8]) -> Result<EncryptionState> {
        let rc4: Rc<dyn CryptFilter> = Rc::new(Rc4CryptFilter);
        let revision = request.revision;
        let mut state = EncryptionState {
            revision,
            version: if revision == 2 { 1 } else { 2 },
            key_length: if revision == 2 { 5 } else { 16 },
            file_key: Vec::new(),
            encrypt_metadata: true,
            permissions: request.permissions,
            role: PasswordRole::Owner,
            o: Vec::new(),
            u: Vec::new(),
            oe: Vec::new(),
            ue: Vec::new(),
            perms: Vec::new(),
            string_filter: rc4.clone(),
            stream_filter: rc4,
        };
        let user = pad_password(&encode_password_r4(&request.user_password)?);
        let owner_source = if request.owner_password.is_empty() {
            &request.user_password
        } else {
            &request.owner_password
        };
        let owner = pad_password(&encode_password_r4(owner_source)?);

        let rc4_key = state.owner_rc4_key(&owner);
        let mut o = user.to_vec();
        if revision == 2 {
            o = rc4_apply(&rc4_key, &o);
        } else {
            for i in 0..=19u8 {
                let round_key: Vec<u8> = rc4_key.iter().map(|&b| b ^ i).collect();
                o = rc4_apply(&round_key, &o);
            }
        }
        state.o = o;
        state.file_key = state.file_key_r4(&user, id0);
        state.u = state.compute_user_entry(&state.file_key, id0);
        Ok(state)
    }

    fn generate_r4(request: &EncryptionRequest, id0: &[u8]) -> Result<EncryptionState> {
        let aes: Rc<dyn CryptFilter> = Rc::new(Aes128CryptFilter);
        let mut state = EncryptionState {
            revision: 4,
            version: 4,
            key_length: 16,
            file_key: Vec::new(),
            encrypt_metadata: request.encrypt_metadata,
            permissions: request.permissions,
            role: PasswordRole::Owner,
            o: Vec::new(),
            u: Vec::new(),
            oe: Vec::new(),
            ue: Vec::new(),
            perms: Vec::new(),
            string_filter: aes.clone(),
            stream_filter: aes,
        };
        let user = pad_password(&encode_password_r4(&request.user_password)?);
        let owner_source = if request.owner_password.is_empty() {
            &request.user_password
        } else {
            &request.owner_password
        };
        let owner = pad_password(&encode_password_r4(owner_source)?);

        // /O: the padded user password under the owner RC4 key chain.
        let rc4_key = state.owner_rc4_key(&owner);
        let mut o = user.to_vec();
        for i in 0..=19u8 {
            let round_key: Vec<u8> = rc4_key.iter().map(|&b| b ^ i).collect();
            o = rc4_apply(&round_key, &o);
        }
        state.o = o;

        state.file_key = state.file_key_r4(&user, id0);
        state.u = state.compute_user_entry(&state.file_key, id0);
        Ok(state)
    }

    fn generate_r6(request: &EncryptionRequest) -> Result<EncryptionState> {
        let aes: Rc<dyn CryptFilter> = Rc::new(Aes256CryptFilter);
        let mut state = EncryptionState {
            revision: 6,
            version: 5,
            key_length: 32,
            file_key: rand::rng().random::<[u8; 32]>().to_vec(),
            encrypt_metadata: request.encrypt_metadata,
            permissions: request.permissions,
            role: PasswordRole::Owner,
            o: Vec::new(),
            u: Vec::new(),
            oe: Vec::new(),
            ue: Vec::new(),
            perms: Vec::new(),
            string_filter: aes.clone(),
            stream_filter: aes,
        };
        let user = encode_password_r6(&request.user_password)?;
        let owner_source = if request.owner_password.is_empty() {
            &request.user_password
        } else {
            &request.owner_password
        };
        let owner = encode_password_r6(owner_source)?;

        let u_validation_salt: [u8; 8] = rand::rng().random();
        let u_key_salt: [u8; 8] = rand::rng().random();
        let mut u = hash_r6(&user, &u_validation_salt, &[]);
        u.extend_from_slice(&u_validation_salt);
        u.extend_from_slice(&u_key_salt);
        let intermediate = hash_r6(&user, &u_key_salt, &[]);
        state.ue = aes256_cbc_nopad_encrypt(&intermediate, &state.file_key)?;
        state.u = u;

        let o_validation_salt: [u8; 8] = rand::rng().random();
        let o_key_salt: [u8; 8] = rand::rng().random();
        let mut o = hash_r6(&owner, &o_validation_salt, &state.u);
        o.extend_from_slice(&o_validation_salt);
        o.extend_from_slice(&o_key_salt);
        let intermediate = hash_r6(&owner, &o_key_salt, &state.u);
        state.oe = aes256_cbc_nopad_encrypt(&intermediate, &state.file_key)?;
        state.o = o;

        let mut perms_block = [0u8; 16];
        perms_block[..4].copy_from_slice(&(state.permissions.to_p() as i32).to_le_bytes());
        perms_block[4..8].copy_from_slice(&[0xFF; 4]);
        perms_block[8] = if state.encrypt_metadata { b'T' } else { b'F' };
        perms_block[9..12].copy_from_slice(b"adb");
        perms_block[12..16].copy_from_slice(&rand::rng().random::<[u8; 4]>());
        let cipher = Aes256EcbEnc::new_from_slice(&state.file_key)
            .map_err(|_| Error::Decryption(DecryptionError::InvalidKeyLength(state.file_key.len())))?;
        state.perms = cipher.encrypt_padded_vec_mut::<NoPadding>(&perms_block);
        Ok(state)
    }

    /// The `/Encrypt` dictionary describing this state, for the writer. The
    /// dictionary itself is always written unencrypted.
    pub fn encryption_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("Standard"));
        dict.set("V", self.version);
        dict.set("R", self.revision);
        dict.set("Length", (self.key_length * 8) as i64);
        dict.set("P", self.permissions.to_p());
        dict.set("O", Object::string_literal(self.o.clone()));
        dict.set("U", Object::string_literal(self.u.clone()));
        if self.revision >= 5 {
            dict.set("OE", Object::string_literal(self.oe.clone()));
            dict.set("UE", Object::string_literal(self.ue.clone()));
            dict.set("Perms", Object::string_literal(self.perms.clone()));
        }
        if !self.encrypt_metadata {
            dict.set("EncryptMetadata", false);
        }
        if self.version >= 4 {
            let method = self.stream_filter.method();
            let mut std_cf = Dictionary::new();
            std_cf.set("Type", Object::name("CryptFilter"));
            std_cf.set("CFM", Object::Name(method.to_vec()));
            std_cf.set("Length", self.key_length as i64);
            let mut cf = Dictionary::new();
            cf.set("StdCF", std_cf);
            dict.set("CF", cf);
            dict.set("StmF", Object::name("StdCF"));
            dict.set("StrF", Object::name("StdCF"));
        }
        dict
    }

    pub fn decrypt_string(&self, id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.string_filter.decrypt(&self.file_key, id, data)?)
    }

    pub fn encrypt_string(&self, id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.string_filter.encrypt(&self.file_key, id, data)?)
    }

    pub fn decrypt_stream(&self, id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.stream_filter.decrypt(&self.file_key, id, data)?)
    }

    pub fn encrypt_stream(&self, id: ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.stream_filter.encrypt(&self.file_key, id, data)?)
    }
}

fn encryption_dictionary(document: &Document) -> Result<Dictionary> {
    let encrypt = document
        .trailer
        .opt(b"Encrypt")
        .ok_or(Error::Decryption(DecryptionError::InvalidEncryptionDictionary))?;
    document
        .dereference(encrypt)
        .map_err(|_| Error::Decryption(DecryptionError::InvalidEncryptionDictionary))?
        .1
        .as_dict()
        .cloned()
        .map_err(|_| Error::Decryption(DecryptionError::InvalidEncryptionDictionary))
}

/// Truncate or pad to exactly 32 bytes with the standard pad string.
pub fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let n = password.len().min(32);
    padded[..n].copy_from_slice(&password[..n]);
    padded[n..].copy_from_slice(&PAD[..32 - n]);
    padded
}

/// R ≤ 4 passwords are PDFDocEncoding, which for password purposes means one
/// byte per character below U+0100.
fn encode_password_r4(password: &str) -> Result<Vec<u8>> {
    password
        .chars()
        .map(|c| {
            u8::try_from(u32::from(c))
                .map_err(|_| Error::Decryption(DecryptionError::InvalidPasswordEncoding))
        })
        .collect()
}

/// R ≥ 5 passwords are SASLprep-normalised UTF-8 truncated to 127 bytes.
fn encode_password_r6(password: &str) -> Result<Vec<u8>> {
    let prepared = stringprep::saslprep(password)
        .map_err(|_| Error::Decryption(DecryptionError::InvalidPasswordEncoding))?;
    let bytes = prepared.as_bytes();
    let mut end = bytes.len().min(127);
    while end > 0 && !prepared.is_char_boundary(end) {
        end -= 1;
    }
    Ok(bytes[..end].to_vec())
}

/// The hardened hash of ISO 32000-2 Algorithm 2.B for revision 6.
fn hash_r6(password: &[u8], salt: &[u8], udata: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.update(udata);
    let mut k = hasher.finalize().to_vec();

    let mut round = 0usize;
    loop {
        let mut block = Vec::with_capacity(64 * (password.len() + k.len() + udata.len()));
        for _ in 0..64 {
            block.extend_from_slice(password);
            block.extend_from_slice(&k);
            block.extend_from_slice(udata);
        }
        let cipher = Aes128CbcEnc::new_from_slices(&k[..16], &k[16..32])
            .expect("key and iv sizes are fixed");
        let encrypted = cipher.encrypt_padded_vec_mut::<NoPadding>(&block);
        let selector: u32 = encrypted[..16].iter().map(|&b| u32::from(b)).sum();
        k = match selector % 3 {
            0 => Sha256::digest(&encrypted).to_vec(),
            1 => Sha384::digest(&encrypted).to_vec(),
            _ => Sha512::digest(&encrypted).to_vec(),
        };
        round += 1;
        if round >= 64 && usize::from(*encrypted.last().unwrap()) <= round - 32 {
            break;
        }
    }
    k.truncate(32);
    k
}

fn aes256_cbc_nopad_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 16 != 0 || data.is_empty() {
        return Err(Error::Decryption(DecryptionError::InvalidCipherText));
    }
    let cipher = Aes256CbcDec::new_from_slices(key, &[0u8; 16])
        .map_err(|_| Error::Decryption(DecryptionError::InvalidKeyLength(key.len())))?;
    cipher
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|_| Error::Decryption(DecryptionError::InvalidCipherText))
}

fn aes256_cbc_nopad_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, &[0u8; 16])
        .map_err(|_| Error::Decryption(DecryptionError::InvalidKeyLength(key.len())))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(data))
}

/// Decrypt every string and stream in `object`, in place. The caller skips
/// the encryption dictionary itself and cross-reference streams.
pub fn decrypt_object(state: &EncryptionState, id: ObjectId, object: &mut Object) -> Result<()> {
    match object {
        Object::String(bytes, _) => {
            *bytes = state.decrypt_string(id, bytes)?;
        }
        Object::Array(items) => {
            for item in items {
                decrypt_object(state, id, item)?;
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                decrypt_object(state, id, value)?;
            }
        }
        Object::Stream(stream) => {
            // Cross-reference streams double as trailers and are never
            // encrypted, dictionary included; exempt metadata keeps its
            // payload but its dictionary strings are still encrypted.
            if stream.dict.has_type(b"XRef") {
                return Ok(());
            }
            let exempt = !state.encrypt_metadata && stream.dict.has_type(b"Metadata");
            let mut dict = std::mem::take(&mut stream.dict);
            for (_, value) in dict.iter_mut() {
                decrypt_object(state, id, value)?;
            }
            stream.dict = dict;
            if !exempt {
                let decrypted = state.decrypt_stream(id, stream.content()?)?;
                stream.set_content(decrypted);
            }
        }
        _ => {}
    }
    Ok(())
}
