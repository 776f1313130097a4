//! Loading encrypted documents: authenticate, load the raw objects, decrypt
//! them in place, and only then unpack object streams (their members are
//! covered by the container's encryption, never encrypted individually).

use crate::encryption::{self, EncryptionState};
use crate::object::{Object, ObjectId};
use crate::{Error, Result};

use super::Reader;

impl Reader {
    pub(super) fn load_encrypted_document(&mut self) -> Result<()> {
        self.parse_encryption_dictionary()?;
        let state = self.authenticate()?;

        let containers = self.load_normal_objects();

        let encrypt_ref = self
            .document
            .trailer
            .opt(b"Encrypt")
            .and_then(|o| o.as_reference().ok());
        let ids: Vec<ObjectId> = self.document.objects.keys().copied().collect();
        for id in ids {
            if Some(id) == encrypt_ref {
                continue;
            }
            let Some(object) = self.document.objects.get_mut(&id) else {
                continue;
            };
            if let Err(error) = encryption::decrypt_object(&state, id, object) {
                self.warnings
                    .borrow_mut()
                    .push(Some(id), None, format!("failed to decrypt object: {error}"));
            }
        }

        for container_id in containers {
            self.load_object_stream_members(container_id);
        }

        // The document is now plaintext; the state is kept so a writer can
        // re-encrypt with the original parameters.
        self.document.encryption_state = Some(state);
        if let Some(encrypt_ref) = encrypt_ref {
            self.document.objects.remove(&encrypt_ref);
        }
        self.document.trailer.remove(b"Encrypt");
        Ok(())
    }

    /// Make sure the encryption dictionary object itself is in the arena so
    /// key derivation can read it.
    fn parse_encryption_dictionary(&mut self) -> Result<()> {
        let Some(encrypt) = self.document.trailer.opt(b"Encrypt") else {
            return Ok(());
        };
        if let Ok(id) = encrypt.as_reference() {
            if !self.document.has_object(id) {
                let object = self.get_object(id)?;
                self.document.objects.insert(id, object);
            }
        }
        Ok(())
    }

    /// The empty user password is tried first, then the supplied password as
    /// user and owner. A hex key skips derivation entirely.
    fn authenticate(&mut self) -> Result<EncryptionState> {
        if let Some(hex_key) = &self.options.hex_key {
            return EncryptionState::decode_with_hex_key(&self.document, hex_key);
        }
        match EncryptionState::decode(&self.document, "") {
            Ok(state) => return Ok(state),
            Err(Error::InvalidPassword) => {}
            Err(error) => return Err(error),
        }
        match &self.options.password {
            Some(password) => EncryptionState::decode(&self.document, password),
            None => Err(Error::InvalidPassword),
        }
    }
}
