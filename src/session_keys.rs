//! `SessionKeys`: the account password's in-memory lifecycle and its
//! derived uses — the passphrase for [`crate::cache`] blob encryption, and
//! the obfuscation key for the `save_pass` config persistence path
//! (spec §6, §9 "Shared password in memory").
//!
//! The password is held once, for the life of the process, in a
//! zero-on-drop buffer. Every collaborator that needs it (the two workers,
//! `CacheStore`) borrows a `&str` view rather than cloning the plaintext,
//! so there is exactly one place it can leak from.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto;

/// A password held in memory, zeroed when dropped. Never `Clone` — callers
/// that need the bytes take a borrowed view via [`SessionKeys::password`].
#[derive(Zeroize, ZeroizeOnDrop)]
struct SessionPassword(String);

pub struct SessionKeys {
    password: SessionPassword,
}

impl SessionKeys {
    pub fn new(password: String) -> Self {
        Self {
            password: SessionPassword(password),
        }
    }

    /// Borrow the live password. Used as the cache encryption passphrase
    /// and the IMAP/SMTP auth credential.
    pub fn password(&self) -> &str {
        &self.password.0
    }

    /// Obfuscate `password` for on-disk persistence when `save_pass=1`:
    /// encrypt it under the username as passphrase, then hex-encode. This
    /// is documented (spec §6) as obfuscation, not security — anyone who
    /// can read the config file already knows the username.
    pub fn persist_password(username: &str, password: &str) -> String {
        let ciphertext = crypto::encrypt(password.as_bytes(), username.as_bytes());
        hex::encode(ciphertext)
    }

    /// Reverse of [`SessionKeys::persist_password`]. Returns `None` if the
    /// hex is malformed or decryption fails (caller should then prompt for
    /// the password instead of proceeding with an empty one).
    pub fn load_password(username: &str, persisted_hex: &str) -> Option<String> {
        let ciphertext = hex::decode(persisted_hex).ok()?;
        let plaintext = crypto::decrypt(&ciphertext, username.as_bytes());
        if plaintext.is_empty() {
            return None;
        }
        String::from_utf8(plaintext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrips_through_persistence() {
        let persisted = SessionKeys::persist_password("alice", "hunter2");
        assert_eq!(
            SessionKeys::load_password("alice", &persisted),
            Some("hunter2".to_string())
        );
    }

    #[test]
    fn persistence_is_username_scoped() {
        let persisted = SessionKeys::persist_password("alice", "hunter2");
        // A different username is a different passphrase; decrypting under
        // it should not recover the original password.
        assert_ne!(
            SessionKeys::load_password("bob", &persisted),
            Some("hunter2".to_string())
        );
    }

    #[test]
    fn malformed_hex_is_none() {
        assert_eq!(SessionKeys::load_password("alice", "not hex!!"), None);
    }

    #[test]
    fn session_keys_exposes_live_password() {
        let keys = SessionKeys::new("s3cret".to_string());
        assert_eq!(keys.password(), "s3cret");
    }
}
