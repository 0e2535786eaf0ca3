//! `CryptoEnvelope`: AES-256-CBC cache blob encryption, compatible with the
//! OpenSSL `enc -aes-256-cbc -salt` envelope format.
//!
//! Format: literal `"Salted__"` (8 bytes), 8 random salt bytes, then the
//! ciphertext. Key (32 bytes) and IV (16 bytes) are derived from the salt
//! and password by one iteration of the legacy EVP key-derivation function
//! over SHA-1, exactly matching `original_source/src/crypto.cpp`'s
//! `Crypto::AESEncrypt`/`AESDecrypt` so an existing on-disk cache produced
//! by the reference implementation stays readable, and so the cache can be
//! inspected/repaired with `openssl enc -d -aes-256-cbc -salt`.
//!
//! Any crypto failure collapses to an empty output; callers treat an empty
//! string/byte vector as an error (spec §4.1).

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};
use sha2::Sha256;

const SALT_HEADER: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Derive `(key, iv)` via the OpenSSL legacy `EVP_BytesToKey` scheme: one
/// round of `SHA-1(prev || password || salt)`, concatenated until there are
/// enough bytes for a 32-byte key plus a 16-byte IV.
fn evp_bytes_to_key(password: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(KEY_LEN + IV_LEN);
    let mut prev: Vec<u8> = Vec::new();

    while derived.len() < KEY_LEN + IV_LEN {
        let mut hasher = Sha1::new();
        hasher.update(&prev);
        hasher.update(password);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();
        derived.extend_from_slice(&prev);
    }

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

/// Encrypt `plaintext` under `pass`, producing a `"Salted__"`-framed
/// ciphertext. Two calls with the same plaintext and password yield
/// different ciphertexts (fresh random salt each time).
pub fn encrypt(plaintext: &[u8], pass: &[u8]) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    if getrandom::fill(&mut salt).is_err() {
        return Vec::new();
    }

    let (key, iv) = evp_bytes_to_key(pass, &salt);
    let encryptor = Aes256CbcEnc::new(&key.into(), &iv.into());

    let mut buf = vec![0u8; plaintext.len() + 16];
    buf[..plaintext.len()].copy_from_slice(plaintext);
    let Ok(ciphertext) = encryptor.encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len()) else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(SALT_HEADER.len() + SALT_LEN + ciphertext.len());
    out.extend_from_slice(SALT_HEADER);
    out.extend_from_slice(&salt);
    out.extend_from_slice(ciphertext);
    out
}

/// Decrypt a `CryptoEnvelope`-framed ciphertext. If the `"Salted__"` prefix
/// is absent the salt is taken as all-zero and the whole input is treated
/// as ciphertext (back-compat path, spec §4.1).
pub fn decrypt(ciphertext: &[u8], pass: &[u8]) -> Vec<u8> {
    if ciphertext.is_empty() {
        return Vec::new();
    }

    let (salt, body) = if ciphertext.len() >= SALT_HEADER.len() + SALT_LEN
        && &ciphertext[..SALT_HEADER.len()] == SALT_HEADER
    {
        let salt = &ciphertext[SALT_HEADER.len()..SALT_HEADER.len() + SALT_LEN];
        (salt, &ciphertext[SALT_HEADER.len() + SALT_LEN..])
    } else {
        ([0u8; SALT_LEN].as_slice(), ciphertext)
    };

    let (key, iv) = evp_bytes_to_key(pass, salt);
    let decryptor = Aes256CbcDec::new(&key.into(), &iv.into());

    let mut buf = body.to_vec();
    match decryptor.decrypt_padded_mut::<Pkcs7>(&mut buf) {
        Ok(plaintext) => plaintext.to_vec(),
        Err(_) => Vec::new(),
    }
}

/// Lowercase hex-encoded SHA-256 of `s`, used to derive on-disk fingerprints
/// (folder names, cache item keys).
pub fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn roundtrip() {
        let pass = b"correct horse battery staple";
        for plaintext in [
            b"".as_slice(),
            b"a".as_slice(),
            b"hello, world!".as_slice(),
            &[0x41u8; 1024 * 1024],
        ] {
            let ciphertext = encrypt(plaintext, pass);
            assert!(!ciphertext.is_empty() || plaintext.is_empty());
            let decoded = decrypt(&ciphertext, pass);
            assert_eq!(decoded, plaintext);
        }
    }

    #[test]
    fn salt_is_random_across_encryptions() {
        let pass = b"hunter2";
        let a = encrypt(b"same plaintext", pass);
        let b = encrypt(b"same plaintext", pass);
        assert_ne!(a, b, "salts (and thus ciphertexts) must differ");
        assert_eq!(&a[..8], b"Salted__");
        assert_eq!(&b[..8], b"Salted__");
    }

    #[test]
    fn wrong_password_does_not_panic_and_is_empty_or_garbage() {
        let ciphertext = encrypt(b"secret message", b"correct password");
        let decoded = decrypt(&ciphertext, b"wrong password");
        assert_ne!(decoded, b"secret message");
    }

    #[test]
    fn no_salt_prefix_treated_as_zero_salt_ciphertext() {
        // Round-trip using the back-compat path directly, bypassing `encrypt`.
        let pass = b"legacy";
        let (key, iv) = evp_bytes_to_key(pass, &[0u8; 8]);
        let encryptor = Aes256CbcEnc::new(&key.into(), &iv.into());
        let plaintext = b"no salted prefix here";
        let mut buf = vec![0u8; plaintext.len() + 16];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let raw_ciphertext = encryptor
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .unwrap()
            .to_vec();

        assert_eq!(decrypt(&raw_ciphertext, pass), plaintext);
    }
}
