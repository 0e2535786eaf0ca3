//! `CacheStore`: the on-disk mail cache (spec §4.2).
//!
//! Backed by a directory tree under `$APPDIR/cache/`, one blob per
//! header/body/flags value, each put atomic via temp-file + rename. Every
//! blob passes through [`crate::crypto`] when `cache_encrypt=1`; otherwise
//! it is stored verbatim. A single [`std::sync::Mutex`] serializes all
//! operations (spec §5's single-writer guarantee is enforced one level up
//! by the directory lock; this mutex only protects against this process's
//! own concurrent callers).
//!
//! Grounded on `bltz::cache::db::Cache`'s shape (one struct fronting
//! durable storage, a forget/clear operation, temp-dir-backed tests) with
//! the storage mechanism rebuilt as a filesystem blob tree, since spec §4.2
//! pins an exact on-disk layout a SQL table cannot satisfy.

pub mod types;

pub use types::{Body, DateIndex, Flags, Header, Part};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::crypto;

pub struct CacheStore {
    root: PathBuf,
    encrypt: bool,
    passphrase: String,
    lock: Mutex<()>,
}

impl CacheStore {
    /// Open (creating if absent) the cache rooted at `root`, typically
    /// `$APPDIR/cache`. `passphrase` is the live session password; blobs
    /// are encrypted under it when `encrypt` is true.
    pub fn open(root: impl Into<PathBuf>, encrypt: bool, passphrase: impl Into<String>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            encrypt,
            passphrase: passphrase.into(),
            lock: Mutex::new(()),
        })
    }

    fn folder_fp(&self, folder: &str) -> String {
        crypto::sha256_hex(folder)
    }

    fn folder_dir(&self, folder: &str) -> PathBuf {
        self.root.join(self.folder_fp(folder))
    }

    fn folders_file(&self) -> PathBuf {
        self.root.join("folders")
    }

    /// Write `data` to `path` via temp-file + rename, the only durability
    /// guarantee spec §4.2 asks for (fsync is explicitly omitted).
    fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)
    }

    fn encode_blob(&self, plaintext: &[u8]) -> Vec<u8> {
        if self.encrypt {
            crypto::encrypt(plaintext, self.passphrase.as_bytes())
        } else {
            plaintext.to_vec()
        }
    }

    /// Reads and decodes a blob. Any failure — missing file, I/O error,
    /// decrypt failure, malformed contents — is a miss (spec §7: local
    /// cache errors never propagate past this boundary).
    fn read_blob(&self, path: &Path) -> Option<Vec<u8>> {
        let raw = fs::read(path).ok()?;
        if self.encrypt {
            let plaintext = crypto::decrypt(&raw, self.passphrase.as_bytes());
            if plaintext.is_empty() && !raw.is_empty() {
                return None;
            }
            Some(plaintext)
        } else {
            Some(raw)
        }
    }

    // ---- folders ----

    pub fn get_folders(&self) -> HashSet<String> {
        let _guard = self.lock.lock().unwrap();
        let Some(raw) = self.read_blob(&self.folders_file()) else {
            return HashSet::new();
        };
        let Ok(text) = String::from_utf8(raw) else {
            return HashSet::new();
        };
        text.lines().map(str::to_string).collect()
    }

    pub fn put_folders(&self, folders: &HashSet<String>) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut sorted: Vec<&str> = folders.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let text = sorted.join("\n");
        Self::atomic_write(&self.folders_file(), &self.encode_blob(text.as_bytes()))
    }

    // ---- uids ----

    fn uids_file(&self, folder: &str) -> PathBuf {
        self.folder_dir(folder).join("uids")
    }

    pub fn get_uids(&self, folder: &str) -> HashSet<u32> {
        let _guard = self.lock.lock().unwrap();
        let Some(raw) = self.read_blob(&self.uids_file(folder)) else {
            return HashSet::new();
        };
        let Ok(text) = String::from_utf8(raw) else {
            return HashSet::new();
        };
        text.split_whitespace().filter_map(|s| s.parse().ok()).collect()
    }

    pub fn put_uids(&self, folder: &str, uids: &HashSet<u32>) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut sorted: Vec<u32> = uids.iter().copied().collect();
        sorted.sort_unstable();
        let text = sorted.iter().map(u32::to_string).collect::<Vec<_>>().join(" ");
        Self::atomic_write(&self.uids_file(folder), &self.encode_blob(text.as_bytes()))
    }

    // ---- dates (DateIndex) ----

    fn dates_file(&self, folder: &str) -> PathBuf {
        self.folder_dir(folder).join("dates")
    }

    pub fn get_dates(&self, folder: &str) -> DateIndex {
        let _guard = self.lock.lock().unwrap();
        let Some(raw) = self.read_blob(&self.dates_file(folder)) else {
            return DateIndex::default();
        };
        let Ok(text) = String::from_utf8(raw) else {
            return DateIndex::default();
        };
        DateIndex::from_lines(&text)
    }

    pub fn put_dates(&self, folder: &str, index: &DateIndex) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        Self::atomic_write(&self.dates_file(folder), &self.encode_blob(index.to_lines().as_bytes()))
    }

    // ---- headers ----

    fn header_path(&self, folder: &str, uid: u32) -> PathBuf {
        self.folder_dir(folder).join("h").join(uid.to_string())
    }

    /// Fetches headers for `uids`. Silently omits any UID whose blob is
    /// missing, undecryptable, or malformed — a partial result is not an
    /// error (spec §4.2).
    pub fn get_headers(&self, folder: &str, uids: &HashSet<u32>) -> HashMap<u32, Header> {
        let _guard = self.lock.lock().unwrap();
        let mut out = HashMap::new();
        for &uid in uids {
            let Some(raw) = self.read_blob(&self.header_path(folder, uid)) else {
                continue;
            };
            if let Ok(header) = serde_json::from_slice::<Header>(&raw) {
                out.insert(uid, header);
            }
        }
        out
    }

    pub fn put_header(&self, folder: &str, uid: u32, header: &Header) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let json = serde_json::to_vec(header)?;
        Self::atomic_write(&self.header_path(folder, uid), &self.encode_blob(&json))
    }

    // ---- bodies ----

    fn body_path(&self, folder: &str, uid: u32) -> PathBuf {
        self.folder_dir(folder).join("b").join(uid.to_string())
    }

    pub fn get_body(&self, folder: &str, uid: u32) -> Option<Body> {
        let _guard = self.lock.lock().unwrap();
        let raw = self.read_blob(&self.body_path(folder, uid))?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn put_body(&self, folder: &str, uid: u32, body: &Body) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let json = serde_json::to_vec(body)?;
        Self::atomic_write(&self.body_path(folder, uid), &self.encode_blob(&json))
    }

    // ---- flags ----

    fn flags_path(&self, folder: &str, uid: u32) -> PathBuf {
        self.folder_dir(folder).join("f").join(uid.to_string())
    }

    pub fn get_flags(&self, folder: &str, uid: u32) -> Option<Flags> {
        let _guard = self.lock.lock().unwrap();
        let raw = self.read_blob(&self.flags_path(folder, uid))?;
        let text = String::from_utf8(raw).ok()?;
        let bits: u32 = text.trim().parse().ok()?;
        Flags::from_bits(bits)
    }

    pub fn put_flags(&self, folder: &str, uid: u32, flags: Flags) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let text = flags.bits().to_string();
        Self::atomic_write(&self.flags_path(folder, uid), &self.encode_blob(text.as_bytes()))
    }

    // ---- removal ----

    /// Removes all per-UID blobs and the `DateIndex` row for `uid`. Does
    /// not rewrite the `uids` file; callers update it via `put_uids`
    /// separately once the server's authoritative UID set is known.
    pub fn expunge(&self, folder: &str, uid: u32) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        for path in [
            self.header_path(folder, uid),
            self.body_path(folder, uid),
            self.flags_path(folder, uid),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        drop(_guard);
        let mut index = self.get_dates(folder);
        index.remove(uid);
        self.put_dates(folder, &index)?;
        Ok(())
    }

    /// Recursively removes a folder's entire cache subtree.
    pub fn forget_folder(&self, folder: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let dir = self.folder_dir(folder);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> CacheStore {
        CacheStore::open(dir.path().join("cache"), true, "hunter2").unwrap()
    }

    fn sample_header() -> Header {
        Header {
            from: "a@example.com".to_string(),
            to: "b@example.com".to_string(),
            cc: String::new(),
            bcc: String::new(),
            subject: "hi".to_string(),
            date: 1_700_000_000,
            message_id: Some("<1@example.com>".to_string()),
            in_reply_to: None,
        }
    }

    #[test]
    fn put_then_get_header_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir);
        let header = sample_header();
        cache.put_header("INBOX", 42, &header).unwrap();

        let fetched = cache.get_headers("INBOX", &[42].into_iter().collect());
        assert_eq!(fetched.get(&42), Some(&header));
    }

    #[test]
    fn expunge_clears_header_body_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir);
        let header = sample_header();
        cache.put_header("INBOX", 7, &header).unwrap();
        cache
            .put_body(
                "INBOX",
                7,
                &Body {
                    text: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        cache.put_flags("INBOX", 7, Flags::SEEN).unwrap();
        cache
            .put_dates("INBOX", &{
                let mut idx = DateIndex::default();
                idx.insert(7, "2024-01-01T00:00:00Z".to_string());
                idx
            })
            .unwrap();

        cache.expunge("INBOX", 7).unwrap();

        assert!(cache.get_headers("INBOX", &[7].into_iter().collect()).is_empty());
        assert_eq!(cache.get_body("INBOX", 7), None);
        assert_eq!(cache.get_flags("INBOX", 7), None);
        assert_eq!(cache.get_dates("INBOX").date_for(7), None);
    }

    #[test]
    fn large_body_round_trips_through_encrypted_blob_and_is_not_plaintext_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir);
        let big_text = "A".repeat(1024 * 1024);
        let body = Body {
            text: Some(big_text.clone()),
            ..Default::default()
        };
        cache.put_body("INBOX", 1, &body).unwrap();

        let fetched = cache.get_body("INBOX", 1).unwrap();
        assert_eq!(fetched.text.as_deref(), Some(big_text.as_str()));

        let raw = fs::read(cache.body_path("INBOX", 1)).unwrap();
        assert!(!raw.windows(big_text.len().min(64)).any(|w| w == big_text.as_bytes()[..w.len()]));
    }

    #[test]
    fn unencrypted_store_writes_plaintext_json() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path().join("cache"), false, "unused").unwrap();
        cache.put_header("INBOX", 1, &sample_header()).unwrap();
        let raw = fs::read(cache.header_path("INBOX", 1)).unwrap();
        assert!(String::from_utf8(raw).unwrap().contains("\"subject\":\"hi\""));
    }

    #[test]
    fn missing_blob_is_a_miss_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir);
        assert!(cache.get_headers("INBOX", &[1].into_iter().collect()).is_empty());
        assert_eq!(cache.get_body("INBOX", 1), None);
        assert_eq!(cache.get_flags("INBOX", 1), None);
    }

    #[test]
    fn forget_folder_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir);
        cache.put_header("INBOX", 1, &sample_header()).unwrap();
        cache.forget_folder("INBOX").unwrap();
        assert!(cache.get_headers("INBOX", &[1].into_iter().collect()).is_empty());
        assert!(!cache.folder_dir("INBOX").exists());
    }

    #[test]
    fn folders_set_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = store(&dir);
        let folders: HashSet<String> = ["INBOX", "Sent", "Trash"].iter().map(|s| s.to_string()).collect();
        cache.put_folders(&folders).unwrap();
        assert_eq!(cache.get_folders(), folders);
    }
}
