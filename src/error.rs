//! Typed error kinds shared by every core subsystem.
//!
//! Local cache errors never escape [`crate::cache`] as this type: they
//! degrade to misses at the `CacheStore` boundary (spec §7). Everything
//! else funnels through here so the UI layer can match on `kind()` instead
//! of parsing strings.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("application directory is locked by another instance")]
    Lock,

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("server rejected command: {0}")]
    Protocol(String),

    #[error("cache entry failed to decrypt")]
    CacheDecrypt,

    #[error("cache I/O error: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("message delivery failed: {0}")]
    SmtpSend(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
