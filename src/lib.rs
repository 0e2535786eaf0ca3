//! `nmail`: the synchronization core of a terminal email client — an
//! IMAP worker, an SMTP worker, an encrypted on-disk cache, and a
//! prefetch planner, wired together behind a direct-callback bus.

pub mod bus;
pub mod cache;
pub mod config;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod error;
pub mod lock;
pub mod mail;
pub mod prefetch;
pub mod session_keys;
