//! Protocol workers: IMAP (`imap`), SMTP (`smtp`), and RFC822/MIME parsing
//! (`parser`) shared by both.

pub mod imap;
pub mod parser;
pub mod smtp;

pub use imap::{Action, ActionResult, ImapBus, ImapConfig, ImapWorkerHandle, Priority, Request, Response, StatusUpdate, spawn_imap_worker};
pub use smtp::{Outbound, SmtpBus, SmtpConfig, SmtpResult, SmtpWorkerHandle, spawn_smtp_worker};
