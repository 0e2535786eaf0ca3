//! `SmtpWorker`: a single-FIFO actor that submits outbound mail and
//! surfaces delivery results, plus a secondary error queue for delayed
//! UI display (spec §4.4).
//!
//! Grounded on `bltz::mail::smtp::SmtpClient`'s transport construction
//! (`AsyncSmtpTransport::<Tokio1Executor>::starttls_relay`, STARTTLS,
//! `Mechanism::Plain`/`Login`) but restructured from a call-and-await
//! client into a long-lived worker task, since the teacher has no actor
//! here and spec.md §4.4 requires one FIFO with queued submission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tokio::sync::mpsc;

use crate::bus::AsyncBus;
use crate::constants::COMMAND_TIMEOUT_SECS;
use crate::error::CoreError;
use crate::mail::imap::{Action, ImapWorkerHandle};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// A message ready for the wire: raw RFC822 bytes plus the envelope
/// addresses the SMTP `MAIL FROM`/`RCPT TO` commands need (which may
/// differ from the `From`/`To` headers baked into `rfc822`).
#[derive(Debug, Clone)]
pub struct Outbound {
    pub rfc822: Vec<u8>,
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpErrorKind {
    Network,
    Auth,
    Timeout,
    Protocol,
}

#[derive(Debug, Clone)]
pub struct SmtpResult {
    pub ok: bool,
    pub message: Option<String>,
    pub error_kind: Option<SmtpErrorKind>,
    pub outbound_ref: u64,
}

pub type SmtpBus = AsyncBus<(), (), Outbound, SmtpResult, ()>;

enum Job {
    Send { outbound: Outbound, outbound_ref: u64 },
    Shutdown,
}

/// Options for the optional "also save a copy" behavior on successful
/// send (spec §4.4's `client_store_sent`).
pub struct ClientStoreSent {
    pub sent_folder: String,
    pub imap_handle: ImapWorkerHandle,
}

#[derive(Clone)]
pub struct SmtpWorkerHandle {
    tx: mpsc::UnboundedSender<Job>,
    next_ref: Arc<AtomicU64>,
    error_queue: Arc<Mutex<Vec<SmtpResult>>>,
}

impl SmtpWorkerHandle {
    /// Queues `outbound` for delivery and returns the reference id the
    /// eventual `SmtpResult` will carry.
    pub fn submit(&self, outbound: Outbound) -> u64 {
        let outbound_ref = self.next_ref.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Job::Send { outbound, outbound_ref });
        outbound_ref
    }

    /// Drains results that failed and have not yet been shown, for
    /// delayed display when the UI is not in a state to surface them
    /// immediately (spec §4.4).
    pub fn drain_errors(&self) -> Vec<SmtpResult> {
        std::mem::take(&mut self.error_queue.lock().unwrap())
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Job::Shutdown);
    }
}

fn build_transport(config: &SmtpConfig, password: &str) -> anyhow::Result<AsyncSmtpTransport<Tokio1Executor>> {
    let creds = Credentials::new(config.username.clone(), password.to_string());
    let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        .map_err(|e| anyhow::anyhow!("failed to build SMTP transport: {e}"))?
        .port(config.port)
        .credentials(creds)
        .authentication(vec![Mechanism::Plain, Mechanism::Login])
        .build();
    Ok(transport)
}

/// Classifies a `lettre` transport error at its source into the same
/// `CoreError` kinds `mail::imap::client::connect` uses (spec §7), rather
/// than sniffing the already-lossy `Display` text a second time downstream.
fn classify_error(e: &lettre::transport::smtp::Error) -> CoreError {
    if e.is_client() {
        CoreError::Protocol(e.to_string())
    } else {
        let text = e.to_string().to_lowercase();
        if text.contains("auth") || text.contains("credential") {
            CoreError::Auth(e.to_string())
        } else {
            CoreError::Network(e.to_string())
        }
    }
}

/// Maps a `CoreError` onto the `SmtpResult`-facing `SmtpErrorKind` the UI
/// matches on. `Timeout` has no `CoreError` counterpart (spec §7's kind list
/// is fixed) so `send_one` reports it directly, before this is ever called.
fn smtp_error_kind(e: &CoreError) -> SmtpErrorKind {
    match e {
        CoreError::Auth(_) => SmtpErrorKind::Auth,
        CoreError::Protocol(_) | CoreError::SmtpSend(_) => SmtpErrorKind::Protocol,
        _ => SmtpErrorKind::Network,
    }
}

async fn send_one(transport: &AsyncSmtpTransport<Tokio1Executor>, outbound: &Outbound) -> Result<(), (SmtpErrorKind, String)> {
    let from = outbound
        .envelope_from
        .parse()
        .map_err(|e| (SmtpErrorKind::Protocol, format!("invalid envelope-from: {e}")))?;
    let to = outbound
        .envelope_to
        .iter()
        .map(|a| a.parse())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| (SmtpErrorKind::Protocol, format!("invalid envelope-to: {e}")))?;
    let envelope = Envelope::new(Some(from), to).map_err(|e| (SmtpErrorKind::Protocol, e.to_string()))?;

    // No automatic retry here (spec §4.4: "the caller decides whether to
    // re-submit") — one attempt, classified and reported.
    let send = transport.send_raw(&envelope, &outbound.rfc822);
    match tokio::time::timeout(std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS), send).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            let core_err = classify_error(&e);
            Err((smtp_error_kind(&core_err), core_err.to_string()))
        }
        Err(_) => Err((SmtpErrorKind::Timeout, "SMTP command timed out".to_string())),
    }
}

pub fn spawn_smtp_worker(
    config: SmtpConfig,
    password: String,
    client_store_sent: Option<ClientStoreSent>,
    bus: Arc<SmtpBus>,
) -> anyhow::Result<SmtpWorkerHandle> {
    let transport = build_transport(&config, &password)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let error_queue = Arc::new(Mutex::new(Vec::new()));
    let handle = SmtpWorkerHandle {
        tx,
        next_ref: Arc::new(AtomicU64::new(0)),
        error_queue: error_queue.clone(),
    };

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Shutdown => {
                    bus.shutdown();
                    break;
                }
                Job::Send { outbound, outbound_ref } => {
                    let outcome = send_one(&transport, &outbound).await;
                    let result = match outcome {
                        Ok(()) => {
                            if let Some(store) = &client_store_sent {
                                store.imap_handle.submit_action(Action::UploadDraft(store.sent_folder.clone(), outbound.rfc822.clone()));
                            }
                            SmtpResult { ok: true, message: None, error_kind: None, outbound_ref }
                        }
                        Err((kind, message)) => {
                            let result = SmtpResult {
                                ok: false,
                                message: Some(message),
                                error_kind: Some(kind),
                                outbound_ref,
                            };
                            error_queue.lock().unwrap().push(result.clone());
                            result
                        }
                    };
                    bus.emit_result(outbound, result);
                }
            }
        }
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_ref_increments_per_submission() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = SmtpWorkerHandle {
            tx,
            next_ref: Arc::new(AtomicU64::new(0)),
            error_queue: Arc::new(Mutex::new(Vec::new())),
        };
        let a = handle.submit(Outbound {
            rfc822: vec![],
            envelope_from: "a@example.com".to_string(),
            envelope_to: vec!["b@example.com".to_string()],
        });
        let b = handle.submit(Outbound {
            rfc822: vec![],
            envelope_from: "a@example.com".to_string(),
            envelope_to: vec!["b@example.com".to_string()],
        });
        assert_eq!(b, a + 1);
    }

    #[test]
    fn smtp_error_kind_maps_core_error_variants() {
        assert_eq!(smtp_error_kind(&CoreError::Auth("x".to_string())), SmtpErrorKind::Auth);
        assert_eq!(smtp_error_kind(&CoreError::Protocol("x".to_string())), SmtpErrorKind::Protocol);
        assert_eq!(smtp_error_kind(&CoreError::Network("x".to_string())), SmtpErrorKind::Network);
    }

    #[test]
    fn drain_errors_empties_the_queue() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(vec![SmtpResult {
            ok: false,
            message: Some("boom".to_string()),
            error_kind: Some(SmtpErrorKind::Network),
            outbound_ref: 0,
        }]));
        let handle = SmtpWorkerHandle {
            tx,
            next_ref: Arc::new(AtomicU64::new(0)),
            error_queue: queue,
        };
        let drained = handle.drain_errors();
        assert_eq!(drained.len(), 1);
        assert!(handle.drain_errors().is_empty());
    }
}
