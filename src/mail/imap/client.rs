//! IMAP protocol operations: connect, LIST, SELECT, FETCH, STORE, COPY,
//! EXPUNGE, APPEND.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_imap::types::Flag;
use futures::StreamExt;

use crate::cache::{Flags, Header};
use crate::error::CoreError;
use crate::mail::parser::{parse_flags_from_imap, parse_header};

use super::{ImapConfig, ImapSession};

pub struct ImapClient {
    pub(crate) config: ImapConfig,
    pub(crate) password: String,
    pub(crate) session: Option<ImapSession>,
    pub(crate) selected_folder: Option<String>,
}

impl ImapClient {
    pub fn new(config: ImapConfig, password: String) -> Self {
        Self {
            config,
            password,
            session: None,
            selected_folder: None,
        }
    }

    /// Opens the TCP+TLS connection and logs in. The error is classified
    /// at the source (spec §7): a failed TCP connect or TLS handshake is
    /// `CoreError::Network` (recoverable, triggers reconnect with
    /// backoff); a rejected login is `CoreError::Auth` (the worker loop
    /// stops auto-retrying and waits for the UI to resubmit).
    pub async fn connect(&mut self) -> crate::error::Result<()> {
        use async_native_tls::TlsConnector;
        use tokio::net::TcpStream;
        use tokio_util::compat::TokioAsyncReadCompatExt;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| CoreError::Network(format!("failed to connect to {addr}: {e}")))?;
        let tls = TlsConnector::new()
            .connect(&self.config.host, tcp.compat())
            .await
            .map_err(|e| CoreError::Network(format!("TLS handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls);
        let session = client
            .login(&self.config.username, &self.password)
            .await
            .map_err(|e| CoreError::Auth(format!("{:?}", e.0)))?;

        self.session = Some(session);
        self.selected_folder = None;
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.logout().await;
        }
        self.selected_folder = None;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn take_session(&mut self) -> Option<ImapSession> {
        self.session.take()
    }

    pub fn restore_session(&mut self, session: ImapSession) {
        self.session = Some(session);
    }

    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session.as_mut().context("not connected to IMAP server")
    }

    /// Selects `folder` only if it isn't already the selected one (spec
    /// §4.3's lazy-SELECT rule).
    pub async fn select_folder_lazy(&mut self, folder: &str) -> Result<()> {
        if self.selected_folder.as_deref() == Some(folder) {
            return Ok(());
        }
        self.session()?
            .select(folder)
            .await
            .with_context(|| format!("failed to select folder '{folder}'"))?;
        self.selected_folder = Some(folder.to_string());
        Ok(())
    }

    pub async fn list_folders(&mut self) -> Result<Vec<String>> {
        let session = self.session()?;
        let mut stream = session.list(Some(""), Some("*")).await?;
        let mut folders = Vec::new();
        while let Some(item) = stream.next().await {
            if let Ok(name) = item {
                folders.push(name.name().to_string());
            }
        }
        Ok(folders)
    }

    pub async fn list_uids(&mut self, folder: &str) -> Result<Vec<u32>> {
        self.select_folder_lazy(folder).await?;
        let session = self.session()?;
        let uids = session.uid_search("ALL").await.context("UID SEARCH failed")?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    pub async fn fetch_headers(&mut self, folder: &str, uids: &[u32]) -> Result<HashMap<u32, Header>> {
        if uids.is_empty() {
            return Ok(HashMap::new());
        }
        self.select_folder_lazy(folder).await?;
        let uid_set = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let session = self.session()?;
        let mut messages = session
            .uid_fetch(&uid_set, "(UID BODY.PEEK[])")
            .await
            .context("FETCH failed")?;

        let mut out = HashMap::new();
        while let Some(item) = messages.next().await {
            let fetch = item.context("FETCH response error")?;
            let (Some(uid), Some(raw)) = (fetch.uid, fetch.body()) else {
                continue;
            };
            if let Some(header) = parse_header(uid, raw) {
                out.insert(uid, header);
            }
        }
        Ok(out)
    }

    pub async fn fetch_body_raw(&mut self, folder: &str, uid: u32) -> Result<Option<Vec<u8>>> {
        self.select_folder_lazy(folder).await?;
        let session = self.session()?;
        let mut messages = session
            .uid_fetch(uid.to_string(), "BODY[]")
            .await
            .context("FETCH body failed")?;
        while let Some(item) = messages.next().await {
            let fetch = item.context("FETCH response error")?;
            if fetch.uid == Some(uid)
                && let Some(body) = fetch.body()
            {
                return Ok(Some(body.to_vec()));
            }
        }
        Ok(None)
    }

    pub async fn fetch_flags(&mut self, folder: &str, uids: &[u32]) -> Result<HashMap<u32, Flags>> {
        if uids.is_empty() {
            return Ok(HashMap::new());
        }
        self.select_folder_lazy(folder).await?;
        let uid_set = uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let session = self.session()?;
        let mut messages = session
            .uid_fetch(&uid_set, "(UID FLAGS)")
            .await
            .context("FETCH flags failed")?;

        let mut out = HashMap::new();
        while let Some(item) = messages.next().await {
            let fetch = item.context("FETCH response error")?;
            if let Some(uid) = fetch.uid {
                let flag_vec: Vec<Flag> = fetch.flags().collect();
                out.insert(uid, parse_flags_from_imap(&flag_vec));
            }
        }
        Ok(out)
    }

    pub async fn store_flag(&mut self, folder: &str, uid: u32, flag: &str, add: bool) -> Result<()> {
        self.select_folder_lazy(folder).await?;
        let session = self.session()?;
        let op = if add { "+FLAGS" } else { "-FLAGS" };
        let responses: Vec<_> = session
            .uid_store(uid.to_string(), format!("{op} ({flag})"))
            .await
            .context("STORE failed")?
            .collect()
            .await;
        for r in responses {
            r.context("STORE response error")?;
        }
        Ok(())
    }

    pub async fn mark_seen(&mut self, folder: &str, uid: u32) -> Result<()> {
        self.store_flag(folder, uid, "\\Seen", true).await
    }

    pub async fn move_message(&mut self, folder: &str, uid: u32, dest: &str) -> Result<()> {
        self.select_folder_lazy(folder).await?;
        let session = self.session()?;
        let responses: Vec<_> = session
            .uid_mv(uid.to_string(), dest)
            .await
            .context("UID MOVE failed")?
            .collect()
            .await;
        for r in responses {
            r.context("UID MOVE response error")?;
        }
        self.selected_folder = None;
        Ok(())
    }

    pub async fn delete_message(&mut self, folder: &str, uid: u32) -> Result<()> {
        self.store_flag(folder, uid, "\\Deleted", true).await?;
        let session = self.session()?;
        let cmd = format!("UID EXPUNGE {uid}");
        session
            .run_command_and_check_ok(&cmd)
            .await
            .context("UID EXPUNGE failed")?;
        Ok(())
    }

    pub async fn append(&mut self, folder: &str, rfc822: &[u8]) -> Result<()> {
        let session = self.session()?;
        session.append(folder, rfc822).await.context("APPEND failed")?;
        if self.selected_folder.as_deref() == Some(folder) {
            self.selected_folder = None;
        }
        Ok(())
    }

    pub async fn idle_for(&mut self, timeout: std::time::Duration) -> Result<bool> {
        let session = self.take_session().context("not connected")?;
        let mut idle = session.idle();
        idle.init().await.context("IDLE init failed")?;
        let (idle_future, _stop) = idle.wait();
        let result = tokio::time::timeout(timeout, idle_future).await;

        let session = idle.done().await.context("IDLE done failed")?;
        self.restore_session(session);

        match result {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(anyhow::anyhow!("IDLE error: {e:?}")),
            Err(_) => Ok(false),
        }
    }
}
