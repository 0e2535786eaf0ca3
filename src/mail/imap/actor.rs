//! The `ImapWorker` loop: two-lane priority queueing, cache-first
//! resolution, reconnect with exponential backoff, and IDLE (spec §4.3).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cache::CacheStore;
use crate::constants::{
    COMMAND_TIMEOUT_SECS, IDLE_TIMEOUT_SECS, RECONNECT_BACKOFF_INITIAL_SECS, RECONNECT_BACKOFF_MAX_SECS,
};
use crate::error::CoreError;
use crate::mail::parser::{date_index_key, extract_attachment_data, parse_body};

use super::client::ImapClient;
use super::{
    Action, ActionResult, ImapBus, ImapConfig, ImapWorkerHandle, Job, Priority, Request, Response,
    ResponsePayload, ResponseStatus, StatusUpdate,
};

/// Spawns the worker task and returns a handle for submitting work.
/// `online=false` means the connection is never opened; every Request is
/// served from cache only (spec §4.3 offline mode).
pub fn spawn_imap_worker(
    config: ImapConfig,
    password: String,
    online: bool,
    cache: Arc<CacheStore>,
    bus: Arc<ImapBus>,
) -> ImapWorkerHandle {
    let (interactive_tx, interactive_rx) = mpsc::unbounded_channel();
    let (prefetch_tx, prefetch_rx) = mpsc::unbounded_channel();
    let generation = Arc::new(AtomicU64::new(0));

    tokio::spawn(run(
        config,
        password,
        online,
        cache,
        bus,
        interactive_rx,
        prefetch_rx,
        generation.clone(),
    ));

    ImapWorkerHandle {
        interactive_tx,
        prefetch_tx,
        generation,
    }
}

async fn run(
    config: ImapConfig,
    password: String,
    online: bool,
    cache: Arc<CacheStore>,
    bus: Arc<ImapBus>,
    mut interactive_rx: mpsc::UnboundedReceiver<Job>,
    mut prefetch_rx: mpsc::UnboundedReceiver<Job>,
    generation: Arc<AtomicU64>,
) {
    let mut client = ImapClient::new(config, password);
    let mut backoff = RECONNECT_BACKOFF_INITIAL_SECS;
    let mut selected_folder_for_idle = "INBOX".to_string();
    let mut known_uids: HashSet<u32> = HashSet::new();
    let mut auth_halted = false;

    if online {
        auth_halted = connect_with_status(&mut client, &bus, &mut backoff).await == ConnectOutcome::AuthFailed;
    }

    macro_rules! dispatch {
        ($job:expr) => {
            handle_job(
                $job,
                &mut client,
                online,
                &cache,
                &bus,
                &generation,
                &mut selected_folder_for_idle,
                &mut auth_halted,
            )
            .await
        };
    }

    'work: loop {
        if let Ok(job) = interactive_rx.try_recv() {
            if dispatch!(job) {
                break 'work;
            }
            continue;
        }
        if let Ok(job) = prefetch_rx.try_recv() {
            if dispatch!(job) {
                break 'work;
            }
            continue;
        }

        if !online {
            tokio::select! {
                job = interactive_rx.recv() => {
                    match job {
                        Some(job) => if dispatch!(job) { break 'work; },
                        None => break 'work,
                    }
                }
                job = prefetch_rx.recv() => {
                    if let Some(job) = job && dispatch!(job) {
                        break 'work;
                    }
                }
            }
            continue;
        }

        if !client.is_connected() {
            // Auth failures stay Disconnected and are never auto-retried on a
            // timer (spec §7): only a fresh Interactive submission (the UI
            // resubmitting, presumably after a credential update) attempts
            // another connect, via the one-shot retry in `handle_request`.
            // In-flight Prefetch is simply discarded while halted.
            if auth_halted {
                tokio::select! {
                    biased;
                    job = interactive_rx.recv() => {
                        match job {
                            Some(job) => if dispatch!(job) { break 'work; },
                            None => break 'work,
                        }
                    }
                    job = prefetch_rx.recv() => { let _ = job; }
                }
                continue;
            }

            tokio::select! {
                biased;
                job = interactive_rx.recv() => {
                    match job {
                        Some(job) => if dispatch!(job) { break 'work; },
                        None => break 'work,
                    }
                    continue;
                }
                _ = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            }
            auth_halted = connect_with_status(&mut client, &bus, &mut backoff).await == ConnectOutcome::AuthFailed;
            continue;
        }

        tokio::select! {
            biased;
            job = interactive_rx.recv() => {
                match job {
                    Some(job) => if dispatch!(job) { break 'work; },
                    None => break 'work,
                }
            }
            job = prefetch_rx.recv() => {
                if let Some(job) = job && dispatch!(job) {
                    break 'work;
                }
            }
            idle_result = client.idle_for(Duration::from_secs(IDLE_TIMEOUT_SECS)) => {
                match idle_result {
                    Ok(true) => {
                        if let Ok(uids) = client.list_uids(&selected_folder_for_idle).await {
                            let fresh: HashSet<u32> = uids.into_iter().collect();
                            let new_uids: HashSet<u32> = fresh.difference(&known_uids).copied().collect();
                            known_uids = fresh;
                            if !new_uids.is_empty() {
                                bus.emit_status(StatusUpdate {
                                    connected: true,
                                    error: None,
                                    new_uids: Some((selected_folder_for_idle.clone(), new_uids)),
                                });
                            }
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("IDLE error, reconnecting: {e}");
                        client.disconnect().await;
                        bus.emit_status(StatusUpdate { connected: false, error: Some(e.to_string()), new_uids: None });
                    }
                }
            }
        }
    }

    client.disconnect().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectOutcome {
    Connected,
    AuthFailed,
    Failed,
}

/// Attempts one connect, emitting the resulting `StatusUpdate`. Auth
/// failures (spec §7) do not grow `backoff` or get special treatment here
/// beyond being reported distinctly: it is the caller's job to stop
/// scheduling further automatic attempts when the outcome is `AuthFailed`.
async fn connect_with_status(client: &mut ImapClient, bus: &Arc<ImapBus>, backoff: &mut u64) -> ConnectOutcome {
    match tokio::time::timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), client.connect()).await {
        Ok(Ok(())) => {
            *backoff = RECONNECT_BACKOFF_INITIAL_SECS;
            bus.emit_status(StatusUpdate { connected: true, error: None, new_uids: None });
            ConnectOutcome::Connected
        }
        Ok(Err(e @ CoreError::Auth(_))) => {
            bus.emit_status(StatusUpdate {
                connected: false,
                error: Some(e.to_string()),
                new_uids: None,
            });
            ConnectOutcome::AuthFailed
        }
        Ok(Err(e)) => {
            *backoff = (*backoff * 2).min(RECONNECT_BACKOFF_MAX_SECS);
            bus.emit_status(StatusUpdate {
                connected: false,
                error: Some(e.to_string()),
                new_uids: None,
            });
            ConnectOutcome::Failed
        }
        Err(_) => {
            *backoff = (*backoff * 2).min(RECONNECT_BACKOFF_MAX_SECS);
            bus.emit_status(StatusUpdate {
                connected: false,
                error: Some("connect timed out".to_string()),
                new_uids: None,
            });
            ConnectOutcome::Failed
        }
    }
}

/// Returns `true` when the worker should stop its loop (`LogoutAndExit`
/// was processed).
#[allow(clippy::too_many_arguments)]
async fn handle_job(
    job: Job,
    client: &mut ImapClient,
    online: bool,
    cache: &Arc<CacheStore>,
    bus: &Arc<ImapBus>,
    generation: &Arc<AtomicU64>,
    selected_folder_for_idle: &mut String,
    auth_halted: &mut bool,
) -> bool {
    match job {
        Job::Req { request, priority, generation: req_generation } => {
            if priority == Priority::Prefetch && req_generation != generation.load(Ordering::SeqCst) {
                return false;
            }
            handle_request(request, online, priority, client, cache, bus, selected_folder_for_idle, auth_halted).await;
            false
        }
        Job::Act(action) => handle_action(action, client, cache, bus).await,
    }
}

/// Performs the server side of `request` once: no retry, no status
/// emission. Cache is updated on success. Factored out of
/// [`handle_request`] so the retry-once-after-reconnect policy (spec
/// §4.3/§8 scenario S6) can call it twice without duplicating the match.
async fn fetch_from_server(request: &Request, client: &mut ImapClient, cache: &CacheStore) -> anyhow::Result<ResponsePayload> {
    match request {
        Request::ListFolders => {
            let folders = client.list_folders().await?;
            let set: HashSet<String> = folders.into_iter().collect();
            cache.put_folders(&set).ok();
            Ok(ResponsePayload::Folders(set))
        }
        Request::ListUids(folder) => {
            let uids = client.list_uids(folder).await?;
            let set: HashSet<u32> = uids.into_iter().collect();
            cache.put_uids(folder, &set).ok();
            Ok(ResponsePayload::Uids(set))
        }
        Request::FetchHeaders(folder, uids) => {
            let headers = client.fetch_headers(folder, uids).await?;
            if !headers.is_empty() {
                let mut dates = cache.get_dates(folder);
                for (uid, header) in &headers {
                    cache.put_header(folder, *uid, header).ok();
                    dates.insert(*uid, date_index_key(header.date));
                }
                cache.put_dates(folder, &dates).ok();
            }
            Ok(ResponsePayload::Headers(headers))
        }
        Request::FetchBody(folder, uid) => match client.fetch_body_raw(folder, *uid).await? {
            Some(raw) => {
                let body = parse_body(&raw);
                cache.put_body(folder, *uid, &body).ok();
                Ok(ResponsePayload::Body(Some(body)))
            }
            None => Ok(ResponsePayload::Body(None)),
        },
        Request::FetchFlags(folder, uids) => {
            let flags = client.fetch_flags(folder, uids).await?;
            for (uid, f) in &flags {
                cache.put_flags(folder, *uid, *f).ok();
            }
            Ok(ResponsePayload::Flags(flags))
        }
        Request::FetchAttachment(folder, uid, index) => match client.fetch_body_raw(folder, *uid).await? {
            Some(raw) => Ok(ResponsePayload::Attachment(extract_attachment_data(&raw, *index))),
            None => Ok(ResponsePayload::Attachment(None)),
        },
    }
}

/// Serves one `Request`, cache-first then server. On a server failure,
/// Interactive requests are retried once after a reconnect attempt (spec
/// §4.3/§8 scenario S6); Prefetch requests in flight at disconnect are
/// discarded instead — no retry, no second `Response` (spec §4.3).
#[allow(clippy::too_many_arguments)]
async fn handle_request(
    request: Request,
    online: bool,
    priority: Priority,
    client: &mut ImapClient,
    cache: &Arc<CacheStore>,
    bus: &Arc<ImapBus>,
    selected_folder_for_idle: &mut String,
    auth_halted: &mut bool,
) {
    let cached = resolve_from_cache(&request, cache, online);
    bus.emit_response(request.clone(), cached);

    if !online {
        return;
    }

    let fetched = match fetch_from_server(&request, client, cache).await {
        Ok(payload) => Some(Response {
            from_cache: false,
            status: ResponseStatus::Ok,
            payload,
        }),
        Err(first_err) => {
            tracing::warn!("request failed: {first_err}");
            client.disconnect().await;
            bus.emit_status(StatusUpdate {
                connected: false,
                error: Some(first_err.to_string()),
                new_uids: None,
            });

            if priority == Priority::Prefetch {
                None
            } else {
                let mut backoff = RECONNECT_BACKOFF_INITIAL_SECS;
                let outcome = connect_with_status(client, bus, &mut backoff).await;
                *auth_halted = outcome == ConnectOutcome::AuthFailed;

                if client.is_connected() {
                    match fetch_from_server(&request, client, cache).await {
                        Ok(payload) => Some(Response {
                            from_cache: false,
                            status: ResponseStatus::Ok,
                            payload,
                        }),
                        Err(second_err) => Some(err_response(&request, second_err)),
                    }
                } else {
                    Some(err_response(&request, first_err))
                }
            }
        }
    };

    if let Request::FetchHeaders(folder, _) | Request::FetchBody(folder, _) | Request::FetchFlags(folder, _) = &request {
        *selected_folder_for_idle = folder.clone();
    }

    if let Some(response) = fetched {
        bus.emit_response(request, response);
    }
}

fn err_response(request: &Request, e: anyhow::Error) -> Response {
    let payload = match request {
        Request::ListFolders => ResponsePayload::Folders(HashSet::new()),
        Request::ListUids(_) => ResponsePayload::Uids(HashSet::new()),
        Request::FetchHeaders(..) => ResponsePayload::Headers(HashMap::new()),
        Request::FetchBody(..) => ResponsePayload::Body(None),
        Request::FetchFlags(..) => ResponsePayload::Flags(HashMap::new()),
        Request::FetchAttachment(..) => ResponsePayload::Attachment(None),
    };
    Response {
        from_cache: false,
        status: ResponseStatus::Error(e.to_string()),
        payload,
    }
}

/// `OfflineMiss` marks a response that did not fully satisfy the request
/// from cache while offline (spec §4.3/§8 scenario S2); otherwise `Ok`.
/// Irrelevant while online, since the server fetch that follows covers
/// the residual portion.
fn offline_status(online: bool, requested: usize, found: usize) -> ResponseStatus {
    if !online && found < requested {
        ResponseStatus::OfflineMiss
    } else {
        ResponseStatus::Ok
    }
}

fn resolve_from_cache(request: &Request, cache: &CacheStore, online: bool) -> Response {
    match request {
        Request::ListFolders => Response {
            from_cache: true,
            status: ResponseStatus::Ok,
            payload: ResponsePayload::Folders(cache.get_folders()),
        },
        Request::ListUids(folder) => Response {
            from_cache: true,
            status: ResponseStatus::Ok,
            payload: ResponsePayload::Uids(cache.get_uids(folder)),
        },
        Request::FetchHeaders(folder, uids) => {
            let set = uids.iter().copied().collect();
            let headers = cache.get_headers(folder, &set);
            let status = offline_status(online, uids.len(), headers.len());
            Response {
                from_cache: true,
                status,
                payload: ResponsePayload::Headers(headers),
            }
        }
        Request::FetchBody(folder, uid) => {
            let body = cache.get_body(folder, *uid);
            let status = offline_status(online, 1, body.is_some() as usize);
            Response {
                from_cache: true,
                status,
                payload: ResponsePayload::Body(body),
            }
        }
        Request::FetchFlags(folder, uids) => {
            let mut out = std::collections::HashMap::new();
            for &uid in uids {
                if let Some(flags) = cache.get_flags(folder, uid) {
                    out.insert(uid, flags);
                }
            }
            let status = offline_status(online, uids.len(), out.len());
            Response {
                from_cache: true,
                status,
                payload: ResponsePayload::Flags(out),
            }
        }
        Request::FetchAttachment(..) => Response {
            from_cache: true,
            status: offline_status(online, 1, 0),
            payload: ResponsePayload::Attachment(None),
        },
    }
}

/// Returns `true` for `LogoutAndExit`, signalling the worker loop to stop.
async fn handle_action(action: Action, client: &mut ImapClient, cache: &Arc<CacheStore>, bus: &Arc<ImapBus>) -> bool {
    if matches!(action, Action::LogoutAndExit) {
        client.disconnect().await;
        bus.emit_result(action, ActionResult { ok: true, error: None });
        bus.shutdown();
        return true;
    }

    let result = match &action {
        Action::MarkSeen(folder, uid) => client.mark_seen(folder, *uid).await,
        Action::MoveMessage(folder, uid, dest) => client.move_message(folder, *uid, dest).await.inspect(|_| {
            let _ = cache.expunge(folder, *uid);
        }),
        Action::DeleteMessage(folder, uid) => client.delete_message(folder, *uid).await.inspect(|_| {
            let _ = cache.expunge(folder, *uid);
        }),
        Action::UploadDraft(folder, rfc822) => client.append(folder, rfc822).await,
        Action::LogoutAndExit => unreachable!(),
    };

    let outcome = match result {
        Ok(()) => ActionResult { ok: true, error: None },
        Err(e) => ActionResult { ok: false, error: Some(e.to_string()) },
    };
    bus.emit_result(action, outcome);
    false
}
