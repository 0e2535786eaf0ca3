//! `PrefetchPlanner`: turns UI-state transitions into low-priority
//! background fetch requests (spec §4.5).
//!
//! Grounded on `bltz::app::actions::prefetch`'s debounce-and-dedup shape
//! (a state struct tracking in-flight/pending work plus a dedup set),
//! retargeted to react to explicit `UiStateTransition` values instead of a
//! live `ratatui` `AppState`, since this crate has no UI layer of its own.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::mail::imap::{ImapWorkerHandle, Priority, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrefetchLevel {
    None = 0,
    CurrentMessage = 1,
    CurrentView = 2,
    FullSync = 3,
}

/// Notifications the UI layer feeds into the planner.
#[derive(Debug, Clone)]
pub enum UiStateTransition {
    FolderChanged {
        folder: String,
        visible_uids: Vec<u32>,
        selected_uid: Option<u32>,
    },
    SelectionChanged {
        folder: String,
        selected_uid: Option<u32>,
    },
    OfflineToggled {
        online: bool,
    },
}

pub struct PrefetchPlanner {
    level: PrefetchLevel,
    handle: ImapWorkerHandle,
    cache: Arc<CacheStore>,
    requested_headers: HashSet<String>,
    requested_bodies: HashSet<String>,
    known_folders: Vec<String>,
}

impl PrefetchPlanner {
    pub fn new(level: PrefetchLevel, handle: ImapWorkerHandle, cache: Arc<CacheStore>) -> Self {
        Self {
            level,
            handle,
            cache,
            requested_headers: HashSet::new(),
            requested_bodies: HashSet::new(),
            known_folders: Vec::new(),
        }
    }

    /// The full list of folders to sweep at `FullSync`. The UI populates
    /// this once `ListFolders` resolves; unknown until then.
    pub fn set_known_folders(&mut self, folders: Vec<String>) {
        self.known_folders = folders;
    }

    fn invalidate(&mut self) {
        self.handle.bump_generation();
        self.requested_headers.clear();
        self.requested_bodies.clear();
    }

    fn request_once(&mut self, request: Request) {
        let key = request.dedup_key();
        let set = match &request {
            Request::FetchBody(..) => &mut self.requested_bodies,
            _ => &mut self.requested_headers,
        };
        if set.insert(key) {
            self.handle.submit_request(request, Priority::Prefetch);
        }
    }

    pub fn on_transition(&mut self, transition: UiStateTransition) {
        match &transition {
            UiStateTransition::FolderChanged { .. } | UiStateTransition::OfflineToggled { .. } => {
                self.invalidate();
            }
            UiStateTransition::SelectionChanged { .. } => {}
        }

        if self.level == PrefetchLevel::None {
            return;
        }

        match transition {
            UiStateTransition::OfflineToggled { online: false } => {}
            UiStateTransition::FolderChanged {
                folder,
                visible_uids,
                selected_uid,
            } => {
                self.plan_current(&folder, selected_uid);
                if self.level >= PrefetchLevel::CurrentView {
                    self.request_once(Request::FetchHeaders(folder.clone(), visible_uids));
                }
                if self.level >= PrefetchLevel::FullSync {
                    self.plan_full_sync(&folder);
                }
            }
            UiStateTransition::SelectionChanged { folder, selected_uid } => {
                self.plan_current(&folder, selected_uid);
            }
            UiStateTransition::OfflineToggled { online: true } => {}
        }
    }

    fn plan_current(&mut self, folder: &str, selected_uid: Option<u32>) {
        if self.level < PrefetchLevel::CurrentMessage {
            return;
        }
        if let Some(uid) = selected_uid {
            self.request_once(Request::FetchBody(folder.to_string(), uid));
        }
    }

    /// Sweeps every known folder for headers, then queues bodies for every
    /// cached UID across all folders in date-descending order (spec §4.5
    /// Level 3). `ListUids` is resubmitted per folder first so the UID set
    /// this sweep reads from cache keeps converging on the server's; a
    /// folder with no cached UIDs yet contributes no `FetchHeaders` this
    /// round but catches up once its `ListUids` response lands.
    fn plan_full_sync(&mut self, current_folder: &str) {
        let folders = self.known_folders.clone();
        let mut dated: Vec<(String, String, u32)> = Vec::new();

        for folder in &folders {
            self.request_once(Request::ListUids(folder.clone()));

            let uids = self.cache.get_uids(folder);
            if !uids.is_empty() {
                self.request_once(Request::FetchHeaders(folder.clone(), uids.iter().copied().collect()));
            }

            let dates = self.cache.get_dates(folder);
            for uid in dates.uids_by_date() {
                if let Some(date) = dates.date_for(uid) {
                    dated.push((folder.clone(), date.to_string(), uid));
                }
            }
        }

        dated.sort_by(|a, b| b.1.cmp(&a.1));
        for (folder, _, uid) in dated {
            self.request_once(Request::FetchBody(folder, uid));
        }

        let _ = current_folder;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::imap::Job;

    fn drain_prefetch(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Job>) -> Vec<Request> {
        let mut out = Vec::new();
        while let Ok(job) = rx.try_recv() {
            if let Job::Req { request, .. } = job {
                out.push(request);
            }
        }
        out
    }

    fn test_cache() -> Arc<CacheStore> {
        let dir = tempfile::tempdir().unwrap().into_path();
        Arc::new(CacheStore::open(dir.join("cache"), false, "pw").unwrap())
    }

    #[test]
    fn level_none_emits_nothing() {
        let (handle, _interactive, mut prefetch) = ImapWorkerHandle::for_test();
        let mut planner = PrefetchPlanner::new(PrefetchLevel::None, handle, test_cache());
        planner.on_transition(UiStateTransition::FolderChanged {
            folder: "INBOX".to_string(),
            visible_uids: vec![1, 2, 3],
            selected_uid: Some(1),
        });
        assert!(drain_prefetch(&mut prefetch).is_empty());
    }

    #[test]
    fn current_message_fetches_selected_body_only() {
        let (handle, _interactive, mut prefetch) = ImapWorkerHandle::for_test();
        let mut planner = PrefetchPlanner::new(PrefetchLevel::CurrentMessage, handle, test_cache());
        planner.on_transition(UiStateTransition::FolderChanged {
            folder: "INBOX".to_string(),
            visible_uids: vec![1, 2, 3],
            selected_uid: Some(2),
        });
        let emitted = drain_prefetch(&mut prefetch);
        assert_eq!(emitted, vec![Request::FetchBody("INBOX".to_string(), 2)]);
    }

    #[test]
    fn dedup_skips_repeated_identical_request() {
        let (handle, _interactive, mut prefetch) = ImapWorkerHandle::for_test();
        let mut planner = PrefetchPlanner::new(PrefetchLevel::CurrentMessage, handle, test_cache());
        let transition = UiStateTransition::SelectionChanged {
            folder: "INBOX".to_string(),
            selected_uid: Some(5),
        };
        planner.on_transition(transition.clone());
        planner.on_transition(transition);
        assert_eq!(drain_prefetch(&mut prefetch).len(), 1);
    }

    #[test]
    fn higher_level_is_a_superset_for_identical_state() {
        let folders = vec!["INBOX".to_string(), "Archive".to_string()];

        let (handle_low, _i1, mut prefetch_low) = ImapWorkerHandle::for_test();
        let mut low = PrefetchPlanner::new(PrefetchLevel::CurrentMessage, handle_low, test_cache());
        low.set_known_folders(folders.clone());

        let (handle_high, _i2, mut prefetch_high) = ImapWorkerHandle::for_test();
        let mut high = PrefetchPlanner::new(PrefetchLevel::FullSync, handle_high, test_cache());
        high.set_known_folders(folders);

        let transition = UiStateTransition::FolderChanged {
            folder: "INBOX".to_string(),
            visible_uids: vec![1, 2, 3],
            selected_uid: Some(1),
        };
        low.on_transition(transition.clone());
        high.on_transition(transition);

        let low_set: HashSet<Request> = drain_prefetch(&mut prefetch_low).into_iter().collect();
        let high_set: HashSet<Request> = drain_prefetch(&mut prefetch_high).into_iter().collect();
        assert!(low_set.is_subset(&high_set));
        assert!(low_set.len() < high_set.len());
    }

    #[test]
    fn full_sync_fetches_cached_uids_and_orders_bodies_by_date_descending() {
        let cache = test_cache();
        let mut uids = HashSet::new();
        uids.insert(1u32);
        uids.insert(2u32);
        cache.put_uids("INBOX", &uids).unwrap();
        let mut dates = cache.get_dates("INBOX");
        dates.insert(1, "2024-01-01T00:00:00+00:00".to_string());
        dates.insert(2, "2024-06-01T00:00:00+00:00".to_string());
        cache.put_dates("INBOX", &dates).unwrap();

        let (handle, _interactive, mut prefetch) = ImapWorkerHandle::for_test();
        let mut planner = PrefetchPlanner::new(PrefetchLevel::FullSync, handle, cache);
        planner.set_known_folders(vec!["INBOX".to_string()]);
        planner.on_transition(UiStateTransition::FolderChanged {
            folder: "INBOX".to_string(),
            visible_uids: vec![],
            selected_uid: None,
        });

        let emitted = drain_prefetch(&mut prefetch);
        assert!(emitted.contains(&Request::ListUids("INBOX".to_string())));
        assert!(emitted.iter().any(|r| matches!(r, Request::FetchHeaders(f, uids) if f == "INBOX" && uids.len() == 2)));

        let body_order: Vec<u32> = emitted
            .iter()
            .filter_map(|r| match r {
                Request::FetchBody(f, uid) if f == "INBOX" => Some(*uid),
                _ => None,
            })
            .collect();
        assert_eq!(body_order, vec![2, 1]);
    }

    #[test]
    fn folder_change_bumps_generation() {
        let (handle, _interactive, _prefetch) = ImapWorkerHandle::for_test();
        let start = handle.current_generation();
        let mut planner = PrefetchPlanner::new(PrefetchLevel::CurrentView, handle.clone(), test_cache());
        planner.on_transition(UiStateTransition::FolderChanged {
            folder: "INBOX".to_string(),
            visible_uids: vec![],
            selected_uid: None,
        });
        assert!(handle.current_generation() > start);
    }
}
