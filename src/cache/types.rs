//! Cacheable mail data types (spec §3).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

bitflags! {
    /// Per-UID mutable flag bitmask. Bit layout matches the server's
    /// `\Seen`/`\Answered`/`\Flagged`/`\Deleted`/`\Draft` system flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Flags: u32 {
        const SEEN     = 0b0000_0001;
        const ANSWERED = 0b0000_0010;
        const FLAGGED  = 0b0000_0100;
        const DELETED  = 0b0000_1000;
        const DRAFT    = 0b0001_0000;
    }
}

/// A structural summary of a message — drives list views, cheap to cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    /// Epoch seconds, UTC (spec §3 date normalization, see
    /// [`crate::mail::parser::normalize_date`]).
    pub date: i64,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
}

/// One MIME part of a [`Body`], used for attachment navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub index: usize,
    pub content_type: String,
    pub filename: Option<String>,
    pub size: usize,
}

impl Part {
    pub fn is_attachment(&self) -> bool {
        self.filename.is_some()
    }
}

/// The full MIME body, including a part list for attachment navigation.
/// Attachment bytes themselves are fetched on demand
/// (`Request::FetchAttachment`), not stored inline here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub text: Option<String>,
    pub html: Option<String>,
    pub parts: Vec<Part>,
}

/// Per-folder bidirectional `date-string <-> UID` map, used to order
/// messages by server date stably across sessions even when UIDs are
/// non-monotonic in time (spec §3).
#[derive(Debug, Clone, Default)]
pub struct DateIndex {
    by_date: BTreeMap<String, u32>,
    by_uid: HashMap<u32, String>,
}

impl DateIndex {
    pub fn insert(&mut self, uid: u32, date: String) {
        if let Some(old_date) = self.by_uid.insert(uid, date.clone()) {
            self.by_date.remove(&old_date);
        }
        self.by_date.insert(date, uid);
    }

    pub fn remove(&mut self, uid: u32) {
        if let Some(date) = self.by_uid.remove(&uid) {
            self.by_date.remove(&date);
        }
    }

    pub fn date_for(&self, uid: u32) -> Option<&str> {
        self.by_uid.get(&uid).map(String::as_str)
    }

    /// UIDs ordered by date, ascending.
    pub fn uids_by_date(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_date.values().copied()
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }

    /// Drop rows whose UID is no longer in the folder's current UID set
    /// (spec §3 invariant: stale entries are purged on observing expunge).
    pub fn purge_stale(&mut self, current_uids: &std::collections::HashSet<u32>) {
        let stale: Vec<u32> = self
            .by_uid
            .keys()
            .copied()
            .filter(|uid| !current_uids.contains(uid))
            .collect();
        for uid in stale {
            self.remove(uid);
        }
    }

    /// Serialize as `UID\t<date>` lines, matching the on-disk `dates` file
    /// format (spec §4.2).
    pub fn to_lines(&self) -> String {
        let mut lines: Vec<(u32, &str)> = self
            .by_uid
            .iter()
            .map(|(uid, date)| (*uid, date.as_str()))
            .collect();
        lines.sort_by_key(|(uid, _)| *uid);
        lines
            .into_iter()
            .map(|(uid, date)| format!("{uid}\t{date}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn from_lines(s: &str) -> Self {
        let mut index = Self::default();
        for line in s.lines() {
            let Some((uid_str, date)) = line.split_once('\t') else {
                continue;
            };
            if let Ok(uid) = uid_str.parse::<u32>() {
                index.insert(uid, date.to_string());
            }
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_index_round_trips_through_lines() {
        let mut index = DateIndex::default();
        index.insert(3, "2024-01-03T00:00:00Z".to_string());
        index.insert(1, "2024-01-01T00:00:00Z".to_string());
        index.insert(2, "2024-01-02T00:00:00Z".to_string());

        let restored = DateIndex::from_lines(&index.to_lines());
        assert_eq!(restored.date_for(1), Some("2024-01-01T00:00:00Z"));
        assert_eq!(
            restored.uids_by_date().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn purge_stale_drops_expunged_uids() {
        let mut index = DateIndex::default();
        index.insert(1, "2024-01-01T00:00:00Z".to_string());
        index.insert(2, "2024-01-02T00:00:00Z".to_string());

        let current: std::collections::HashSet<u32> = [2].into_iter().collect();
        index.purge_stale(&current);

        assert_eq!(index.date_for(1), None);
        assert_eq!(index.date_for(2), Some("2024-01-02T00:00:00Z"));
    }

    #[test]
    fn reinserting_uid_moves_it_in_date_order() {
        let mut index = DateIndex::default();
        index.insert(1, "2024-01-01T00:00:00Z".to_string());
        index.insert(1, "2024-06-01T00:00:00Z".to_string());
        assert_eq!(index.len(), 1);
        assert_eq!(index.date_for(1), Some("2024-06-01T00:00:00Z"));
    }
}
