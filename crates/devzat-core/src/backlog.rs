//! Bounded replay buffer for `#main`. Ported from the `backlog` slice and
//! `sendBacklog` in `original_source/main.go`: a FIFO ring capped at
//! `backlog_len`, replayed to new joiners with adjacent timestamps
//! coalesced so a burst of messages doesn't print a clock stamp per line.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

const COALESCE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct BacklogEntry {
    pub rendered: String,
    pub at: DateTime<Utc>,
}

pub struct Backlog {
    capacity: usize,
    entries: RwLock<VecDeque<BacklogEntry>>,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Backlog { capacity, entries: RwLock::new(VecDeque::with_capacity(capacity)) }
    }

    pub async fn push(&self, rendered: String, at: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(BacklogEntry { rendered, at });
    }

    /// Snapshot of the current backlog, oldest first, with a `show_stamp`
    /// flag per entry: false when an entry lands within [`COALESCE_WINDOW`]
    /// of the previous one, so replay doesn't repeat a timestamp for a
    /// tight burst of messages.
    pub async fn replay(&self) -> Vec<(BacklogEntry, bool)> {
        let entries = self.entries.read().await;
        let mut out = Vec::with_capacity(entries.len());
        let mut last: Option<DateTime<Utc>> = None;
        for entry in entries.iter() {
            let show_stamp = match last {
                Some(prev) => (entry.at - prev) > chrono::Duration::from_std(COALESCE_WINDOW).unwrap(),
                None => true,
            };
            last = Some(entry.at);
            out.push((entry.clone(), show_stamp));
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backlog_is_bounded_and_fifo() {
        let backlog = Backlog::new(3);
        for i in 0..5 {
            backlog.push(format!("msg-{i}"), Utc::now()).await;
        }
        let replay = backlog.replay().await;
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[0].0.rendered, "msg-2");
        assert_eq!(replay[2].0.rendered, "msg-4");
    }

    #[tokio::test]
    async fn adjacent_entries_coalesce_timestamp() {
        let backlog = Backlog::new(10);
        let t0 = Utc::now();
        backlog.push("a".into(), t0).await;
        backlog.push("b".into(), t0 + chrono::Duration::seconds(5)).await;
        let replay = backlog.replay().await;
        assert!(replay[0].1);
        assert!(!replay[1].1);
    }
}
