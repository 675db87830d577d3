//! Join-rate and message-rate abuse guards, plus the TOR exit-node list.
//! Ported from the `IDandIPsToTimesJoinedInMin`, `AntispamMessages`, and
//! `TORIPs` globals in `original_source/main.go`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::identity::Identity;

const JOIN_WINDOW: Duration = Duration::from_secs(60);
const JOIN_LIMIT: u32 = 6;

const MESSAGE_WINDOW: Duration = Duration::from_secs(15);
const MESSAGE_WARN_THRESHOLD: u32 = 30;
const MESSAGE_BAN_THRESHOLD: u32 = 50;

/// Tracks how many times an identity/address pair has joined in the last
/// minute. A 7th join within the window is a ban-worthy reconnect storm.
#[derive(Default)]
pub struct JoinRateLimiter {
    counts: RwLock<HashMap<String, Vec<tokio::time::Instant>>>,
}

pub enum JoinVerdict {
    Allowed,
    ShouldBan,
}

impl JoinRateLimiter {
    /// Record a join for `key` (addr or identity string) and report whether
    /// this connection should be banned for joining too often.
    #[instrument(skip(self))]
    pub async fn record_join(&self, key: &str) -> JoinVerdict {
        let now = tokio::time::Instant::now();
        let mut counts = self.counts.write().await;
        let entry = counts.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < JOIN_WINDOW);
        entry.push(now);

        if entry.len() as u32 > JOIN_LIMIT {
            warn!(key, joins = entry.len(), "join rate exceeded, recommending ban");
            JoinVerdict::ShouldBan
        } else {
            JoinVerdict::Allowed
        }
    }
}

pub enum MessageVerdict {
    Allowed,
    Warn,
    ShouldBan,
}

/// Per-session message counter that decays every [`MESSAGE_WINDOW`]. Ported
/// from `AntispamMessages[ip] -= decrement` in `main.go`'s ticker loop; here
/// each session owns its own counter instead of a shared map, since sessions
/// already own their own tokio task.
pub struct MessageRateLimiter {
    count: RwLock<u32>,
}

impl MessageRateLimiter {
    pub fn new() -> Self {
        MessageRateLimiter { count: RwLock::new(0) }
    }

    /// Call once per incoming line. Returns the verdict for this message.
    pub async fn record_message(&self) -> MessageVerdict {
        let mut count = self.count.write().await;
        *count += 1;
        if *count >= MESSAGE_BAN_THRESHOLD {
            MessageVerdict::ShouldBan
        } else if *count >= MESSAGE_WARN_THRESHOLD {
            MessageVerdict::Warn
        } else {
            MessageVerdict::Allowed
        }
    }

    /// Spawn the decay loop that knocks the counter back down every window,
    /// mirroring the ticker in `main.go`. Runs until `count` reaches zero,
    /// then exits rather than ticking forever on an idle session.
    pub fn spawn_decay(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MESSAGE_WINDOW);
            loop {
                interval.tick().await;
                let mut count = self.count.write().await;
                if *count == 0 {
                    break;
                }
                *count = count.saturating_sub(1);
            }
        });
    }
}

impl Default for MessageRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of known TOR exit-node addresses, fetched once at boot.
#[derive(Default)]
pub struct TorExitList {
    addrs: RwLock<std::collections::HashSet<String>>,
}

impl TorExitList {
    /// Fetch the newline-delimited exit list from `url`. A fetch failure is
    /// logged and leaves the list empty rather than blocking boot.
    #[instrument(skip(self))]
    pub async fn refresh(&self, url: &str) {
        if url.is_empty() {
            return;
        }
        match reqwest::get(url).await {
            Ok(resp) => match resp.text().await {
                Ok(body) => {
                    let set = body.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect();
                    *self.addrs.write().await = set;
                }
                Err(e) => warn!(error = %e, "failed to read TOR list body"),
            },
            Err(e) => warn!(error = %e, "failed to fetch TOR exit list"),
        }
    }

    pub async fn is_tor_exit(&self, addr: &str) -> bool {
        self.addrs.read().await.contains(addr)
    }
}

/// True if `identity` is exempt from TOR-based restrictions (none today;
/// kept as the natural seam for an allowlist, as the original's comments
/// imply admins sometimes want one).
pub fn is_exempt(_identity: &Identity) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seventh_join_in_window_recommends_ban() {
        let limiter = JoinRateLimiter::default();
        for _ in 0..6 {
            assert!(matches!(limiter.record_join("1.2.3.4").await, JoinVerdict::Allowed));
        }
        assert!(matches!(limiter.record_join("1.2.3.4").await, JoinVerdict::ShouldBan));
    }

    #[tokio::test]
    async fn message_thresholds_escalate() {
        let limiter = MessageRateLimiter::new();
        for _ in 0..29 {
            assert!(matches!(limiter.record_message().await, MessageVerdict::Allowed));
        }
        assert!(matches!(limiter.record_message().await, MessageVerdict::Warn));
        for _ in 0..19 {
            limiter.record_message().await;
        }
        assert!(matches!(limiter.record_message().await, MessageVerdict::ShouldBan));
    }
}
