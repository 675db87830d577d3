//! DM sub-mode: once a session enters DM mode with a peer (via a bare
//! name to `cd`, or a leading `=name`), subsequent lines are rerouted to
//! that peer instead of being broadcast, until `cd` with no peer name is
//! used to leave. Ported from the DM branch of `original_source/main.go`'s
//! `handleLine`.

use std::sync::Arc;

use tokio::sync::RwLock;

/// Per-session DM routing state. Lives alongside the session, not the
/// room, since a DM target is scoped to one connection.
#[derive(Default)]
pub struct DmRouter {
    peer: RwLock<Option<String>>,
}

impl DmRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(DmRouter::default())
    }

    pub async fn peer(&self) -> Option<String> {
        self.peer.read().await.clone()
    }

    pub async fn enter(&self, peer: impl Into<String>) {
        *self.peer.write().await = Some(peer.into());
    }

    pub async fn leave(&self) {
        *self.peer.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enter_then_leave_clears_peer() {
        let router = DmRouter::new();
        assert_eq!(router.peer().await, None);
        router.enter("bob").await;
        assert_eq!(router.peer().await, Some("bob".to_string()));
        router.leave().await;
        assert_eq!(router.peer().await, None);
    }
}
