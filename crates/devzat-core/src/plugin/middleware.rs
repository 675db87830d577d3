//! The middleware chain: plugins that registered with `middleware = true`
//! get first refusal on every outgoing message, in registration order, and
//! may rewrite or drop it. Ported from the `middlewares` slice walk in
//! `original_source/rpc.go`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::warn;

use devzat_proto::Event;

/// One registered middleware listener's half of the bidirectional stream:
/// a channel to push events to it, and a slot for the response to the
/// event currently in flight. Only one event is in flight per listener at
/// a time, matching the original's synchronous per-plugin call.
pub struct MiddlewareSlot {
    to_plugin: mpsc::Sender<Event>,
    pending: Mutex<Option<oneshot::Sender<Option<String>>>>,
}

impl MiddlewareSlot {
    pub fn new(to_plugin: mpsc::Sender<Event>) -> Self {
        MiddlewareSlot { to_plugin, pending: Mutex::new(None) }
    }

    /// Called from the server's receive loop when this listener sends a
    /// `MiddlewareResponse` back. Fulfils whatever `call` is waiting.
    pub async fn resolve(&self, msg: Option<String>) {
        if let Some(tx) = self.pending.lock().await.take() {
            let _ = tx.send(msg);
        }
    }
}

/// Ordered set of active middleware listeners. Registration order is
/// preserved by appending to the `Vec`; a listener is removed on stream
/// disconnect.
#[derive(Default)]
pub struct MiddlewareChain {
    slots: Mutex<Vec<(u64, Arc<MiddlewareSlot>)>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        MiddlewareChain::default()
    }

    pub async fn register(&self, id: u64, slot: Arc<MiddlewareSlot>) {
        self.slots.lock().await.push((id, slot));
    }

    pub async fn unregister(&self, id: u64) {
        self.slots.lock().await.retain(|(slot_id, _)| *slot_id != id);
    }

    /// Run `event` through every registered middleware in order. Each may
    /// replace the message text or drop it entirely (`Ok(None)`). A
    /// listener that doesn't answer is skipped rather than blocking the
    /// whole chain forever.
    pub async fn apply(&self, mut event: Event) -> Option<Event> {
        let slots: Vec<_> = self.slots.lock().await.iter().map(|(_, s)| Arc::clone(s)).collect();
        for slot in slots {
            let (tx, rx) = oneshot::channel();
            *slot.pending.lock().await = Some(tx);
            if slot.to_plugin.send(event.clone()).await.is_err() {
                continue;
            }
            match tokio::time::timeout(std::time::Duration::from_secs(3), rx).await {
                Ok(Ok(Some(replacement))) => event.msg = replacement,
                Ok(Ok(None)) => return None,
                Ok(Err(_)) => {}
                Err(_) => warn!("middleware did not respond within the timeout, passing message through"),
            }
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn middleware_chain_applies_in_order() {
        let chain = MiddlewareChain::new();

        let (tx1, mut rx1) = mpsc::channel(1);
        let slot1 = Arc::new(MiddlewareSlot::new(tx1));
        chain.register(1, Arc::clone(&slot1)).await;

        let (tx2, mut rx2) = mpsc::channel(1);
        let slot2 = Arc::new(MiddlewareSlot::new(tx2));
        chain.register(2, Arc::clone(&slot2)).await;

        let responder1 = tokio::spawn(async move {
            rx1.recv().await.unwrap();
            slot1.resolve(Some("stage1".to_string())).await;
        });
        let responder2 = tokio::spawn(async move {
            let ev = rx2.recv().await.unwrap();
            assert_eq!(ev.msg, "stage1");
            slot2.resolve(Some("stage2".to_string())).await;
        });

        let event = Event { room: "main".into(), from: "alice".into(), msg: "original".into() };
        let result = chain.apply(event).await;
        responder1.await.unwrap();
        responder2.await.unwrap();

        assert_eq!(result.unwrap().msg, "stage2");
    }

    #[tokio::test]
    async fn middleware_can_drop_message() {
        let chain = MiddlewareChain::new();
        let (tx, mut rx) = mpsc::channel(1);
        let slot = Arc::new(MiddlewareSlot::new(tx));
        chain.register(1, Arc::clone(&slot)).await;

        let responder = tokio::spawn(async move {
            rx.recv().await.unwrap();
            slot.resolve(None).await;
        });

        let event = Event { room: "main".into(), from: "bob".into(), msg: "spam".into() };
        let result = chain.apply(event).await;
        responder.await.unwrap();
        assert!(result.is_none());
    }
}
