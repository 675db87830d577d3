//! Passive listeners: plugins that register without `middleware = true`
//! just want a read-only tap on broadcast events, optionally filtered by a
//! regex, optionally closing after the first matching event. Ported from
//! the non-middleware branch of `original_source/rpc.go`'s
//! `RegisterListener`.

use regex::Regex;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use devzat_proto::Event;

struct PassiveSlot {
    to_plugin: mpsc::Sender<Event>,
    regex: Option<Regex>,
    once: bool,
}

/// Ordered set of active passive listeners, fanned out to on every real
/// chat broadcast (spec §4.7) without ever blocking the broadcast path.
#[derive(Default)]
pub struct PassiveListeners {
    slots: RwLock<Vec<(u64, PassiveSlot)>>,
}

impl PassiveListeners {
    pub fn new() -> Self {
        PassiveListeners::default()
    }

    pub async fn register(&self, id: u64, to_plugin: mpsc::Sender<Event>, regex: Option<Regex>, once: bool) {
        self.slots.write().await.push((id, PassiveSlot { to_plugin, regex, once }));
    }

    pub async fn unregister(&self, id: u64) {
        self.slots.write().await.retain(|(slot_id, _)| *slot_id != id);
    }

    /// Send `event` to every listener whose regex matches (or who has
    /// none), in parallel with the room broadcast. A full or closed inbox
    /// is dropped with a warning rather than allowed to stall anyone else;
    /// a `once` listener is unregistered right after it receives its event.
    pub async fn notify(&self, event: Event) {
        let mut fired = Vec::new();
        {
            let slots = self.slots.read().await;
            for (id, slot) in slots.iter() {
                if let Some(re) = &slot.regex {
                    if !re.is_match(&event.msg) {
                        continue;
                    }
                }
                if slot.to_plugin.try_send(event.clone()).is_err() {
                    warn!(listener_id = id, "passive plugin listener queue full or closed, dropping event");
                } else if slot.once {
                    fired.push(*id);
                }
            }
        }
        if !fired.is_empty() {
            self.slots.write().await.retain(|(id, _)| !fired.contains(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_reaches_unfiltered_listener() {
        let listeners = PassiveListeners::new();
        let (tx, mut rx) = mpsc::channel(4);
        listeners.register(1, tx, None, false).await;

        listeners.notify(Event { room: "main".into(), from: "alice".into(), msg: "hi".into() }).await;
        assert_eq!(rx.recv().await.unwrap().msg, "hi");
    }

    #[tokio::test]
    async fn notify_skips_non_matching_regex() {
        let listeners = PassiveListeners::new();
        let (tx, mut rx) = mpsc::channel(4);
        listeners.register(1, tx, Some(Regex::new("^deploy").unwrap()), false).await;

        listeners.notify(Event { room: "main".into(), from: "alice".into(), msg: "hi".into() }).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn once_listener_is_unregistered_after_first_event() {
        let listeners = PassiveListeners::new();
        let (tx, mut rx) = mpsc::channel(4);
        listeners.register(1, tx, None, true).await;

        listeners.notify(Event { room: "main".into(), from: "alice".into(), msg: "first".into() }).await;
        listeners.notify(Event { room: "main".into(), from: "alice".into(), msg: "second".into() }).await;

        assert_eq!(rx.recv().await.unwrap().msg, "first");
        assert!(rx.try_recv().is_err());
    }
}
