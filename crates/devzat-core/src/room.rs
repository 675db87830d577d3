//! Rooms and the mention matcher. Room membership and lazy creation are
//! ported from the `Room`/`Rooms` types in `original_source/main.go`; the
//! longest-prefix mention matcher generalizes `libshpool`'s
//! `daemon::trie::Trie` (there used to match keybinding byte sequences)
//! to match `@name` prefixes against the set of names present in a room.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::error::DevzatError;
use crate::identity::Identity;
use crate::render;

const EMPTY_ROOM_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MAIN_ROOM: &str = "main";

const ANSI_MENTION: &str = "\x1b[36m";
const ANSI_EVERYONE: &str = "\x1b[1m";
const ANSI_RESET: &str = "\x1b[0m";

/// A rendered message offered to a third-party bridge (Slack/Discord/
/// Twitter-style integrations). Bridges themselves stay external
/// collaborators; this is just the shape [`Room::broadcast`] hands them.
#[derive(Debug, Clone)]
pub struct BridgeMessage {
    pub room: String,
    pub rendered: String,
}

/// One message handed to every subscriber of a room's broadcast channel.
/// `body` has markdown/emoji styling, `@everyone`, and mention-coloring
/// already applied by [`Room::broadcast_chat`], but is never word-wrapped:
/// spec §4.3 requires wrapping at each recipient's own terminal width, so
/// that step happens in the subscriber's own session loop.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// `None` for a system notice (join/part, a command's own broadcast);
    /// `Some(name)` for ordinary chat, so a recipient can tell their own
    /// message apart from everyone else's for bell purposes.
    pub sender: Option<String>,
    pub body: String,
}

/// A direct message delivered to one specific member's session, bypassing
/// the room-wide broadcast channel entirely. Spec §4.4: DM envelopes are
/// rendered by the recipient as `"{from} -> {body}"` and always ring a
/// bell unless the recipient's bell mode is `off`.
#[derive(Debug, Clone)]
pub struct DirectMessage {
    pub from: String,
    pub body: String,
}

/// A single member of a room, as seen by broadcast/mention logic. Session
/// state itself lives in [`crate::session`]; this is the slice a room needs
/// to know about its occupants.
#[derive(Debug, Clone)]
pub struct Member {
    pub identity: Identity,
    pub name: String,
    /// Reaches this member's session directly, independent of room
    /// membership, so a DM can be delivered without broadcasting it to
    /// everyone else in the room.
    pub outbox: mpsc::Sender<DirectMessage>,
}

pub struct Room {
    pub name: String,
    members: RwLock<Vec<Member>>,
    /// Broadcast channel every member's session subscribes to.
    tx: broadcast::Sender<RoomEvent>,
    /// Handle to the empty-room reaper, reset on every join/part so a busy
    /// room's timer never fires.
    reaper: RwLock<Option<JoinHandle<()>>>,
    /// Registered bridge queues (Slack/Discord/etc adapters), fanned out to
    /// on every broadcast with a non-blocking send.
    bridges: RwLock<Vec<mpsc::Sender<BridgeMessage>>>,
}

impl Room {
    fn new(name: impl Into<String>) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(1024);
        Arc::new(Room {
            name: name.into(),
            members: RwLock::new(Vec::new()),
            tx,
            reaper: RwLock::new(None),
            bridges: RwLock::new(Vec::new()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    /// Register a bridge queue to receive a copy of every broadcast in this
    /// room. The sender end is owned by the bridge adapter; this room only
    /// ever `try_send`s to it.
    pub async fn register_bridge(&self, tx: mpsc::Sender<BridgeMessage>) {
        self.bridges.write().await.push(tx);
    }

    /// Broadcast a system notice (join/part, a command's own reply-to-room,
    /// the embedded bot) with no sender attached and no mention processing.
    pub fn broadcast(&self, body: String) {
        self.send_event(RoomEvent { sender: None, body: body.clone() }, body);
    }

    /// Broadcast an ordinary chat line per spec §4.3: fan a copy to bridges,
    /// then (no-bridges path) replace `@everyone` with a coloured,
    /// bell-bearing form and colour any `@name` mention resolvable against
    /// the room's current membership before handing it to subscribers.
    pub async fn broadcast_chat(&self, sender: String, body: String) {
        let trie = {
            let members = self.members.read().await;
            MentionTrie::from_names(members.iter().map(|m| m.name.as_str()))
        };
        let body = colorize_mentions(&body, &trie);
        let body = highlight_everyone(&body);
        let bridge_text = format!("{sender}: {body}");
        self.send_event(RoomEvent { sender: Some(sender), body }, bridge_text);
    }

    /// Deliver `msg` to the single member named `to_name`, bypassing the
    /// room broadcast entirely. Returns false if no such member is present
    /// or their inbox is full/closed, so the caller can tell the sender.
    pub async fn deliver_direct(&self, to_name: &str, msg: DirectMessage) -> bool {
        let Some(member) = self.members.read().await.iter().find(|m| m.name == to_name).cloned() else {
            return false;
        };
        member.outbox.try_send(msg).is_ok()
    }

    fn send_event(&self, event: RoomEvent, bridge_text: String) {
        self.fan_out_to_bridges(&bridge_text);
        // No receivers is not an error: an empty room can still receive
        // e.g. from a plugin before anyone has joined.
        let _ = self.tx.send(event);
    }

    /// Non-blocking send to every registered bridge queue; a full or closed
    /// queue is dropped with a warning, never allowed to back-pressure the
    /// room's own broadcast.
    fn fan_out_to_bridges(&self, rendered: &str) {
        let Ok(bridges) = self.bridges.try_read() else { return };
        for tx in bridges.iter() {
            let message = BridgeMessage { room: self.name.clone(), rendered: rendered.to_string() };
            if tx.try_send(message).is_err() {
                warn!(room = %self.name, "bridge queue full or closed, dropping message");
            }
        }
    }

    pub async fn join(self: &Arc<Self>, member: Member) {
        let mut members = self.members.write().await;
        members.retain(|m| m.identity != member.identity);
        members.push(member);
        drop(members);
        self.cancel_reaper().await;
    }

    /// Returns true if the room is now empty and should be considered for
    /// cleanup.
    pub async fn part(self: &Arc<Self>, identity: &Identity) -> bool {
        let mut members = self.members.write().await;
        members.retain(|m| &m.identity != identity);
        let empty = members.is_empty() && self.name != MAIN_ROOM;
        drop(members);
        empty
    }

    pub async fn members(&self) -> Vec<Member> {
        self.members.read().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    async fn cancel_reaper(&self) {
        if let Some(handle) = self.reaper.write().await.take() {
            handle.abort();
        }
    }

    /// Schedule removal from `registry` after [`EMPTY_ROOM_TTL`] unless
    /// cancelled first by a join. `#main` is never reaped.
    async fn arm_reaper(self: &Arc<Self>, registry: Arc<RoomRegistry>) {
        if self.name == MAIN_ROOM {
            return;
        }
        let room = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(EMPTY_ROOM_TTL).await;
            registry.remove_if_empty(&room.name).await;
        });
        *self.reaper.write().await = Some(handle);
    }
}

/// Maps room names to their [`Room`] handles, with lazy creation on first
/// `cd` and the empty-room reaping described in spec §4.2.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(RoomRegistry { rooms: RwLock::new(HashMap::new()) })
    }

    /// Ensure `#main` exists. Call once at boot.
    pub async fn ensure_main(self: &Arc<Self>) -> Arc<Room> {
        self.get_or_create(MAIN_ROOM).await
    }

    #[instrument(skip(self))]
    pub async fn get_or_create(self: &Arc<Self>, name: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(name) {
            return Arc::clone(room);
        }
        let mut rooms = self.rooms.write().await;
        rooms.entry(name.to_string()).or_insert_with(|| Room::new(name)).clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// `rmdir`: remove a named, non-main, empty room immediately.
    pub async fn remove_now(&self, name: &str) -> Result<(), DevzatError> {
        if name == MAIN_ROOM {
            return Err(DevzatError::CannotRemoveMain);
        }
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(name) else { return Err(DevzatError::RoomNotFound(name.to_string())) };
        if !room.is_empty().await {
            return Err(DevzatError::RoomNotEmpty(name.to_string()));
        }
        drop(rooms);
        self.rooms.write().await.remove(name);
        Ok(())
    }

    async fn remove_if_empty(&self, name: &str) {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(name) else { return };
        if room.is_empty().await {
            drop(rooms);
            self.rooms.write().await.remove(name);
        }
    }

    /// Arm the empty-room reaper for `room` if it just went empty. Called
    /// by session teardown after [`Room::part`] returns true.
    pub async fn arm_reaper_for(self: &Arc<Self>, room: &Arc<Room>) {
        room.arm_reaper(Arc::clone(self)).await;
    }
}

/// A char-keyed trie over member names, used to resolve `@prefix` mentions
/// to the longest matching name without rescanning the whole member list
/// per keystroke. Structurally identical to `libshpool::daemon::trie::Trie`,
/// specialized to `char` symbols and `String` values.
#[derive(Debug)]
pub struct MentionTrie {
    nodes: Vec<TrieNode>,
}

#[derive(Debug)]
struct TrieNode {
    value: Option<String>,
    children: HashMap<char, usize>,
}

impl MentionTrie {
    pub fn new() -> Self {
        MentionTrie { nodes: vec![TrieNode { value: None, children: HashMap::new() }] }
    }

    pub fn from_names<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let mut trie = MentionTrie::new();
        for name in names {
            trie.insert(name);
        }
        trie
    }

    pub fn insert(&mut self, name: &str) {
        let mut current = 0;
        for ch in name.chars() {
            current = if let Some(&next) = self.nodes[current].children.get(&ch) {
                next
            } else {
                let idx = self.nodes.len();
                self.nodes.push(TrieNode { value: None, children: HashMap::new() });
                self.nodes[current].children.insert(ch, idx);
                idx
            };
        }
        self.nodes[current].value = Some(name.to_string());
    }

    /// Find the longest name in the trie that is a prefix of `input`,
    /// matching how `@alic` should resolve to `@alice` as soon as it is
    /// unambiguous, per spec §4.3.
    pub fn longest_prefix_match(&self, input: &str) -> Option<&str> {
        let mut current = 0;
        let mut best: Option<&str> = None;
        for ch in input.chars() {
            let Some(&next) = self.nodes[current].children.get(&ch) else { break };
            current = next;
            if let Some(value) = &self.nodes[current].value {
                best = Some(value.as_str());
            }
        }
        best
    }
}

impl Default for MentionTrie {
    fn default() -> Self {
        Self::new()
    }
}

/// Colour every `@name` mention in `body` that resolves against `trie`,
/// using longest-prefix match so `@alic` still highlights `alice` once it's
/// unambiguous. A `@` preceded by `\` is an escape: the backslash is
/// dropped and the `@` itself is left unmatched, per spec §4.3.
pub fn colorize_mentions(body: &str, trie: &MentionTrie) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(at) = rest.find('@') {
        let (before, from_at) = rest.split_at(at);
        if before.ends_with('\\') {
            out.push_str(&before[..before.len() - 1]);
            out.push('@');
            rest = &from_at[1..];
            continue;
        }
        out.push_str(before);
        let after_at = &from_at[1..];
        match trie.longest_prefix_match(after_at) {
            Some(name) => {
                out.push_str(&format!("{ANSI_MENTION}@{name}{ANSI_RESET}"));
                rest = &after_at[name.len()..];
            }
            None => {
                out.push('@');
                rest = after_at;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace every `@everyone` with a coloured form that carries its own
/// bell byte, per spec §4.3. Recipients with bell mode `off` strip it like
/// any other `\a`.
pub fn highlight_everyone(body: &str) -> String {
    body.replace("@everyone", &format!("{ANSI_EVERYONE}@everyone{ANSI_RESET}{}", render::BELL))
}

/// True if `message` contains a `@name`/`@name,`-style mention of `name`,
/// used to decide whether a mentioned user's bell should ring even with
/// bell-mode off. Ported from the substring check in
/// `original_source/main.go`'s message broadcast path.
pub fn mentions(message: &str, name: &str) -> bool {
    let needle = format!("@{name}");
    message
        .match_indices(&needle)
        .any(|(idx, _)| {
            let after = idx + needle.len();
            message[after..].chars().next().map_or(true, |c| !c.is_alphanumeric() && c != '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> Member {
        let (tx, _rx) = mpsc::channel(8);
        Member { identity: Identity::from_remote_addr(name), name: name.to_string(), outbox: tx }
    }

    #[tokio::test]
    async fn room_membership_is_singular() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("lounge").await;
        let id = Identity::from_remote_addr("a");
        let (tx, _rx) = mpsc::channel(8);
        room.join(Member { identity: id.clone(), name: "a".into(), outbox: tx.clone() }).await;
        room.join(Member { identity: id.clone(), name: "a-renamed".into(), outbox: tx }).await;
        let members = room.members().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "a-renamed");
    }

    #[tokio::test]
    async fn rmdir_refuses_nonempty_and_main() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("lounge").await;
        room.join(member("a")).await;
        assert!(matches!(registry.remove_now("lounge").await, Err(DevzatError::RoomNotEmpty(_))));
        assert!(matches!(registry.remove_now(MAIN_ROOM).await, Err(DevzatError::CannotRemoveMain)));
    }

    #[test]
    fn mention_trie_resolves_longest_prefix() {
        let trie = MentionTrie::from_names(["alice", "alicia", "bob"].into_iter());
        assert_eq!(trie.longest_prefix_match("alice is here"), Some("alice"));
        assert_eq!(trie.longest_prefix_match("alicia is here"), Some("alicia"));
        assert_eq!(trie.longest_prefix_match("al"), None);
    }

    #[test]
    fn mentions_requires_word_boundary() {
        assert!(mentions("hey @bob how are you", "bob"));
        assert!(!mentions("hey @bobby", "bob"));
    }

    #[tokio::test]
    async fn broadcast_fans_out_to_registered_bridges() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("lounge").await;
        let (tx, mut rx) = mpsc::channel(4);
        room.register_bridge(tx).await;

        room.broadcast("alice: hi".to_string());

        let message = rx.try_recv().expect("bridge should have received the message");
        assert_eq!(message.room, "lounge");
        assert_eq!(message.rendered, "alice: hi");
    }

    #[tokio::test]
    async fn broadcast_drops_on_a_full_bridge_queue() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("lounge").await;
        let (tx, _rx) = mpsc::channel(1);
        room.register_bridge(tx).await;

        room.broadcast("one".to_string());
        room.broadcast("two".to_string()); // second should be dropped, not block
    }

    #[test]
    fn colorize_mentions_highlights_resolvable_names_only() {
        let trie = MentionTrie::from_names(["bob"].into_iter());
        let out = colorize_mentions("hey @bob and @nobody", &trie);
        assert!(out.contains(&format!("{ANSI_MENTION}@bob{ANSI_RESET}")));
        assert!(out.contains("@nobody"));
    }

    #[test]
    fn colorize_mentions_respects_escaped_at() {
        let trie = MentionTrie::from_names(["bob"].into_iter());
        let out = colorize_mentions("not a mention: \\@bob", &trie);
        assert_eq!(out, "not a mention: @bob");
    }

    #[test]
    fn highlight_everyone_embeds_a_bell() {
        let out = highlight_everyone("ping @everyone please");
        assert!(out.contains(render::BELL));
        assert!(out.contains("@everyone"));
    }

    #[tokio::test]
    async fn broadcast_chat_colorizes_mentions_of_current_members() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("lounge").await;
        room.join(member("bob")).await;
        let mut rx = room.subscribe();

        room.broadcast_chat("alice".to_string(), "hi @bob".to_string()).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.sender, Some("alice".to_string()));
        assert!(event.body.contains(&format!("{ANSI_MENTION}@bob{ANSI_RESET}")));
    }

    #[tokio::test]
    async fn deliver_direct_reaches_named_member_only() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("lounge").await;
        let (tx, mut inbox) = mpsc::channel(8);
        room.join(Member { identity: Identity::from_remote_addr("bob"), name: "bob".into(), outbox: tx }).await;

        let delivered = room
            .deliver_direct("bob", DirectMessage { from: "alice".into(), body: "hello".into() })
            .await;
        assert!(delivered);
        assert_eq!(inbox.recv().await.unwrap().body, "hello");

        assert!(!room.deliver_direct("ghost", DirectMessage { from: "alice".into(), body: "hi".into() }).await);
    }
}
