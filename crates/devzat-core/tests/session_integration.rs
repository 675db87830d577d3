//! Cross-module tests that exercise more than one collaborator at once —
//! the kind of thing unit tests inside each module can't see.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use devzat_core::antiabuse::{JoinRateLimiter, TorExitList};
use devzat_core::backlog::Backlog;
use devzat_core::ban::{Ban, BanStore};
use devzat_core::config::Config;
use devzat_core::plugin::{MiddlewareChain, MiddlewareSlot, PassiveListeners, PluginCommandRegistry};
use devzat_core::prefs::PrefsStore;
use devzat_core::room::RoomRegistry;
use devzat_core::session::{AdmitError, Session, SessionDeps};
use devzat_core::token::TokenStore;
use devzat_core::transport::PtyChannel;

/// An in-memory [`PtyChannel`], local to this test crate since
/// `devzat_core::transport::mock` is only compiled for `devzat-core`'s own
/// unit tests.
struct MockChannel {
    written: Mutex<Vec<u8>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    addr: String,
}

impl MockChannel {
    fn new(addr: impl Into<String>) -> Self {
        MockChannel { written: Mutex::new(Vec::new()), inbound: Mutex::new(VecDeque::new()), addr: addr.into() }
    }

    async fn push_input(&self, data: impl Into<Vec<u8>>) {
        self.inbound.lock().await.push_back(data.into());
    }
}

#[async_trait]
impl PtyChannel for MockChannel {
    async fn write(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.written.lock().await.extend_from_slice(data);
        Ok(())
    }

    async fn read(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.inbound.lock().await.pop_front())
    }

    fn pty_size(&self) -> Option<(u16, u16)> {
        Some((80, 24))
    }

    fn remote_addr(&self) -> String {
        self.addr.clone()
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn tempdir() -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("devzat-integration-{}", rand::random::<u64>()));
    p
}

async fn test_deps() -> Arc<SessionDeps> {
    let dir = tempdir();
    Arc::new(SessionDeps {
        rooms: RoomRegistry::new(),
        bans: Arc::new(BanStore::load(dir.join("bans.json")).await.unwrap()),
        tokens: Arc::new(TokenStore::load(dir.join("tokens.json")).await.unwrap()),
        prefs: Arc::new(PrefsStore::new(dir.join("prefs"))),
        tor: Arc::new(TorExitList::default()),
        join_limiter: Arc::new(JoinRateLimiter::default()),
        config: Arc::new(Config::default()),
        backlog: Arc::new(Backlog::new(200)),
        middleware: Arc::new(MiddlewareChain::new()),
        passive_listeners: Arc::new(PassiveListeners::new()),
        plugin_commands: Arc::new(PluginCommandRegistry::new()),
    })
}

/// A line typed by one session reaches a second session subscribed to the
/// same room, rendered and prefixed with the sender's name — the whole
/// admit -> repl -> broadcast path, not just one module's slice of it.
#[tokio::test]
async fn chat_line_reaches_a_second_subscriber() {
    let deps = test_deps().await;

    let mut channel = MockChannel::new("1.1.1.1:1");
    channel.push_input(b"hello room\n".to_vec()).await;
    channel.push_input(b"exit\n".to_vec()).await;

    let main = deps.rooms.ensure_main().await;
    let mut observer_rx = main.subscribe();

    let session = Session::admit(Arc::clone(&deps), "1.1.1.1:1".to_string(), None, &channel)
        .await
        .expect("admission should succeed for a fresh, unbanned client");

    session.run(&mut channel).await.expect("repl loop should exit cleanly on `exit`");

    let broadcast = observer_rx.try_recv().expect("the chat line should have been broadcast to #main");
    assert!(broadcast.body.contains("hello room"), "broadcast was: {}", broadcast.body);
}

/// A client banned after a prior connection stays banned across a
/// simulated process restart (store dropped and reloaded from disk), and
/// `Session::admit` actually enforces it — not just `BanStore` in isolation.
#[tokio::test]
async fn ban_persists_across_restart_and_blocks_admission() {
    let dir = tempdir();
    let bans_path = dir.join("bans.json");

    {
        let bans = BanStore::load(bans_path.clone()).await.unwrap();
        bans.add(Ban { addr: Some("9.9.9.9:1".to_string()), identity: None }).await.unwrap();
    } // store dropped here, simulating a restart

    let deps = Arc::new(SessionDeps {
        rooms: RoomRegistry::new(),
        bans: Arc::new(BanStore::load(bans_path).await.unwrap()),
        tokens: Arc::new(TokenStore::load(dir.join("tokens.json")).await.unwrap()),
        prefs: Arc::new(PrefsStore::new(dir.join("prefs"))),
        tor: Arc::new(TorExitList::default()),
        join_limiter: Arc::new(JoinRateLimiter::default()),
        config: Arc::new(Config::default()),
        backlog: Arc::new(Backlog::new(200)),
        middleware: Arc::new(MiddlewareChain::new()),
        passive_listeners: Arc::new(PassiveListeners::new()),
        plugin_commands: Arc::new(PluginCommandRegistry::new()),
    });

    let channel = MockChannel::new("9.9.9.9:1");
    let result = Session::admit(deps, "9.9.9.9:1".to_string(), None, &channel).await;
    assert!(matches!(result.err(), Some(AdmitError::Banned)));
}

/// A middleware that rewrites a message and a room subscriber both see the
/// rewritten text — the plugin bridge's middleware stage composed with the
/// broadcast fan-out it's meant to gate.
#[tokio::test]
async fn middleware_rewrite_is_what_gets_broadcast() {
    let rooms = RoomRegistry::new();
    let room = rooms.get_or_create("main").await;
    let mut subscriber = room.subscribe();

    let chain = MiddlewareChain::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let slot = Arc::new(MiddlewareSlot::new(tx));
    chain.register(1, Arc::clone(&slot)).await;

    let responder = tokio::spawn(async move {
        let _event = rx.recv().await.unwrap();
        slot.resolve(Some("censored".to_string())).await;
    });

    let event = devzat_proto::Event { room: "main".into(), from: "bob".into(), msg: "secret".into() };
    let result = chain.apply(event).await.expect("middleware kept the message, just rewrote it");
    responder.await.unwrap();

    room.broadcast_chat(result.from, result.msg).await;
    let seen = subscriber.try_recv().unwrap();
    assert_eq!(seen.sender.as_deref(), Some("bob"));
    assert_eq!(seen.body, "censored");
}
