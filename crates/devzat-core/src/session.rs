//! The per-connection state machine: handshake, join-rate/ban checks, the
//! REPL loop, and teardown. Structurally this follows
//! `libshpool::daemon::shell::{Session, SessionInner}` — long-lived,
//! rarely-mutated fields on `Session`, and the fields the serving loop
//! mutates on every line split into `SessionInner` — translated from
//! threads-plus-mutex to a single task owning its `SessionInner` plus a
//! few `Arc`-shared collaborators.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, mpsc};
use tracing::{instrument, warn};

use crate::antiabuse::{JoinRateLimiter, JoinVerdict, MessageRateLimiter, MessageVerdict, TorExitList};
use crate::backlog::Backlog;
use crate::ban::BanStore;
use crate::commands::{self, CommandContext, CommandOutcome, Dispatch, DmRouter};
use crate::config::Config;
use crate::identity::Identity;
use crate::plugin::{MiddlewareChain, PassiveListeners, PluginCommandRegistry};
use crate::prefs::{BellMode, PrefsStore, UserPrefs};
use crate::render;
use crate::room::{self, DirectMessage, Member, RoomEvent, RoomRegistry, MAIN_ROOM};
use crate::token::TokenStore;
use crate::transport::PtyChannel;

const MAX_LINE_BYTES: usize = 5120;
const DEFAULT_WIDTH: u16 = 80;
const PREF_LOAD_DEADLINE: Duration = Duration::from_secs(60);
/// Bound on a session's direct-message inbox; a peer who types DMs faster
/// than this session reads them has its sends dropped, not blocked.
const DIRECT_INBOX_CAPACITY: usize = 32;
/// How often the REPL probes the transport with a no-op write to notice a
/// dead connection it would otherwise only learn about on the next real
/// write. Matches `keepSessionAlive`'s period in `original_source/util.go`.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Collaborators shared by every session on the server, handed out by
/// `devzat-server` at boot.
pub struct SessionDeps {
    pub rooms: Arc<RoomRegistry>,
    pub bans: Arc<BanStore>,
    pub tokens: Arc<TokenStore>,
    pub prefs: Arc<PrefsStore>,
    pub tor: Arc<TorExitList>,
    pub join_limiter: Arc<JoinRateLimiter>,
    pub config: Arc<Config>,
    pub backlog: Arc<Backlog>,
    /// Shared with `devzat-server`'s plugin gRPC bridge so real chat lines
    /// actually pass through the middleware pipeline and are visible to
    /// passive listeners, per spec §4.7.
    pub middleware: Arc<MiddlewareChain>,
    pub passive_listeners: Arc<PassiveListeners>,
    pub plugin_commands: Arc<PluginCommandRegistry>,
}

/// Long-lived, rarely-mutated session identity. Analogous to
/// `libshpool`'s outer `Session` struct.
pub struct Session {
    pub identity: Identity,
    pub remote_addr: String,
    pub started_at: SystemTime,
    deps: Arc<SessionDeps>,
}

/// Fields the REPL loop mutates every line. Analogous to `SessionInner`.
struct SessionInner {
    display_name: String,
    prefs: UserPrefs,
    room_name: String,
    width: u16,
    message_limiter: MessageRateLimiter,
    dm: Arc<DmRouter>,
    last_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    /// Cloned into this member's `Member.outbox` on every join, so a DM
    /// landing after a `cd` still reaches the same inbox.
    direct_tx: mpsc::Sender<DirectMessage>,
    direct_rx: mpsc::Receiver<DirectMessage>,
}

/// Outcome of the handshake gate, before any PTY I/O happens.
pub enum AdmitError {
    Banned,
    TorExitNode,
    NoPty,
    JoinRateExceeded,
}

impl Session {
    /// Run the handshake gate described in spec §4.1: derive identity,
    /// check bans/TOR/join-rate, require a PTY. Returns a [`Session`]
    /// ready to enter its REPL loop, or the reason admission was refused.
    #[instrument(skip(deps, channel))]
    pub async fn admit(
        deps: Arc<SessionDeps>,
        remote_addr: String,
        pubkey: Option<&[u8]>,
        channel: &dyn PtyChannel,
    ) -> Result<Session, AdmitError> {
        let identity = match pubkey {
            Some(key) => Identity::from_pubkey(key),
            None => Identity::from_remote_addr(&remote_addr),
        };

        if channel.pty_size().is_none() {
            return Err(AdmitError::NoPty);
        }

        if deps.bans.is_banned(&remote_addr, &identity).await {
            return Err(AdmitError::Banned);
        }

        if deps.tor.is_tor_exit(&remote_addr).await {
            return Err(AdmitError::TorExitNode);
        }

        if matches!(deps.join_limiter.record_join(identity.as_str()).await, JoinVerdict::ShouldBan) {
            warn!(identity = %identity, "join rate exceeded, banning");
            let _ = deps.bans.add(crate::ban::Ban { addr: None, identity: Some(identity.clone()) }).await;
            return Err(AdmitError::JoinRateExceeded);
        }

        Ok(Session { identity, remote_addr, started_at: SystemTime::now(), deps })
    }

    /// Run the full REPL loop until the client disconnects or a handler
    /// requests it. Any panic inside this function is expected to be
    /// caught by the caller's recovery barrier (spec §8), not here.
    #[instrument(skip(self, channel))]
    pub async fn run(&self, channel: &mut dyn PtyChannel) -> anyhow::Result<()> {
        let prefs = tokio::time::timeout(PREF_LOAD_DEADLINE, self.deps.prefs.load(&self.identity))
            .await
            .unwrap_or_else(|_| {
                warn!(identity = %self.identity, "pref load exceeded deadline, using defaults");
                UserPrefs::default()
            });

        let display_name = prefs.name.clone().unwrap_or_else(|| self.identity.as_str()[..8].to_string());
        let (direct_tx, direct_rx) = mpsc::channel(DIRECT_INBOX_CAPACITY);
        let main = self.deps.rooms.ensure_main().await;
        main.join(Member { identity: self.identity.clone(), name: display_name.clone(), outbox: direct_tx.clone() })
            .await;

        let mut inner = SessionInner {
            display_name,
            prefs,
            room_name: MAIN_ROOM.to_string(),
            width: channel.pty_size().map(|(w, _)| w).filter(|w| *w > 0).unwrap_or(DEFAULT_WIDTH),
            message_limiter: MessageRateLimiter::new(),
            dm: DmRouter::new(),
            last_timestamp: None,
            direct_tx,
            direct_rx,
        };

        let mut room_rx = main.subscribe();
        let result = self.repl(channel, &mut inner, &mut room_rx).await;

        if main.part(&self.identity).await {
            self.deps.rooms.arm_reaper_for(&main).await;
        }
        if let Err(e) = self.deps.prefs.save(&self.identity, &inner.prefs).await {
            warn!(error = %e, "failed to save preferences on disconnect");
        }

        result
    }

    async fn repl(
        &self,
        channel: &mut dyn PtyChannel,
        inner: &mut SessionInner,
        room_rx: &mut broadcast::Receiver<RoomEvent>,
    ) -> anyhow::Result<()> {
        self.write_prompt(channel, inner).await?;

        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await; // the first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if channel.write(b"").await.is_err() {
                        break;
                    }
                }
                incoming = channel.read() => {
                    let Some(bytes) = incoming? else { break };
                    let mut line = String::from_utf8_lossy(&bytes).to_string();
                    if line.len() > MAX_LINE_BYTES {
                        line.truncate(MAX_LINE_BYTES);
                    }
                    self.erase_echo(channel, line.len(), inner.width).await?;

                    if let Some(outcome) = self.handle_line(inner, &line).await? {
                        let disconnect = matches!(outcome, CommandOutcome::Disconnect);
                        self.apply_outcome(channel, inner, outcome).await?;
                        if disconnect {
                            break;
                        }
                    }
                    self.write_prompt(channel, inner).await?;
                }
                broadcasted = room_rx.recv() => {
                    match broadcasted {
                        Ok(event) => self.deliver_room_event(channel, inner, event).await?,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                    self.write_prompt(channel, inner).await?;
                }
                direct = inner.direct_rx.recv() => {
                    let Some(msg) = direct else { continue };
                    self.deliver_direct_message(channel, inner, msg).await?;
                    self.write_prompt(channel, inner).await?;
                }
            }
        }

        Ok(())
    }

    /// Render and write one room-wide [`RoomEvent`] for this recipient:
    /// word-wrap at this session's own terminal width (spec §4.3), decide
    /// whether it rings a bell, and prefix the sender's name unless this is
    /// a system notice.
    async fn deliver_room_event(
        &self,
        channel: &mut dyn PtyChannel,
        inner: &mut SessionInner,
        event: RoomEvent,
    ) -> anyhow::Result<()> {
        let is_self = event.sender.as_deref() == Some(inner.display_name.as_str());
        let should_bell =
            !is_self && (inner.prefs.bell == BellMode::All || room::mentions(&event.body, &inner.display_name));

        let prefix = event.sender.as_deref().map(|name| format!("{name}: ")).unwrap_or_default();
        let avail_width = (inner.width as usize).saturating_sub(prefix.chars().count()).max(1);
        let body = match self.render_guarded(&event.body, avail_width) {
            Ok(body) => body,
            Err(message) => {
                if let Some(main) = self.deps.rooms.get(MAIN_ROOM).await {
                    main.broadcast(format!("rendering panicked: {message}"));
                }
                return Ok(());
            }
        };
        let body = render::apply_bell(body, inner.prefs.bell, should_bell);

        let line = match self.maybe_timestamp(inner) {
            Some(stamp) => format!("[{stamp}] {prefix}{body}"),
            None => format!("{prefix}{body}"),
        };
        channel.write(format!("\r\n{line}\r\n").as_bytes()).await
    }

    /// Render and write one inbound DM, delivered straight to this session's
    /// direct inbox rather than through the room broadcast. Spec §4.3:
    /// inbound DMs always ring a bell unless the recipient's bell mode is
    /// `off`.
    async fn deliver_direct_message(
        &self,
        channel: &mut dyn PtyChannel,
        inner: &SessionInner,
        msg: DirectMessage,
    ) -> anyhow::Result<()> {
        let prefix = format!("{} -> ", msg.from);
        let avail_width = (inner.width as usize).saturating_sub(prefix.chars().count()).max(1);
        let body = render::word_wrap(&msg.body, avail_width);
        let line = render::apply_bell(format!("{prefix}{body}"), inner.prefs.bell, true);
        channel.write(format!("\r\n{line}\r\n").as_bytes()).await
    }

    async fn handle_line(&self, inner: &mut SessionInner, line: &str) -> anyhow::Result<Option<CommandOutcome>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        if matches!(inner.message_limiter.record_message().await, MessageVerdict::ShouldBan) {
            let _ = self.deps.bans.add(crate::ban::Ban { addr: None, identity: Some(self.identity.clone()) }).await;
            return Ok(Some(CommandOutcome::Disconnect));
        }

        let ctx = CommandContext {
            rooms: Arc::clone(&self.deps.rooms),
            bans: Arc::clone(&self.deps.bans),
            tokens: Arc::clone(&self.deps.tokens),
            prefs: Arc::clone(&self.deps.prefs),
            config: Arc::clone(&self.deps.config),
            plugin_commands: Arc::clone(&self.deps.plugin_commands),
            identity: self.identity.clone(),
            display_name: inner.display_name.clone(),
            room_name: inner.room_name.clone(),
        };

        let dm_peer = inner.dm.peer().await;
        match commands::dispatch(&ctx, line, dm_peer.as_deref()).await {
            Dispatch::Dm { to, text } => Ok(Some(self.route_dm(inner, to, text).await)),
            Dispatch::Command { outcome } => Ok(Some(outcome)),
            Dispatch::Chat(text) => {
                let event =
                    devzat_proto::Event { room: inner.room_name.clone(), from: inner.display_name.clone(), msg: text };
                let Some(event) = self.deps.middleware.apply(event).await else {
                    return Ok(None);
                };
                self.deps.passive_listeners.notify(event.clone()).await;

                let Some(room) = self.deps.rooms.get(&event.room).await else { return Ok(None) };
                room.broadcast_chat(event.from.clone(), event.msg.clone()).await;
                if event.room == MAIN_ROOM {
                    let archived = render::render_styled(&event.msg);
                    self.deps.backlog.push(format!("{}: {}", event.from, archived), chrono::Utc::now()).await;
                }
                if let Some(reply) = crate::bot::reply_for(&event.msg) {
                    crate::bot::spawn_reply(reply, {
                        let room = Arc::clone(&room);
                        move |text| room.broadcast(format!("devbot: {text}"))
                    });
                }
                Ok(None)
            }
        }
    }

    /// Deliver DM text to `inner`'s active peer (spec §4.3/§4.4): the
    /// recipient's session is pushed an `"{from} -> {body}"` envelope via
    /// its direct inbox, and the sender is echoed `"{to} <- {body}"` with no
    /// bell, never a broadcast to the room.
    async fn route_dm(&self, inner: &SessionInner, to: String, text: String) -> CommandOutcome {
        let body = render::render_styled(&text);
        let Some(room) = self.deps.rooms.get(&inner.room_name).await else {
            return CommandOutcome::Reply(format!("no such user: {to}"));
        };
        let delivered =
            room.deliver_direct(&to, DirectMessage { from: inner.display_name.clone(), body: body.clone() }).await;
        if delivered {
            CommandOutcome::Reply(format!("{to} <- {body}"))
        } else {
            CommandOutcome::Reply(format!("no such user: {to}"))
        }
    }

    async fn apply_outcome(
        &self,
        channel: &mut dyn PtyChannel,
        inner: &mut SessionInner,
        outcome: CommandOutcome,
    ) -> anyhow::Result<()> {
        match outcome {
            CommandOutcome::Reply(text) => channel.write(format!("\r\n{text}\r\n").as_bytes()).await?,
            CommandOutcome::Broadcast(text) => {
                if let Some(room) = self.deps.rooms.get(&inner.room_name).await {
                    room.broadcast(text);
                }
            }
            CommandOutcome::ChangeRoom(name) => {
                if let Some(old) = self.deps.rooms.get(&inner.room_name).await {
                    if old.part(&self.identity).await {
                        self.deps.rooms.arm_reaper_for(&old).await;
                    }
                }
                let new_room = self.deps.rooms.get_or_create(&name).await;
                new_room
                    .join(Member {
                        identity: self.identity.clone(),
                        name: inner.display_name.clone(),
                        outbox: inner.direct_tx.clone(),
                    })
                    .await;
                inner.room_name = name;
            }
            CommandOutcome::Disconnect | CommandOutcome::None => {}
        }
        Ok(())
    }

    /// Run rendering behind a panic barrier: a malformed markdown/emoji
    /// input should never take the whole session (or server) down with it.
    /// Mirrors the recovery the Go original got for free from its
    /// `recover()`-wrapped goroutine.
    fn render_guarded(&self, text: &str, width: usize) -> Result<String, String> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| render::render_line(text, width)))
            .map_err(|payload| {
                payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string())
            })
    }

    /// Erase the echoed input region: `\e[A\e[2K` once per row the input
    /// occupied at the session's current width, per spec §4.3.
    async fn erase_echo(&self, channel: &mut dyn PtyChannel, len: usize, width: u16) -> anyhow::Result<()> {
        let width = width.max(1) as usize;
        let rows = len.div_ceil(width).max(1);
        let erase = "\x1b[A\x1b[2K".repeat(rows);
        channel.write(erase.as_bytes()).await
    }

    async fn write_prompt(&self, channel: &mut dyn PtyChannel, inner: &SessionInner) -> anyhow::Result<()> {
        let is_admin = self.deps.config.is_admin(&self.identity);
        let prompt = render_prompt(
            &inner.prompt_template(),
            &inner.display_name,
            &inner.room_name,
            inner.prefs.color.as_deref(),
            is_admin,
        );
        channel.write(prompt.as_bytes()).await
    }

    /// A wall-clock stamp is shown at most once every 60 seconds of
    /// received chat, matching the original's timestamp-throttling in
    /// `timeMessage`.
    fn maybe_timestamp(&self, inner: &mut SessionInner) -> Option<String> {
        let now = chrono::Utc::now();
        let due = match inner.last_timestamp {
            Some(last) => now.signed_duration_since(last) >= chrono::Duration::seconds(60),
            None => true,
        };
        if !due {
            return None;
        }
        inner.last_timestamp = Some(now);
        let tz: chrono_tz::Tz =
            inner.prefs.timezone.as_deref().and_then(|t| t.parse().ok()).unwrap_or(chrono_tz::UTC);
        Some(crate::time_fmt::wall_clock(now, tz, inner.prefs.format_time_24))
    }
}

impl SessionInner {
    fn prompt_template(&self) -> String {
        self.prefs.prompt.clone().unwrap_or_else(|| "\\u@\\w$ ".to_string())
    }
}

/// Expand the prompt template grammar (spec §4.1): `\u` user name; `\w`
/// room name (`#name`) coloured to match the user; `\W` room name with
/// `#main` shown as `~` and other rooms as `~/name`, same colouring; `\t`/
/// `\T` 12h/24h time; `\h`/`\H` the literal `devzat`, coloured; `\S` a
/// literal space; `\$` → `#` for an admin, `$` otherwise; any other `\x`
/// passes through unchanged.
fn render_prompt(template: &str, user: &str, room: &str, color: Option<&str>, is_admin: bool) -> String {
    let colorize = |text: &str| match color {
        Some(name) => format!("{}{}{}", render::ansi_code_for(name), text, render::ansi_reset()),
        None => text.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u') => out.push_str(user),
            Some('w') => out.push_str(&colorize(&format!("#{room}"))),
            Some('W') => {
                let short = if room == MAIN_ROOM { "~".to_string() } else { format!("~/{room}") };
                out.push_str(&colorize(&short));
            }
            Some('t') => out.push_str(&chrono::Local::now().format("%-I:%M%P").to_string()),
            Some('T') => out.push_str(&chrono::Local::now().format("%H:%M").to_string()),
            Some('h') | Some('H') => out.push_str(&colorize("devzat")),
            Some('S') => out.push(' '),
            Some('$') => out.push(if is_admin { '#' } else { '$' }),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_template_expands_user_and_room() {
        assert_eq!(render_prompt("\\u in \\w> ", "alice", "main", None, false), "alice in #main> ");
    }

    #[test]
    fn capital_w_collapses_main_room_to_tilde() {
        assert_eq!(render_prompt("\\W", "alice", "main", None, false), "~");
        assert_eq!(render_prompt("\\W", "alice", "dev", None, false), "~/dev");
    }

    #[test]
    fn dollar_escape_reflects_admin_status() {
        assert_eq!(render_prompt("\\$", "alice", "main", None, false), "$");
        assert_eq!(render_prompt("\\$", "alice", "main", None, true), "#");
    }

    #[test]
    fn literal_space_and_colored_hostname_escapes() {
        assert_eq!(render_prompt("\\u\\S\\h", "alice", "main", None, false), "alice devzat");
        assert_eq!(
            render_prompt("\\h", "alice", "main", Some("red"), false),
            format!("{}devzat{}", render::ansi_code_for("red"), render::ansi_reset())
        );
    }

    #[test]
    fn unknown_escape_passes_through() {
        assert_eq!(render_prompt("\\z", "alice", "main", None, false), "\\z");
    }

    #[test]
    fn erase_echo_row_count_matches_spec_example() {
        // "5120 chars long passes unchanged; 5121 is truncated" (spec §7).
        let mut line = "a".repeat(5121);
        line.truncate(MAX_LINE_BYTES);
        assert_eq!(line.len(), MAX_LINE_BYTES);
    }
}
