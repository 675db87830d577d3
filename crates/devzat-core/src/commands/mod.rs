//! The command dispatcher: parses the first whitespace-delimited token off
//! an input line and routes it to a built-in handler, a DM rewrite, or
//! (when unmatched) ordinary chat. Ported from `commands.go`'s `cmds`/`rest`
//! tables and the dispatch logic in `original_source/main.go`.

mod admin;
mod builtin;
mod dm;
mod games;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;

use crate::ban::BanStore;
use crate::config::Config;
use crate::identity::Identity;
use crate::plugin::PluginCommandRegistry;
use crate::prefs::PrefsStore;
use crate::room::RoomRegistry;
use crate::token::TokenStore;

pub use dm::DmRouter;

/// Everything a command handler needs to do its work, without reaching
/// back into the session that dispatched it.
pub struct CommandContext {
    pub rooms: Arc<RoomRegistry>,
    pub bans: Arc<BanStore>,
    pub tokens: Arc<TokenStore>,
    pub prefs: Arc<PrefsStore>,
    pub config: Arc<Config>,
    pub plugin_commands: Arc<PluginCommandRegistry>,
    pub identity: Identity,
    pub display_name: String,
    pub room_name: String,
}

/// What a handler wants the session loop to do after it returns.
pub enum CommandOutcome {
    /// Print text to the caller only.
    Reply(String),
    /// Send to every member of the current room.
    Broadcast(String),
    /// Switch the caller into a different room.
    ChangeRoom(String),
    /// Close the connection (`exit`, a self-`kick`, etc).
    Disconnect,
    /// Do nothing visible (e.g. a prompt re-render handled by the caller).
    None,
}

type Handler = for<'a> fn(&'a CommandContext, &'a str) -> BoxFuture<'a, CommandOutcome>;

struct CommandEntry {
    handler: Handler,
    /// Non-empty `args_info` (or an empty handler signature) is what makes
    /// a bare known token dispatch even with no arguments, per spec §4.4.
    args_info: &'static str,
}

/// The three disjoint tables from spec §4.4: `Main` and `Rest` are listed
/// in `help`, `Secret` is not. Lookup scans the union of all three.
static MAIN: Lazy<HashMap<&'static str, CommandEntry>> = Lazy::new(|| {
    HashMap::from([
        ("cd", CommandEntry { handler: builtin::cd, args_info: "[#room|..|name]" }),
        ("nick", CommandEntry { handler: builtin::nick, args_info: "<name>" }),
        ("color", CommandEntry { handler: builtin::color, args_info: "<name>" }),
        ("tz", CommandEntry { handler: builtin::tz, args_info: "[zone] [24h]" }),
        ("exit", CommandEntry { handler: builtin::exit, args_info: "" }),
        ("pwd", CommandEntry { handler: builtin::pwd, args_info: "" }),
        ("users", CommandEntry { handler: builtin::users, args_info: "" }),
        ("help", CommandEntry { handler: builtin::help, args_info: "" }),
        ("man", CommandEntry { handler: builtin::help, args_info: "<cmd>" }),
    ])
});

static REST: Lazy<HashMap<&'static str, CommandEntry>> = Lazy::new(|| {
    HashMap::from([
        ("uptime", CommandEntry { handler: builtin::uptime, args_info: "" }),
        ("uname", CommandEntry { handler: builtin::uname, args_info: "" }),
        ("neofetch", CommandEntry { handler: builtin::neofetch, args_info: "" }),
        ("rmdir", CommandEntry { handler: builtin::rmdir, args_info: "<room>" }),
        ("theme", CommandEntry { handler: builtin::theme, args_info: "<name>" }),
        ("id", CommandEntry { handler: builtin::id, args_info: "" }),
        ("pronouns", CommandEntry { handler: builtin::pronouns, args_info: "<text>" }),
        ("bio", CommandEntry { handler: builtin::bio, args_info: "<text>" }),
        ("shrug", CommandEntry { handler: builtin::shrug, args_info: "" }),
        ("emojis", CommandEntry { handler: builtin::emojis, args_info: "" }),
        ("art", CommandEntry { handler: builtin::art, args_info: "<name>" }),
        ("eg-code", CommandEntry { handler: builtin::eg_code, args_info: "<language>" }),
        ("8ball", CommandEntry { handler: games::eight_ball, args_info: "<question>" }),
        ("hang", CommandEntry { handler: games::hangman, args_info: "[letter|word]" }),
        ("tic", CommandEntry { handler: games::tic_tac_toe, args_info: "[cell]" }),
        ("lstokens", CommandEntry { handler: admin::lstokens, args_info: "" }),
        ("grant", CommandEntry { handler: admin::grant, args_info: "[user] [metadata]" }),
        ("revoke", CommandEntry { handler: admin::revoke, args_info: "<hash>" }),
        ("ban", CommandEntry { handler: admin::ban, args_info: "<user> [duration] [reason]" }),
        ("unban", CommandEntry { handler: admin::unban, args_info: "<addr|id>" }),
        ("lsbans", CommandEntry { handler: admin::lsbans, args_info: "" }),
        ("mute", CommandEntry { handler: admin::mute, args_info: "[user]" }),
        ("unmute", CommandEntry { handler: admin::unmute, args_info: "[user]" }),
        ("kick", CommandEntry { handler: admin::kick, args_info: "[user]" }),
        ("admins", CommandEntry { handler: admin::admins, args_info: "" }),
    ])
});

static SECRET: Lazy<HashMap<&'static str, CommandEntry>> = Lazy::new(|| {
    HashMap::from([
        (":q", CommandEntry { handler: builtin::exit, args_info: "" }),
        (":wq", CommandEntry { handler: builtin::exit, args_info: "" }),
        ("colour", CommandEntry { handler: builtin::color, args_info: "<name>" }),
        ("su", CommandEntry { handler: builtin::su, args_info: "" }),
        ("ls", CommandEntry { handler: builtin::impostor, args_info: "" }),
        ("cat", CommandEntry { handler: builtin::impostor, args_info: "" }),
        ("rm", CommandEntry { handler: builtin::impostor, args_info: "" }),
    ])
});

fn lookup(token: &str) -> Option<&'static CommandEntry> {
    MAIN.get(token).or_else(|| REST.get(token)).or_else(|| SECRET.get(token))
}

/// The outcome of parsing a raw input line, before any handler has run.
pub enum Dispatch {
    /// Route as DM text to the active peer.
    Dm { to: String, text: String },
    /// Run a known command's handler with the given remainder.
    Command { outcome: CommandOutcome },
    /// No command matched; treat the whole line as ordinary chat.
    Chat(String),
}

/// Classify one input line per spec §4.4. `dm_peer` is the caller's
/// current DM target, if any.
pub async fn dispatch(ctx: &CommandContext, line: &str, dm_peer: Option<&str>) -> Dispatch {
    let line = line.trim_end();
    if let Some(rest) = line.strip_prefix('=') {
        let (to, text) = rest.split_once(' ').unwrap_or((rest, ""));
        return Dispatch::Dm { to: to.to_string(), text: text.to_string() };
    }

    let mut parts = line.splitn(2, ' ');
    let token = parts.next().unwrap_or("");
    let remainder = parts.next().unwrap_or("");

    if let Some(peer) = dm_peer {
        if !matches!(token, "cd" | "exit" | "pwd") {
            return Dispatch::Dm { to: peer.to_string(), text: line.to_string() };
        }
    }

    match lookup(token) {
        Some(entry) if !entry.args_info.is_empty() || remainder.is_empty() => {
            Dispatch::Command { outcome: (entry.handler)(ctx, remainder).await }
        }
        None if ctx.plugin_commands.is_registered(token).await => {
            let invocation = devzat_proto::CmdInvocation {
                room: ctx.room_name.clone(),
                from: ctx.display_name.clone(),
                args: remainder.to_string(),
            };
            ctx.plugin_commands.dispatch(token, invocation).await;
            Dispatch::Command { outcome: CommandOutcome::None }
        }
        _ => Dispatch::Chat(line.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ctx() -> CommandContext {
        let unique = rand::random::<u64>();
        CommandContext {
            rooms: RoomRegistry::new(),
            bans: Arc::new(
                BanStore::load(std::env::temp_dir().join(format!("unused-bans-test-{unique}.json")))
                    .await
                    .unwrap(),
            ),
            tokens: Arc::new(
                TokenStore::load(std::env::temp_dir().join(format!("unused-tokens-test-{unique}.json")))
                    .await
                    .unwrap(),
            ),
            prefs: Arc::new(PrefsStore::new(std::env::temp_dir())),
            config: Arc::new(Config::default()),
            plugin_commands: Arc::new(PluginCommandRegistry::new()),
            identity: Identity::from_remote_addr("tester"),
            display_name: "tester".to_string(),
            room_name: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn leading_equals_is_always_dm() {
        let ctx = ctx().await;
        match dispatch(&ctx, "=bob hey there", None).await {
            Dispatch::Dm { to, text } => {
                assert_eq!(to, "bob");
                assert_eq!(text, "hey there");
            }
            _ => panic!("expected Dm"),
        }
    }

    #[tokio::test]
    async fn dm_mode_reroutes_non_exempt_tokens() {
        let ctx = ctx().await;
        match dispatch(&ctx, "hello friend", Some("bob")).await {
            Dispatch::Dm { to, text } => {
                assert_eq!(to, "bob");
                assert_eq!(text, "hello friend");
            }
            _ => panic!("expected Dm"),
        }
    }

    #[tokio::test]
    async fn dm_mode_still_allows_cd_and_exit() {
        let ctx = ctx().await;
        assert!(matches!(dispatch(&ctx, "cd #main", Some("bob")).await, Dispatch::Command { .. }));
        assert!(matches!(dispatch(&ctx, "exit", Some("bob")).await, Dispatch::Command { .. }));
    }

    #[tokio::test]
    async fn unmatched_token_is_plain_chat() {
        let ctx = ctx().await;
        assert!(matches!(dispatch(&ctx, "just saying hi", None).await, Dispatch::Chat(_)));
    }

    #[tokio::test]
    async fn plugin_command_streams_an_invocation() {
        let ctx = ctx().await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        ctx.plugin_commands
            .register(devzat_proto::CmdDef { name: "roll".into(), args_info: "".into(), info: "".into() }, tx)
            .await;

        assert!(matches!(
            dispatch(&ctx, "roll d20", None).await,
            Dispatch::Command { outcome: CommandOutcome::None }
        ));
        let invocation = rx.recv().await.unwrap();
        assert_eq!(invocation.from, "tester");
        assert_eq!(invocation.args, "d20");
    }

    #[tokio::test]
    async fn emojis_lists_known_shortcodes() {
        let ctx = ctx().await;
        match dispatch(&ctx, "emojis", None).await {
            Dispatch::Command { outcome: CommandOutcome::Reply(text) } => assert!(text.contains("wave")),
            _ => panic!("expected a Reply"),
        }
    }
}
