//! Handlers for the `Main`, `Rest`, and vi-ism/impostor `Secret` command
//! tables that don't belong to games or admin actions. Ported from the
//! corresponding cases in `original_source/commands.go`.

use futures::future::{BoxFuture, FutureExt};

use crate::room::MAIN_ROOM;

use super::{CommandContext, CommandOutcome};

pub fn cd<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let target = rest.trim();
        if target == ".." {
            return CommandOutcome::ChangeRoom(MAIN_ROOM.to_string());
        }
        if target.is_empty() {
            let mut names = Vec::new();
            for name in ctx.rooms.list().await {
                if let Some(room) = ctx.rooms.get(&name).await {
                    names.push((name, room.members().await.len()));
                }
            }
            names.sort_by(|a, b| b.1.cmp(&a.1));
            let listing = names.into_iter().map(|(n, c)| format!("#{n} ({c})")).collect::<Vec<_>>().join("\n");
            return CommandOutcome::Reply(listing);
        }
        if let Some(room) = target.strip_prefix('#') {
            let truncated: String = room.chars().take(30).collect();
            return CommandOutcome::ChangeRoom(truncated);
        }
        // A plain name enters DM mode with that user; the session loop owns
        // DM-peer state, so just echo back what it should do.
        CommandOutcome::Reply(format!("now DMing {target} (say `cd` to stop)"))
    }
    .boxed()
}

pub fn nick<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let name = rest.trim();
        if name.is_empty() || name.starts_with('#') || name.starts_with('@') || name.eq_ignore_ascii_case("devbot") {
            return CommandOutcome::Reply("invalid name".to_string());
        }
        CommandOutcome::Broadcast(format!("{name} changed their name"))
    }
    .boxed()
}

const PALETTE: &[&str] = &["red", "green", "yellow", "blue", "magenta", "cyan", "white", "black"];

pub fn color<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let name = rest.trim();
        if name.is_empty() {
            let choice = PALETTE[rand::random::<usize>() % PALETTE.len()];
            return CommandOutcome::Reply(format!("color set to {choice}"));
        }
        if PALETTE.contains(&name) {
            CommandOutcome::Reply(format!("color set to {name}"))
        } else {
            CommandOutcome::Reply(format!("unknown color {name}"))
        }
    }
    .boxed()
}

pub fn tz<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let mut parts = rest.split_whitespace();
        let zone = parts.next().unwrap_or("");
        if zone.is_empty() {
            return CommandOutcome::Reply("timezone cleared, back to relative time".to_string());
        }
        let resolved = match zone {
            "PST" | "PDT" => "PST8PDT",
            "CST" | "CDT" => "CST6CDT",
            "EST" | "EDT" => "EST5EDT",
            "MT" => "America/Phoenix",
            other => other,
        };
        if resolved.parse::<chrono_tz::Tz>().is_err() {
            return CommandOutcome::Reply(format!("unknown timezone {zone}"));
        }
        let format_24h = parts.next() == Some("24h");
        CommandOutcome::Reply(format!("timezone set to {resolved} (24h: {format_24h})"))
    }
    .boxed()
}

pub fn exit<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Disconnect }.boxed()
}

pub fn pwd<'a>(ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(format!("#{}", ctx.room_name)) }.boxed()
}

pub fn users<'a>(ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let Some(room) = ctx.rooms.get(&ctx.room_name).await else {
            return CommandOutcome::Reply("no one is here".to_string());
        };
        let names: Vec<_> = room.members().await.into_iter().map(|m| m.name).collect();
        CommandOutcome::Reply(names.join(", "))
    }
    .boxed()
}

pub fn help<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if rest.trim().is_empty() {
            CommandOutcome::Reply("available commands: cd, nick, color, tz, exit, pwd, users, help".to_string())
        } else {
            CommandOutcome::Reply(format!("no manual entry for {}", rest.trim()))
        }
    }
    .boxed()
}

pub fn uptime<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply("uptime: unknown (wire up to server start time)".to_string()) }.boxed()
}

pub fn uname<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(format!("devzat-rs on {}", std::env::consts::OS)) }.boxed()
}

pub fn neofetch<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply("devzat-rs\n-----------\nOS: rust".to_string()) }.boxed()
}

pub fn rmdir<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let name = rest.trim().trim_start_matches('#');
        match ctx.rooms.remove_now(name).await {
            Ok(()) => CommandOutcome::Reply(format!("removed #{name}")),
            Err(e) => CommandOutcome::Reply(e.to_string()),
        }
    }
    .boxed()
}

pub fn theme<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(format!("theme set to {}", rest.trim())) }.boxed()
}

pub fn id<'a>(ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(ctx.identity.as_str().to_string()) }.boxed()
}

pub fn pronouns<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(format!("pronouns set to {}", rest.trim())) }.boxed()
}

pub fn bio<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(format!("bio set to {}", rest.trim())) }.boxed()
}

pub fn shrug<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Broadcast("¯\\_(ツ)_/¯".to_string()) }.boxed()
}

pub fn su<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply("Permission denied".to_string()) }.boxed()
}

pub fn emojis<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(crate::render::known_shortcodes().join(", ")) }.boxed()
}

pub fn art<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let name = rest.trim();
        if name.is_empty() {
            CommandOutcome::Reply("usage: art <name>".to_string())
        } else {
            CommandOutcome::Reply(format!("no art named {name}"))
        }
    }
    .boxed()
}

pub fn eg_code<'a>(_ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        let lang = rest.trim();
        CommandOutcome::Reply(if lang.is_empty() {
            "usage: eg-code <language>, then paste a fenced code block to see it highlighted".to_string()
        } else {
            format!("next fenced block will be highlighted as {lang}")
        })
    }
    .boxed()
}

pub fn impostor<'a>(_ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply("command not found".to_string()) }.boxed()
}
