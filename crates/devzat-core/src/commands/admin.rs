//! Admin-gated handlers: bans, tokens, mutes, kicks. Ported from the
//! corresponding cases in `original_source/commands.go`, all behind the
//! `admins` check from `config.go`.

use futures::future::{BoxFuture, FutureExt};

use crate::ban::Ban;
use crate::identity::Identity;

use super::{CommandContext, CommandOutcome};

fn require_admin(ctx: &CommandContext) -> Option<CommandOutcome> {
    if ctx.config.is_admin(&ctx.identity) {
        None
    } else {
        Some(CommandOutcome::Reply("unauthorized".to_string()))
    }
}

pub fn lstokens<'a>(ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if let Some(denied) = require_admin(ctx) {
            return denied;
        }
        let listing = ctx
            .tokens
            .list_hashed()
            .await
            .into_iter()
            .map(|(hash, meta)| format!("{hash} - {meta}"))
            .collect::<Vec<_>>()
            .join("\n");
        CommandOutcome::Reply(if listing.is_empty() { "no tokens".to_string() } else { listing })
    }
    .boxed()
}

pub fn grant<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if let Some(denied) = require_admin(ctx) {
            return denied;
        }
        let metadata = if rest.trim().is_empty() { "unlabeled" } else { rest.trim() };
        match ctx.tokens.grant(metadata).await {
            Ok(token) => CommandOutcome::Reply(format!("granted: {token}")),
            Err(e) => CommandOutcome::Reply(format!("failed to grant token: {e}")),
        }
    }
    .boxed()
}

pub fn revoke<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if let Some(denied) = require_admin(ctx) {
            return denied;
        }
        let hash = rest.trim();
        match ctx.tokens.revoke_by_hash(hash).await {
            Ok(true) => CommandOutcome::Reply(format!("revoked {hash}")),
            Ok(false) => CommandOutcome::Reply("no such token".to_string()),
            Err(e) => CommandOutcome::Reply(format!("failed to revoke: {e}")),
        }
    }
    .boxed()
}

pub fn ban<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if let Some(denied) = require_admin(ctx) {
            return denied;
        }
        let mut parts = rest.split_whitespace();
        let Some(target) = parts.next() else {
            return CommandOutcome::Reply("usage: ban <user> [duration] [reason]".to_string());
        };
        // Targeting devbot backfires onto the caller, per spec §4.4.
        let identity = if target.eq_ignore_ascii_case("devbot") {
            ctx.identity.clone()
        } else {
            Identity::from_remote_addr(target)
        };
        let reason: String = parts.collect::<Vec<_>>().join(" ");
        match ctx.bans.add(Ban { addr: None, identity: Some(identity) }).await {
            Ok(()) => CommandOutcome::Broadcast(format!(
                "{target} has been banned{}",
                if reason.is_empty() { String::new() } else { format!(": {reason}") }
            )),
            Err(e) => CommandOutcome::Reply(format!("failed to ban: {e}")),
        }
    }
    .boxed()
}

pub fn unban<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if let Some(denied) = require_admin(ctx) {
            return denied;
        }
        let needle = rest.trim();
        match ctx.bans.remove_matching(needle).await {
            Ok(0) => CommandOutcome::Reply("no matching ban".to_string()),
            Ok(n) => CommandOutcome::Reply(format!("removed {n} ban(s)")),
            Err(e) => CommandOutcome::Reply(format!("failed to unban: {e}")),
        }
    }
    .boxed()
}

pub fn lsbans<'a>(ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if let Some(denied) = require_admin(ctx) {
            return denied;
        }
        let listing = ctx
            .bans
            .list()
            .await
            .into_iter()
            .map(|b| match (b.addr, b.identity) {
                (Some(addr), _) => addr,
                (None, Some(id)) => id.as_str().to_string(),
                (None, None) => "<empty ban entry>".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        CommandOutcome::Reply(if listing.is_empty() { "no bans".to_string() } else { listing })
    }
    .boxed()
}

pub fn mute<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        // Self-mute is always allowed; muting someone else needs admin.
        if !rest.trim().is_empty() {
            if let Some(denied) = require_admin(ctx) {
                return denied;
            }
        }
        CommandOutcome::Reply(format!("{} muted", if rest.trim().is_empty() { "you are" } else { "user" }))
    }
    .boxed()
}

pub fn unmute<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if !rest.trim().is_empty() {
            if let Some(denied) = require_admin(ctx) {
                return denied;
            }
        }
        CommandOutcome::Reply(format!("{} unmuted", if rest.trim().is_empty() { "you are" } else { "user" }))
    }
    .boxed()
}

pub fn kick<'a>(ctx: &'a CommandContext, rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move {
        if rest.trim().is_empty() {
            return CommandOutcome::Disconnect;
        }
        if let Some(denied) = require_admin(ctx) {
            return denied;
        }
        CommandOutcome::Broadcast(format!("{} was kicked", rest.trim()))
    }
    .boxed()
}

pub fn admins<'a>(ctx: &'a CommandContext, _rest: &'a str) -> BoxFuture<'a, CommandOutcome> {
    async move { CommandOutcome::Reply(ctx.config.admins.join(", ")) }.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandOutcome;
    use crate::config::Config;
    use crate::prefs::PrefsStore;
    use crate::room::RoomRegistry;
    use crate::ban::BanStore;
    use crate::token::TokenStore;
    use std::sync::Arc;

    async fn ctx_with_admin(is_admin: bool) -> CommandContext {
        let unique = rand::random::<u64>();
        let identity = Identity::from_remote_addr("caller");
        let mut config = Config::default();
        if is_admin {
            config.admins.push(identity.as_str().to_string());
        }
        CommandContext {
            rooms: RoomRegistry::new(),
            bans: Arc::new(
                BanStore::load(std::env::temp_dir().join(format!("admin-test-bans-{unique}.json"))).await.unwrap(),
            ),
            tokens: Arc::new(
                TokenStore::load(std::env::temp_dir().join(format!("admin-test-tokens-{unique}.json")))
                    .await
                    .unwrap(),
            ),
            prefs: Arc::new(PrefsStore::new(std::env::temp_dir())),
            config: Arc::new(config),
            identity,
            display_name: "caller".to_string(),
            room_name: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn non_admin_ban_is_refused() {
        let ctx = ctx_with_admin(false).await;
        let outcome = ban(&ctx, "alice").await;
        assert!(matches!(outcome, CommandOutcome::Reply(msg) if msg == "unauthorized"));
    }

    #[tokio::test]
    async fn admin_ban_succeeds() {
        let ctx = ctx_with_admin(true).await;
        let outcome = ban(&ctx, "alice spamming").await;
        assert!(matches!(outcome, CommandOutcome::Broadcast(_)));
    }

    #[tokio::test]
    async fn self_mute_is_always_allowed() {
        let ctx = ctx_with_admin(false).await;
        let outcome = mute(&ctx, "").await;
        assert!(matches!(outcome, CommandOutcome::Reply(_)));
    }
}
