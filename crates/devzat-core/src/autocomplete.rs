//! Tab-autocomplete for the line editor: resolves a trailing `@name`/`=name`
//! fragment against the current room's members, or a trailing `#room`
//! fragment against every known room. Ported from `autocompleteCallback`/
//! `userMentionAutocomplete`/`roomAutocomplete` in `original_source/main.go`.
//! Kept as a pure(ish) function over snapshots so the line editor can call
//! it on every Tab keystroke without touching session state.

use crate::room::{MentionTrie, Room, RoomRegistry};

/// Returns the suffix to append to `line`'s last word, or `None` if nothing
/// completes. Mirrors the Go original's `toAdd` return value.
pub async fn complete_line(room: &Room, rooms: &RoomRegistry, current_user: &str, line: &str) -> Option<String> {
    let last_word = line.split_whitespace().last()?;
    if let Some(suffix) = complete_mention(room, current_user, last_word).await {
        return Some(suffix);
    }
    complete_room(rooms, last_word).await
}

async fn complete_mention(room: &Room, current_user: &str, last_word: &str) -> Option<String> {
    let prefix = last_word
        .strip_prefix("=@")
        .or_else(|| last_word.strip_prefix('@'))
        .or_else(|| last_word.strip_prefix('='))?;

    let names: Vec<String> =
        room.members().await.into_iter().map(|m| m.name).filter(|n| n != current_user).collect();
    let trie = MentionTrie::from_names(names.iter().map(String::as_str));
    let matched = trie.longest_prefix_match(prefix)?;
    let suffix = matched.strip_prefix(prefix)?;
    if suffix.is_empty() {
        None
    } else {
        Some(format!("{suffix} "))
    }
}

async fn complete_room(rooms: &RoomRegistry, last_word: &str) -> Option<String> {
    let target = last_word.strip_prefix('#')?;
    for name in rooms.list().await {
        if let Some(suffix) = name.strip_prefix(target) {
            if !suffix.is_empty() {
                return Some(format!("{suffix} "));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Member;
    use crate::identity::Identity;

    #[tokio::test]
    async fn completes_mention_prefix() {
        let rooms = RoomRegistry::new();
        let room = rooms.get_or_create("main").await;
        let (tx_a, _rx_a) = tokio::sync::mpsc::channel(1);
        let (tx_b, _rx_b) = tokio::sync::mpsc::channel(1);
        room.join(Member { identity: Identity::from_remote_addr("a"), name: "alice".into(), outbox: tx_a }).await;
        room.join(Member { identity: Identity::from_remote_addr("b"), name: "bob".into(), outbox: tx_b }).await;

        let suffix = complete_line(&room, &rooms, "bob", "hey @ali").await;
        assert_eq!(suffix, Some("ce ".to_string()));
    }

    #[tokio::test]
    async fn completes_room_prefix() {
        let rooms = RoomRegistry::new();
        rooms.get_or_create("main").await;
        rooms.get_or_create("lounge").await;

        let room = rooms.get_or_create("main").await;
        let suffix = complete_line(&room, &rooms, "anyone", "cd #lou").await;
        assert_eq!(suffix, Some("nge ".to_string()));
    }

    #[tokio::test]
    async fn no_match_returns_none() {
        let rooms = RoomRegistry::new();
        let room = rooms.get_or_create("main").await;
        assert_eq!(complete_line(&room, &rooms, "me", "just chatting").await, None);
    }
}
