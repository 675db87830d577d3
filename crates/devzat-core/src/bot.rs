//! The embedded chatbot "devbot": a list of substring triggers with
//! probabilistic, delayed replies. Ported from `devbot.go`'s `triggers`
//! table and `chance`/`sleep` handling in `original_source/main.go`.

use std::time::Duration;

use rand::Rng;

const REPLY_DELAY: Duration = Duration::from_millis(500);

struct Trigger {
    /// Substring to look for, case-insensitively, anywhere in the message.
    needle: &'static str,
    reply: &'static str,
    /// Reply chance out of 100.
    chance: u8,
}

const TRIGGERS: &[Trigger] = &[
    Trigger { needle: "hello devbot", reply: "Hello!", chance: 100 },
    Trigger { needle: "good bot", reply: ":)", chance: 100 },
    Trigger { needle: "bad bot", reply: ":(", chance: 100 },
    Trigger { needle: "rust", reply: "rust is a great language", chance: 20 },
    Trigger { needle: "devzat", reply: "devzat is the best chat", chance: 10 },
];

/// Check `message` against every trigger, rolling its chance, and return
/// the first reply that hits. At most one reply per message, matching the
/// original's single-match behavior.
pub fn reply_for(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    for trigger in TRIGGERS {
        if lower.contains(trigger.needle) && roll(trigger.chance) {
            return Some(trigger.reply);
        }
    }
    None
}

fn roll(chance_out_of_100: u8) -> bool {
    if chance_out_of_100 >= 100 {
        return true;
    }
    rand::thread_rng().gen_range(0..100) < chance_out_of_100
}

/// Spawn the delayed reply as its own task, invoking `post` with the chosen
/// text after [`REPLY_DELAY`] — the original sleeps on the handling
/// goroutine itself, which would block a session's task here, so the delay
/// is isolated into its own spawn.
pub fn spawn_reply<F>(reply: &'static str, post: F)
where
    F: FnOnce(&'static str) + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(REPLY_DELAY).await;
        post(reply);
    });
}
