//! Message rendering pipeline: markdown-ish formatting, emoji shortcode
//! expansion, word-wrap, and the image-replacement hook. Ported from
//! `renderMessage`/`replaceEmoji`/`wrapText` in `original_source/util.go`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::prefs::BellMode;

/// ASCII bell (`\a`), spec §4.3: appended for a recipient who should be
/// rung, stripped everywhere when their bell mode is `off`.
pub const BELL: char = '\u{7}';

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.+?)\*").unwrap());
static UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").unwrap());
static STRIKETHROUGH: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").unwrap());
static EMOJI_SHORTCODE: Lazy<Regex> = Lazy::new(|| Regex::new(r":([a-zA-Z0-9_+-]+):").unwrap());

const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_ITALIC: &str = "\x1b[3m";
const ANSI_UNDERLINE: &str = "\x1b[4m";
const ANSI_STRIKETHROUGH: &str = "\x1b[9m";
const ANSI_RESET: &str = "\x1b[0m";

static EMOJI_TABLE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("smile", "😄"),
        ("wave", "👋"),
        ("tada", "🎉"),
        ("thumbsup", "👍"),
        ("thumbsdown", "👎"),
        ("heart", "❤️"),
        ("fire", "🔥"),
        ("shrug", "¯\\_(ツ)_/¯"),
    ])
});

/// Apply markdown-style inline styling, turning `**bold**`, `*italic*`,
/// `__underline__`, and `~~strikethrough~~` into ANSI escapes.
pub fn apply_markdown(input: &str) -> String {
    let s = BOLD.replace_all(input, format!("{ANSI_BOLD}$1{ANSI_RESET}").as_str());
    let s = STRIKETHROUGH.replace_all(&s, format!("{ANSI_STRIKETHROUGH}$1{ANSI_RESET}").as_str());
    let s = UNDERLINE.replace_all(&s, format!("{ANSI_UNDERLINE}$1{ANSI_RESET}").as_str());
    let s = ITALIC.replace_all(&s, format!("{ANSI_ITALIC}$1{ANSI_RESET}").as_str());
    s.into_owned()
}

/// Expand `:shortcode:` emoji references; unknown shortcodes pass through
/// unchanged.
pub fn expand_emoji(input: &str) -> String {
    EMOJI_SHORTCODE
        .replace_all(input, |caps: &regex::Captures| {
            let name = &caps[1];
            EMOJI_TABLE.get(name).copied().unwrap_or(&caps[0]).to_string()
        })
        .into_owned()
}

/// Greedy word-wrap at `width` columns, never splitting a word unless it's
/// longer than a whole line.
pub fn word_wrap(input: &str, width: usize) -> String {
    if width == 0 {
        return input.to_string();
    }
    let mut out = String::new();
    for (i, line) in input.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut col = 0;
        for (j, word) in line.split(' ').enumerate() {
            if j > 0 {
                if col + 1 + word.len() > width {
                    out.push('\n');
                    col = 0;
                } else {
                    out.push(' ');
                    col += 1;
                }
            }
            out.push_str(word);
            col += word.len();
        }
    }
    out
}

/// Names usable inside `:shortcode:`, for the `emojis` command.
pub fn known_shortcodes() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = EMOJI_TABLE.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Markdown + emoji only, with no word-wrap applied. Broadcast messages are
/// styled once by the sender's session but wrapped separately per recipient
/// at their own terminal width (spec §4.3), so the two steps are split.
pub fn render_styled(input: &str) -> String {
    let s = apply_markdown(input);
    expand_emoji(&s)
}

/// Full pipeline: markdown, then emoji, then word-wrap. Image replacement
/// is applied separately by the caller (it's async and needs network
/// access; see [`crate::image`]).
pub fn render_line(input: &str, width: usize) -> String {
    word_wrap(&render_styled(input), width)
}

/// Remove every bell byte. Used for a recipient whose bell mode is `off`:
/// spec §4.3 requires stripping `\a` post-render rather than merely not
/// adding one, since the body itself (e.g. an `@everyone` mention) may
/// already carry one.
pub fn strip_bell(input: &str) -> String {
    input.chars().filter(|&c| c != BELL).collect()
}

/// Apply a recipient's bell policy to an already-rendered line. `should_bell`
/// is the caller's verdict from mention/DM/bell-mode-`all` rules, independent
/// of whatever bell bytes the line already carries (e.g. from `@everyone`).
pub fn apply_bell(mut line: String, mode: BellMode, should_bell: bool) -> String {
    if mode == BellMode::Off {
        return strip_bell(&line);
    }
    let has_bell = line.contains(BELL);
    if should_bell && !has_bell {
        line.push(BELL);
    } else if !should_bell && has_bell {
        line = strip_bell(&line);
    }
    line
}

/// Foreground ANSI escape for a palette color name, shared by the `color`
/// command's palette and the prompt grammar's `\h`/`\H`/`\w` coloring.
/// Unknown names fall back to no color.
pub fn ansi_code_for(name: &str) -> &'static str {
    match name {
        "red" => "\x1b[31m",
        "green" => "\x1b[32m",
        "yellow" => "\x1b[33m",
        "blue" => "\x1b[34m",
        "magenta" => "\x1b[35m",
        "cyan" => "\x1b[36m",
        "white" => "\x1b[37m",
        "black" => "\x1b[30m",
        _ => "",
    }
}

pub fn ansi_reset() -> &'static str {
    ANSI_RESET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_becomes_ansi() {
        assert_eq!(apply_markdown("**hi**"), format!("{ANSI_BOLD}hi{ANSI_RESET}"));
    }

    #[test]
    fn known_shortcode_expands() {
        assert_eq!(expand_emoji("hey :wave:"), "hey 👋");
    }

    #[test]
    fn unknown_shortcode_passes_through() {
        assert_eq!(expand_emoji("hey :not_an_emoji:"), "hey :not_an_emoji:");
    }

    #[test]
    fn word_wrap_breaks_at_width() {
        let wrapped = word_wrap("one two three four", 9);
        assert_eq!(wrapped, "one two\nthree\nfour");
    }

    #[test]
    fn strip_bell_removes_all_bell_bytes() {
        assert_eq!(strip_bell(&format!("hi{BELL} there{BELL}")), "hi there");
    }

    #[test]
    fn apply_bell_off_always_strips() {
        let line = apply_bell(format!("hi{BELL}"), BellMode::Off, true);
        assert!(!line.contains(BELL));
    }

    #[test]
    fn apply_bell_adds_when_wanted_and_absent() {
        let line = apply_bell("hi".to_string(), BellMode::On, true);
        assert_eq!(line, format!("hi{BELL}"));
    }

    #[test]
    fn apply_bell_strips_unwanted_embedded_bell() {
        let line = apply_bell(format!("hi{BELL}"), BellMode::On, false);
        assert_eq!(line, "hi");
    }
}
