//! Plain-text normalization of generated replies.
//!
//! Model output arrives with markdown habits (bold labels, assorted bullet
//! glyphs, ragged spacing). `format` reduces it to the plain vocabulary the
//! chat view renders: `Label: description` lines, `•` bullets, single blank
//! lines between paragraphs.

use std::sync::LazyLock;

use regex::Regex;

/// `1. **Label** - description` on a single line.
static NUMBERED_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\d+\.[ \t]+\*\*(.+?)\*\*[ \t]*-[ \t]*(.+)$").unwrap()
});

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").unwrap());

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-•*+][ \t]+").unwrap());

static BOLD_STAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

static BOLD_UNDERSCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__(.+?)__").unwrap());

static ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*\n]+?)\*").unwrap());

/// Whitespace other than newlines.
static INLINE_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\S\n]+").unwrap());

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Prefix of every list item.
pub const BULLET_PREFIX: &str = "• ";

/// Upper bound on normalization passes; real replies settle in one or two.
const MAX_PASSES: usize = 8;

/// Normalize raw model output into display-ready plain text.
///
/// Applying `format` to its own output returns it unchanged.
pub fn format(raw: &str) -> String {
    let mut text = raw.replace("\r\n", "\n");
    for _ in 0..MAX_PASSES {
        let next = normalize_pass(&text);
        if next == text {
            break;
        }
        text = next;
    }
    text
}

/// One sweep of every rule. Stripping emphasis can expose a heading or
/// bullet marker, or a nested emphasis run, so callers repeat it.
fn normalize_pass(text: &str) -> String {
    // Labels go first: once bold markers are gone the pattern no longer matches.
    let text = NUMBERED_LABEL_RE.replace_all(text, "$1: $2");
    let text = BOLD_STAR_RE.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORE_RE.replace_all(&text, "$1");
    let text = HEADING_RE.replace_all(&text, "");
    // Star bullets before italics so `* a * b` stays a list item.
    let text = BULLET_RE.replace_all(&text, BULLET_PREFIX);
    let text = ITALIC_RE.replace_all(&text, "$1");

    let lines: Vec<String> = text
        .lines()
        .map(|line| INLINE_SPACE_RE.replace_all(line.trim(), " ").into_owned())
        .collect();
    let joined = lines.join("\n");

    BLANK_RUN_RE
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}
