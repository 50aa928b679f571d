use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// Matches the `[IMAGE_N]` ordering placeholders the cleaning pass inserts.
pub(crate) fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[IMAGE_(\d+)\]").expect("placeholder pattern is valid"))
}

/// Counts whitespace-separated words, ignoring `[IMAGE_N]` placeholders.
///
/// Used as the minimum-length heuristic against paywalled or empty
/// extractions, so placeholders must not inflate the count.
///
/// # Examples
///
/// ```
/// use newsdesk::util::word_count;
///
/// assert_eq!(word_count("one two three"), 3);
/// assert_eq!(word_count("intro [IMAGE_1] outro"), 2);
/// assert_eq!(word_count("   "), 0);
/// ```
pub fn word_count(s: &str) -> usize {
    placeholder_regex()
        .replace_all(s, " ")
        .split_whitespace()
        .count()
}

/// Truncates a string to at most `max_chars` characters.
///
/// Never splits a multi-byte code point. Returns `Cow::Borrowed` when the
/// input already fits.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Borrowed(&s[..idx]),
        None => Cow::Borrowed(s),
    }
}

/// Short single-line preview of a text for log fields.
pub fn preview(s: &str, max_chars: usize) -> String {
    let line = s.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let cut = truncate_chars(line, max_chars);
    if cut.len() < line.len() {
        format!("{cut}...")
    } else {
        cut.into_owned()
    }
}

/// Strips terminal escape sequences and C0 control characters from a string.
///
/// Feed titles and descriptions come from untrusted remote XML; they are
/// cleaned before they reach the store or the logs. Tab, newline and
/// carriage return are preserved.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    let is_control = |b: u8| b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d);

    if !bytes.iter().any(|&b| is_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: skip parameters up to and including the final byte
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: runs until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_control(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_control(bytes[i]) {
                i += 1;
            }
            // Only ASCII control bytes end a run, so the slice is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}
