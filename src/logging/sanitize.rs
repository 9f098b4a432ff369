//! Message cleanup before a record hits the file
//!
//! Terminal escape sequences are removed and every message is terminated by exactly one
//! newline, so each `log` call produces one line.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// CSI sequences introduced by ESC or the single-byte CSI (0x9b)
fn ansi_regex() -> &'static Regex {
    static ANSI_RE: OnceLock<Regex> = OnceLock::new();
    ANSI_RE.get_or_init(|| {
        Regex::new(r"[\x1b\x{9b}][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]")
            .expect("ANSI regex is valid")
    })
}

/// Remove ANSI/VT100 escape sequences
///
/// Removal repeats until nothing matches, because deleting one sequence can splice a
/// lone ESC onto text that then forms a new one. The result is therefore a fixpoint.
pub fn strip_ansi(input: &str) -> Cow<'_, str> {
    let re = ansi_regex();
    if !re.is_match(input) {
        return Cow::Borrowed(input);
    }

    let mut out = re.replace_all(input, "").into_owned();
    while re.is_match(&out) {
        out = re.replace_all(&out, "").into_owned();
    }
    Cow::Owned(out)
}

/// Strip escapes and end the message with exactly one `\n`
pub fn sanitize(input: &str) -> String {
    let stripped = strip_ansi(input);
    let body = stripped.trim_end_matches(['\n', '\r']);
    let mut line = String::with_capacity(body.len() + 1);
    line.push_str(body);
    line.push('\n');
    line
}
