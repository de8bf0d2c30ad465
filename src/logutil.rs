//! Logging helpers: keep user-supplied text on a single line and keep bot
//! tokens out of log files.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Other control characters are written as `\xNN`. Very long strings are cut
///   with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// UTF-8 safe truncation for log display. Never slices inside a multi-byte
/// character; appends `...` when the input was cut.
pub fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

/// Minimum length of the secret half of a bot token (`<digits>:<secret>`).
const TOKEN_SECRET_MIN: usize = 30;

/// Replace Telegram bot tokens found anywhere in `line` with `[REDACTED]`.
///
/// A token is a run of at least five ASCII digits, a colon, then at least
/// thirty characters from `[A-Za-z0-9_-]`. The numeric bot id is kept so log
/// lines still say which bot was talking.
pub fn redact_secrets(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    let mut copied = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() || (i > 0 && bytes[i - 1].is_ascii_digit()) {
            i += 1;
            continue;
        }
        let digits_start = i;
        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j - digits_start < 5 || j >= bytes.len() || bytes[j] != b':' {
            i = j;
            continue;
        }
        let secret_start = j + 1;
        let mut k = secret_start;
        while k < bytes.len() && (bytes[k].is_ascii_alphanumeric() || bytes[k] == b'_' || bytes[k] == b'-') {
            k += 1;
        }
        if k - secret_start >= TOKEN_SECRET_MIN {
            out.push_str(&line[copied..secret_start]);
            out.push_str("[REDACTED]");
            copied = k;
        }
        i = k.max(j + 1);
    }
    out.push_str(&line[copied..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_tabs() {
        let s = "Line1\nLine2\r\tEnd";
        assert_eq!(escape_log(s), "Line1\\nLine2\\r\\tEnd");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "📡📡📡📡";
        let t = truncate_for_log(s, 9);
        assert!(t.ends_with("..."));
        assert!(t.starts_with("📡"));
    }

    #[test]
    fn truncation_escapes_exactly_once() {
        assert_eq!(truncate_for_log("a\\b\nc", 80), "a\\\\b\\nc");
        assert_eq!(truncate_for_log("x\ny", 80), escape_log("x\ny"));
    }

    #[test]
    fn redacts_token_in_url() {
        let line = "GET https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsawQ/getUpdates failed";
        let red = redact_secrets(line);
        assert_eq!(
            red,
            "GET https://api.telegram.org/bot123456789:[REDACTED]/getUpdates failed"
        );
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        let line = "ACK for id 3735928559 at 12:30:45, node !aaaa1111";
        assert_eq!(redact_secrets(line), line);
    }
}
