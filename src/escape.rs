//! Quoting helpers for splicing values into SQL text.
//!
//! Prefer bound parameters; these exist for the places that cannot take
//! them, such as identifiers and utility statements.

/// Escape a string for use inside a single-quoted SQL literal.
///
/// Quotes are doubled. When the server runs with
/// `standard_conforming_strings` off, backslashes are literal escape
/// characters and get doubled as well.
pub fn escape_string(s: &str, standard_conforming: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if !standard_conforming => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

/// Escape a string into a complete, standalone SQL literal including the
/// surrounding quotes.
///
/// If the input contains backslashes the literal is written in `E'...'`
/// form so its meaning does not depend on server settings.
pub fn escape_literal(s: &str) -> String {
    let has_backslash = s.contains('\\');
    let mut out = String::with_capacity(s.len() + 3);
    if has_backslash {
        out.push('E');
    }
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if has_backslash => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Escape a name into a double-quoted SQL identifier.
pub fn escape_identifier(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Escape binary data into bytea hex form, suitable for inclusion inside
/// a single-quoted literal.
pub fn escape_bytea(data: &[u8], standard_conforming: bool) -> String {
    let mut out = String::with_capacity(data.len() * 2 + 4);
    if standard_conforming {
        out.push_str("\\x");
    } else {
        out.push_str("\\\\x");
    }
    for &b in data {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode a bytea text representation, either hex (`\x...`) or the legacy
/// octal-escape form, back into bytes.
pub fn unescape_bytea(s: &str) -> Option<Vec<u8>> {
    let bytes = s.as_bytes();
    if let Some(hex) = bytes.strip_prefix(b"\\x") {
        if hex.len() % 2 != 0 {
            return None;
        }
        let mut out = Vec::with_capacity(hex.len() / 2);
        for pair in hex.chunks_exact(2) {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            out.push((hi * 16 + lo) as u8);
        }
        return Some(out);
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some((&b, tail)) = rest.split_first() {
        if b != b'\\' {
            out.push(b);
            rest = tail;
            continue;
        }
        match tail {
            [b'\\', tail @ ..] => {
                out.push(b'\\');
                rest = tail;
            }
            [a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', tail @ ..] => {
                out.push((a - b'0') * 64 + (b - b'0') * 8 + (c - b'0'));
                rest = tail;
            }
            _ => return None,
        }
    }
    Some(out)
}
