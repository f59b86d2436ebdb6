//! Text helpers shared by the grammar, the executor and the response cache

/// Replace every run of characters rejected by `keep` with a single space.
pub fn collapse(text: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = false;
    for c in text.chars() {
        if keep(c) {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push(' ');
            in_gap = true;
        }
    }
    out
}

/// Normalize a value for `case` matching.
///
/// Lower-cases, collapses every run of non-alphanumeric characters into a
/// single space and trims the result, so `"Yes!!"` and `"yes"` compare equal.
pub fn normalize(text: &str) -> String {
    collapse(&text.to_lowercase(), |c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .trim()
        .to_string()
}

/// Escape text for a quoted string literal. Inverse of the grammar's
/// unescaping, which understands `\"` and `\\` only.
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
