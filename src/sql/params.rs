//! Named parameter and statement scanning
//!
//! SQLite numbers named parameters by first appearance, so binding values in
//! the order returned here lines them up with the statement.

/// If a string literal, quoted identifier or comment starts at `i`, the
/// index just past it.
fn skip_quoted(bytes: &[u8], mut i: usize) -> Option<usize> {
    match bytes[i] {
        quote @ (b'\'' | b'"' | b'`') => {
            i += 1;
            while i < bytes.len() {
                if bytes[i] == quote {
                    // Doubled quote is an escaped quote
                    if bytes.get(i + 1) == Some(&quote) {
                        i += 2;
                        continue;
                    }
                    break;
                }
                i += 1;
            }
            Some(i + 1)
        }
        b'[' => {
            while i < bytes.len() && bytes[i] != b']' {
                i += 1;
            }
            Some(i + 1)
        }
        b'-' if bytes.get(i + 1) == Some(&b'-') => {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            Some(i)
        }
        b'/' if bytes.get(i + 1) == Some(&b'*') => {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                i += 1;
            }
            Some(i + 2)
        }
        _ => None,
    }
}

fn is_comment(bytes: &[u8], i: usize) -> bool {
    matches!(
        (bytes[i], bytes.get(i + 1)),
        (b'-', Some(&b'-')) | (b'/', Some(&b'*'))
    )
}

/// Names of `:name` / `@name` parameters, in order of first appearance.
/// String literals, quoted identifiers and comments are skipped.
pub fn named_parameters(query: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let bytes = query.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if let Some(next) = skip_quoted(bytes, i) {
            i = next;
            continue;
        }
        match bytes[i] {
            b':' | b'@' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                if end > start {
                    let name = &query[start..end];
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
                i = end.max(i + 1);
            }
            _ => i += 1,
        }
    }
    names
}

/// Number of non-empty statements separated by `;`. Separators inside
/// literals and comments don't count, and a statement holding only
/// whitespace or comments is empty.
pub fn statement_count(query: &str) -> usize {
    let bytes = query.as_bytes();
    let mut count = 0;
    let mut has_code = false;
    let mut i = 0;
    while i < bytes.len() {
        if let Some(next) = skip_quoted(bytes, i) {
            if !is_comment(bytes, i) {
                has_code = true;
            }
            i = next;
            continue;
        }
        match bytes[i] {
            b';' => {
                if has_code {
                    count += 1;
                }
                has_code = false;
            }
            byte if !byte.is_ascii_whitespace() => has_code = true,
            _ => {}
        }
        i += 1;
    }
    if has_code {
        count += 1;
    }
    count
}
