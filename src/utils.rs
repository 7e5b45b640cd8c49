//! Small string helpers for node keys.

use std::collections::BTreeSet;

/// Lowercases `input` and replaces every run of non-alphanumeric characters
/// with a single `-`, trimming leading and trailing dashes. An input with no
/// alphanumeric characters at all becomes `"node"`.
#[must_use]
pub fn sanitize_key(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        out.push_str("node");
    }
    out
}

/// Returns `base` if it is not taken, otherwise `base-2`, `base-3`, ... until
/// a free key is found.
#[must_use]
pub fn make_unique_key(base: &str, taken: &BTreeSet<&str>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut counter = 2usize;
    loop {
        let candidate = format!("{base}-{counter}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        counter += 1;
    }
}
