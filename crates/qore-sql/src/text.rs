// SPDX-License-Identifier: Apache-2.0

/// Collapses every run of whitespace into a single space and trims both ends.
///
/// Used for single-line query logs, so embedded newlines and tabs are folded
/// as well.
pub fn normalize_whitespace(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for word in sql.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
