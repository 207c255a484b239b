// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use encoding_rs::WINDOWS_1252;

/// How one line changed between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeTag {
    Equal,
    Delete,
    Insert,
}

/// Fraction of printable-or-whitespace bytes a buffer needs before we treat
/// it as text when no encoding matches cleanly.
const PRINTABLE_RATIO: f32 = 0.70;

fn printable_ratio(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 1.0;
    }
    let printable = bytes
        .iter()
        .filter(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
        .count();
    printable as f32 / bytes.len() as f32
}

fn has_forbidden_controls(text: &str) -> bool {
    text.chars()
        .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
}

/// Detects whether a buffer holds text: valid UTF-8, a clean windows-1252
/// decode, or at least 70% printable ASCII plus whitespace. Embedded NULs
/// always mean binary.
pub fn is_text(bytes: &[u8]) -> bool {
    decode_text(bytes).is_some()
}

/// Decodes a buffer with the same policy as [`is_text`]. Returns `None` for
/// binary data.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        if !has_forbidden_controls(text) {
            return Some(text.to_string());
        }
    }

    let (decoded, _, had_errors) = WINDOWS_1252.decode(bytes);
    if !had_errors && !has_forbidden_controls(&decoded) {
        return Some(decoded.into_owned());
    }

    if printable_ratio(bytes) >= PRINTABLE_RATIO {
        return Some(String::from_utf8_lossy(bytes).into_owned());
    }

    None
}

/// A line-oriented comparison: the full op sequence both sides reduce to.
///
/// Computed with a longest-common-subsequence walk; deletions are emitted
/// before insertions at each divergence so re-runs are byte-identical.
pub fn diff_lines(left: &str, right: &str) -> Vec<(ChangeTag, String)> {
    let left_lines: Vec<&str> = left.lines().collect();
    let right_lines: Vec<&str> = right.lines().collect();

    let n = left_lines.len();
    let m = right_lines.len();

    // LCS length table, (n + 1) x (m + 1)
    let mut table = vec![0usize; (n + 1) * (m + 1)];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * (m + 1) + j] = if left_lines[i] == right_lines[j] {
                table[(i + 1) * (m + 1) + j + 1] + 1
            } else {
                table[(i + 1) * (m + 1) + j].max(table[i * (m + 1) + j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if left_lines[i] == right_lines[j] {
            ops.push((ChangeTag::Equal, left_lines[i].to_string()));
            i += 1;
            j += 1;
        } else if table[(i + 1) * (m + 1) + j] >= table[i * (m + 1) + j + 1] {
            ops.push((ChangeTag::Delete, left_lines[i].to_string()));
            i += 1;
        } else {
            ops.push((ChangeTag::Insert, right_lines[j].to_string()));
            j += 1;
        }
    }
    while i < n {
        ops.push((ChangeTag::Delete, left_lines[i].to_string()));
        i += 1;
    }
    while j < m {
        ops.push((ChangeTag::Insert, right_lines[j].to_string()));
        j += 1;
    }

    ops
}
