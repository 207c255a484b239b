// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use super::text::{ChangeTag, decode_text, diff_lines};
use super::{DiffType, ResourceDiffResult};

/// Which rendering a caller wants for a diff result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffFormat {
    /// A single summary line.
    Default,
    /// Patch-style +/- hunks.
    Unified,
    /// Two aligned columns.
    SideBySide,
    /// Change hunks with this many surrounding context lines.
    Context(usize),
}

/// Renders one diff result as text. Implementations are pure functions of
/// the result: no I/O, no re-fetching.
pub trait DiffFormatter: Send + Sync {
    fn format_diff(&self, result: &ResourceDiffResult) -> String;
}

/// Selects a formatter implementation for `format`.
pub fn make_formatter(format: DiffFormat) -> Box<dyn DiffFormatter> {
    match format {
        DiffFormat::Default => Box::new(DefaultFormatter),
        DiffFormat::Unified => Box::new(UnifiedFormatter),
        DiffFormat::SideBySide => Box::new(SideBySideFormatter),
        DiffFormat::Context(lines) => Box::new(ContextFormatter { context: lines }),
    }
}

fn summary_line(result: &ResourceDiffResult) -> String {
    if let Some(diagnostic) = &result.diagnostic {
        return format!("error comparing {}: {diagnostic}", result.left_label);
    }
    match result.diff_type {
        DiffType::Identical => format!("identical: {}", result.left_label),
        DiffType::Added => format!(
            "added: {} ({} bytes)",
            result.right_label,
            result.right_value.as_ref().map(|v| v.len()).unwrap_or(0)
        ),
        DiffType::Removed => format!(
            "removed: {} ({} bytes)",
            result.left_label,
            result.left_value.as_ref().map(|v| v.len()).unwrap_or(0)
        ),
        DiffType::Modified => format!("modified: {}", result.left_label),
    }
}

/// The decoded payload pair, when both sides are text. Every formatter
/// degrades identically to the binary summary when this is `None`.
fn modified_text(result: &ResourceDiffResult) -> Option<(String, String)> {
    let left = decode_text(result.left_value.as_ref()?)?;
    let right = decode_text(result.right_value.as_ref()?)?;
    Some((left, right))
}

fn binary_line(result: &ResourceDiffResult) -> String {
    format!(
        "binary resources differ, {} bytes vs {} bytes",
        result.left_value.as_ref().map(|v| v.len()).unwrap_or(0),
        result.right_value.as_ref().map(|v| v.len()).unwrap_or(0),
    )
}

struct DefaultFormatter;

impl DiffFormatter for DefaultFormatter {
    fn format_diff(&self, result: &ResourceDiffResult) -> String {
        summary_line(result)
    }
}

/// One contiguous run of changes plus its context, as op indices.
struct Hunk {
    start: usize,
    end: usize,
    left_start: usize,
    right_start: usize,
}

fn collect_hunks(ops: &[(ChangeTag, String)], context: usize) -> Vec<Hunk> {
    // Line numbers each op starts at, per side
    let mut left_line = 1usize;
    let mut right_line = 1usize;
    let mut positions = Vec::with_capacity(ops.len());
    for (tag, _) in ops {
        positions.push((left_line, right_line));
        match tag {
            ChangeTag::Equal => {
                left_line += 1;
                right_line += 1;
            }
            ChangeTag::Delete => left_line += 1,
            ChangeTag::Insert => right_line += 1,
        }
    }

    let mut hunks: Vec<Hunk> = Vec::new();
    for (index, (tag, _)) in ops.iter().enumerate() {
        if *tag == ChangeTag::Equal {
            continue;
        }
        let start = index.saturating_sub(context);
        let end = (index + context + 1).min(ops.len());

        match hunks.last_mut() {
            Some(last) if start <= last.end => last.end = end,
            _ => hunks.push(Hunk {
                start,
                end,
                left_start: positions[start].0,
                right_start: positions[start].1,
            }),
        }
    }
    hunks
}

fn render_hunks(
    result: &ResourceDiffResult,
    context: usize,
    header: impl Fn(&ResourceDiffResult) -> String,
) -> String {
    if result.diff_type != DiffType::Modified || result.diagnostic.is_some() {
        return summary_line(result);
    }
    let Some((left, right)) = modified_text(result) else {
        return binary_line(result);
    };

    let ops = diff_lines(&left, &right);
    let hunks = collect_hunks(&ops, context);

    let mut out = header(result);
    for hunk in hunks {
        let slice = &ops[hunk.start..hunk.end];
        let left_count = slice
            .iter()
            .filter(|(tag, _)| *tag != ChangeTag::Insert)
            .count();
        let right_count = slice
            .iter()
            .filter(|(tag, _)| *tag != ChangeTag::Delete)
            .count();

        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.left_start, left_count, hunk.right_start, right_count
        ));
        for (tag, line) in slice {
            let prefix = match tag {
                ChangeTag::Equal => ' ',
                ChangeTag::Delete => '-',
                ChangeTag::Insert => '+',
            };
            out.push(prefix);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

struct UnifiedFormatter;

impl DiffFormatter for UnifiedFormatter {
    fn format_diff(&self, result: &ResourceDiffResult) -> String {
        render_hunks(result, 3, |r| {
            format!("--- {}\n+++ {}\n", r.left_label, r.right_label)
        })
    }
}

struct ContextFormatter {
    context: usize,
}

impl DiffFormatter for ContextFormatter {
    fn format_diff(&self, result: &ResourceDiffResult) -> String {
        render_hunks(result, self.context, |r| {
            format!("*** {} vs {}\n", r.left_label, r.right_label)
        })
    }
}

struct SideBySideFormatter;

const COLUMN_WIDTH: usize = 40;

fn column(text: &str) -> String {
    let mut cell: String = text.chars().take(COLUMN_WIDTH).collect();
    while cell.chars().count() < COLUMN_WIDTH {
        cell.push(' ');
    }
    cell
}

impl DiffFormatter for SideBySideFormatter {
    fn format_diff(&self, result: &ResourceDiffResult) -> String {
        if result.diff_type != DiffType::Modified || result.diagnostic.is_some() {
            return summary_line(result);
        }
        let Some((left, right)) = modified_text(result) else {
            return binary_line(result);
        };

        let mut out = format!(
            "{} | {}\n",
            column(&result.left_label),
            result.right_label
        );
        for (tag, line) in diff_lines(&left, &right) {
            let (left_cell, marker, right_cell) = match tag {
                ChangeTag::Equal => (line.clone(), ' ', line),
                ChangeTag::Delete => (line, '<', String::new()),
                ChangeTag::Insert => (String::new(), '>', line),
            };
            out.push_str(&format!("{} {} {}\n", column(&left_cell), marker, right_cell));
        }
        out
    }
}
