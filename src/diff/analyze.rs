// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use super::{DiffType, ResourceDiffResult, StructuredEdit};

/// What a modification does to its target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOperation {
    Add,
    Change,
    Replace,
}

/// One patch-script entry before serialization: where it goes and what it
/// writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub target_section: String,
    /// One level of nesting: e.g. the individual table under the 2DA
    /// section.
    pub target_subsection: Option<String>,
    pub operation: PatchOperation,
    pub key: String,
    pub value: String,
}

/// Translates one diff result into the minimal modification entries that
/// express it in a patch script.
///
/// Structured edits become field/row/string-level entries in the section
/// for their resource family; anything the engine could only compare as
/// bytes becomes a whole-file install entry instead.
pub struct Analyzer;

/// Section names are part of the produced file contract.
pub(crate) const SECTION_TLK: &str = "TLKList";
pub(crate) const SECTION_2DA: &str = "2DAList";
pub(crate) const SECTION_GFF: &str = "GFFList";
pub(crate) const SECTION_SSF: &str = "SSFList";
pub(crate) const SECTION_INSTALL: &str = "InstallList";

/// The default install destination for loose resources.
pub(crate) const DEFAULT_DESTINATION: &str = "override";

impl Analyzer {
    /// Produces modifications for one diff result. `Identical`, `Removed`,
    /// and failed results produce none; removals are advisory and handled
    /// by the generator, not expressed as modifications.
    pub fn analyze(result: &ResourceDiffResult) -> Vec<Modification> {
        if result.diagnostic.is_some() {
            return Vec::new();
        }

        match result.diff_type {
            DiffType::Identical | DiffType::Removed => Vec::new(),
            DiffType::Added => vec![Modification {
                target_section: SECTION_INSTALL.to_string(),
                target_subsection: Some(DEFAULT_DESTINATION.to_string()),
                operation: PatchOperation::Add,
                key: result.right_label.clone(),
                value: result.right_label.clone(),
            }],
            DiffType::Modified => {
                if result.edits.is_empty() {
                    return vec![Modification {
                        target_section: SECTION_INSTALL.to_string(),
                        target_subsection: Some(DEFAULT_DESTINATION.to_string()),
                        operation: PatchOperation::Replace,
                        key: format!("Replace{}", result.right_label),
                        value: result.right_label.clone(),
                    }];
                }
                result
                    .edits
                    .iter()
                    .map(|edit| Self::from_edit(result, edit))
                    .collect()
            }
        }
    }

    fn from_edit(result: &ResourceDiffResult, edit: &StructuredEdit) -> Modification {
        let filename = result.right_label.clone();

        match edit {
            StructuredEdit::AddString { text } => Modification {
                target_section: SECTION_TLK.to_string(),
                target_subsection: None,
                operation: PatchOperation::Add,
                key: "AppendStrRef".to_string(),
                value: text.clone(),
            },
            StructuredEdit::ChangeString { strref, text } => Modification {
                target_section: SECTION_TLK.to_string(),
                target_subsection: None,
                operation: PatchOperation::Change,
                key: format!("StrRef{strref}"),
                value: text.clone(),
            },
            StructuredEdit::AddRow { row_label, cells } => Modification {
                target_section: SECTION_2DA.to_string(),
                target_subsection: Some(filename),
                operation: PatchOperation::Add,
                key: format!("AddRow{row_label}"),
                value: render_cells(cells),
            },
            StructuredEdit::ChangeRow { row_label, cells } => Modification {
                target_section: SECTION_2DA.to_string(),
                target_subsection: Some(filename),
                operation: PatchOperation::Change,
                key: format!("ChangeRow{row_label}"),
                value: render_cells(cells),
            },
            StructuredEdit::AddField { path, value } => Modification {
                target_section: SECTION_GFF.to_string(),
                target_subsection: Some(filename),
                operation: PatchOperation::Add,
                key: path.clone(),
                value: value.clone(),
            },
            StructuredEdit::ChangeField { path, value } => Modification {
                target_section: SECTION_GFF.to_string(),
                target_subsection: Some(filename),
                operation: PatchOperation::Change,
                key: path.clone(),
                value: value.clone(),
            },
            StructuredEdit::ChangeSound { slot, strref } => Modification {
                target_section: SECTION_SSF.to_string(),
                target_subsection: Some(filename),
                operation: PatchOperation::Change,
                key: slot.clone(),
                value: strref.to_string(),
            },
        }
    }
}

/// `name=value` pairs joined in declaration order.
fn render_cells(cells: &[(String, String)]) -> String {
    cells
        .iter()
        .map(|(column, value)| format!("{column}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ResourceType;

    #[test]
    fn added_becomes_install_entry() {
        let result = ResourceDiffResult::added("z.utc", Some(ResourceType::Utc), b"bytes".to_vec());
        let mods = Analyzer::analyze(&result);

        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].target_section, SECTION_INSTALL);
        assert_eq!(mods[0].target_subsection.as_deref(), Some("override"));
        assert_eq!(mods[0].operation, PatchOperation::Add);
        assert_eq!(mods[0].key, "z.utc");
    }

    #[test]
    fn removed_is_advisory_only() {
        let result = ResourceDiffResult::removed("y.utc", Some(ResourceType::Utc), b"bytes".to_vec());
        assert!(Analyzer::analyze(&result).is_empty());
    }

    #[test]
    fn structured_edits_go_to_their_family_section() {
        let result = ResourceDiffResult::modified(
            "spells.2da",
            "spells.2da",
            Some(ResourceType::TwoDA),
            b"left".to_vec(),
            b"right".to_vec(),
            vec![StructuredEdit::ChangeRow {
                row_label: "12".to_string(),
                cells: vec![
                    ("label".to_string(), "FORCE_HEAL".to_string()),
                    ("cost".to_string(), "10".to_string()),
                ],
            }],
        );

        let mods = Analyzer::analyze(&result);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].target_section, SECTION_2DA);
        assert_eq!(mods[0].target_subsection.as_deref(), Some("spells.2da"));
        assert_eq!(mods[0].key, "ChangeRow12");
        assert_eq!(mods[0].value, "label=FORCE_HEAL,cost=10");
    }

    #[test]
    fn unstructured_modification_replaces_the_file() {
        let result = ResourceDiffResult::modified(
            "a.mdl",
            "a.mdl",
            Some(ResourceType::Mdl),
            vec![0, 1],
            vec![2, 3],
            Vec::new(),
        );

        let mods = Analyzer::analyze(&result);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].operation, PatchOperation::Replace);
        assert_eq!(mods[0].key, "Replacea.mdl");
    }

    #[test]
    fn string_table_edits() {
        let result = ResourceDiffResult::modified(
            "dialog.tlk",
            "dialog.tlk",
            Some(ResourceType::Tlk),
            b"l".to_vec(),
            b"r".to_vec(),
            vec![
                StructuredEdit::ChangeString {
                    strref: 42,
                    text: "New line".to_string(),
                },
                StructuredEdit::AddString {
                    text: "Appended".to_string(),
                },
            ],
        );

        let mods = Analyzer::analyze(&result);
        assert_eq!(mods[0].target_section, SECTION_TLK);
        assert_eq!(mods[0].key, "StrRef42");
        assert_eq!(mods[1].key, "AppendStrRef");
        assert_eq!(mods[1].operation, PatchOperation::Add);
    }
}
