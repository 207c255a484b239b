// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeSet;
use std::path::Path;

use tracing::warn;

use crate::diff::{Analyzer, DiffType, Modification, ResourceDiffResult};
use crate::installation::Installation;
use crate::{Error, Result};

mod writer;
pub use writer::IncrementalTslPatchDataWriter;

use crate::diff::analyze::{SECTION_2DA, SECTION_GFF, SECTION_INSTALL, SECTION_SSF};

/// A key's value in a patch script: one string, or several accumulated for
/// the same key.
///
/// The second distinct write to a key upgrades it from `Scalar` to `List`
/// instead of overwriting; writing an already-present value again is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(v) => Some(v),
            Value::List(_) => None,
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        match self {
            Value::Scalar(v) => v == value,
            Value::List(values) => values.iter().any(|v| v == value),
        }
    }

    /// Appends unconditionally, preserving duplicates. Used by the parser so
    /// a loaded file serializes back byte-identically.
    fn push_raw(&mut self, value: String) {
        match self {
            Value::Scalar(existing) => {
                *self = Value::List(vec![std::mem::take(existing), value]);
            }
            Value::List(values) => values.push(value),
        }
    }

    /// The deduplicating merge: identical values are dropped, new values
    /// upgrade the shape to a list.
    fn merge_scalar(&mut self, value: &str) {
        if self.contains(value) {
            return;
        }
        self.push_raw(value.to_string());
    }

    fn render(&self, key: &str, out: &mut String) {
        match self {
            Value::Scalar(v) => {
                out.push_str(key);
                out.push('=');
                out.push_str(v);
                out.push('\n');
            }
            Value::List(values) => {
                for v in values {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(v);
                    out.push('\n');
                }
            }
        }
    }
}

/// One named section: insertion-ordered unique keys plus advisory comment
/// lines.
///
/// Some keys are *references*: their value names another section of the
/// script (a sub-table). Reference keys hold exactly one target and refuse
/// data writes; that shape clash is the one per-key merge failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    entries: Vec<(String, Value)>,
    refs: BTreeSet<String>,
    comments: Vec<String>,
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn is_reference(&self, key: &str) -> bool {
        self.refs.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.comments.is_empty()
    }

    /// Merges `value` into `key` with scalar-to-list upgrade semantics.
    /// Fails when `key` is a subsection reference.
    pub fn merge_value(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        if self.refs.contains(key) {
            if self.get(key).is_some_and(|v| v.contains(value)) {
                return Ok(());
            }
            return Err(Error::PatchScriptConflict {
                section: section.to_string(),
                key: key.to_string(),
            });
        }
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => existing.merge_scalar(value),
            None => self
                .entries
                .push((key.to_string(), Value::Scalar(value.to_string()))),
        }
        Ok(())
    }

    /// Marks `key` as pointing at the subsection named `target`. Fails when
    /// the key already holds data or a different target.
    pub fn set_reference(&mut self, section: &str, key: &str, target: &str) -> Result<()> {
        match self.get(key) {
            Some(existing) => {
                if self.refs.contains(key) && existing.contains(target) {
                    Ok(())
                } else {
                    Err(Error::PatchScriptConflict {
                        section: section.to_string(),
                        key: key.to_string(),
                    })
                }
            }
            None => {
                self.entries
                    .push((key.to_string(), Value::Scalar(target.to_string())));
                self.refs.insert(key.to_string());
                Ok(())
            }
        }
    }

    /// Adds an advisory comment line, once.
    pub fn add_comment(&mut self, text: &str) {
        if !self.comments.iter().any(|c| c == text) {
            self.comments.push(text.to_string());
        }
    }

    /// Every subsection name this section's reference keys point at.
    fn referenced_targets(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| self.refs.contains(k))
            .filter_map(|(_, v)| v.as_scalar())
            .collect()
    }
}

/// The ordered patch script: section order is insertion order and survives
/// merge and re-serialization unchanged, as does key order within each
/// section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchScript {
    sections: Vec<(String, Section)>,
}

impl PatchScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// The section named `name`, created empty at the end when absent.
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        if !self.sections.iter().any(|(n, _)| n == name) {
            self.sections.push((name.to_string(), Section::default()));
        }
        // Just ensured present
        let index = self
            .sections
            .iter()
            .position(|(n, _)| n == name)
            .unwrap_or_default();
        &mut self.sections[index].1
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Parses the section-oriented key=value dialect this crate writes.
    ///
    /// Duplicate key lines become a `List` in file order, so a parsed script
    /// serializes back byte-identically. Keys whose value names a later
    /// section are re-marked as subsection references.
    pub fn from_ini_str(text: &str) -> Result<Self> {
        let mut script = Self::new();
        let mut current: Option<String> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix(';') {
                let section = current.as_deref().ok_or_else(|| Error::PatchDataInvalid {
                    reason: format!("comment before any section header: {line:?}"),
                })?;
                let section = script.section_mut(section);
                section.comments.push(comment.trim_start().to_string());
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                script.section_mut(name);
                current = Some(name.to_string());
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| Error::PatchDataInvalid {
                reason: format!("malformed line: {line:?}"),
            })?;
            let section_name = current.as_deref().ok_or_else(|| Error::PatchDataInvalid {
                reason: format!("key before any section header: {line:?}"),
            })?;
            let section = script.section_mut(section_name);
            match section.entries.iter_mut().find(|(k, _)| k == key) {
                Some((_, existing)) => existing.push_raw(value.to_string()),
                None => section
                    .entries
                    .push((key.to_string(), Value::Scalar(value.to_string()))),
            }
        }

        script.rebuild_references();
        Ok(script)
    }

    /// Re-derives which keys are subsection references: a scalar naming
    /// another section of this script.
    fn rebuild_references(&mut self) {
        let names: BTreeSet<String> = self.section_names().map(str::to_string).collect();
        for (name, section) in &mut self.sections {
            section.refs.clear();
            for (key, value) in &section.entries {
                if let Some(target) = value.as_scalar() {
                    if target != name && names.contains(target) {
                        section.refs.insert(key.clone());
                    }
                }
            }
        }
    }

    pub fn to_ini_string(&self) -> String {
        let mut out = String::new();
        for (index, (name, section)) in self.sections.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            out.push('[');
            out.push_str(name);
            out.push_str("]\n");
            for comment in &section.comments {
                out.push_str("; ");
                out.push_str(comment);
                out.push('\n');
            }
            for (key, value) in &section.entries {
                value.render(key, &mut out);
            }
        }
        out
    }

    /// Merges `other` into `self`, preserving this script's existing section
    /// and key order and appending what is new. Each conflicting key is
    /// skipped and reported; the rest of the merge proceeds.
    pub fn merge(&mut self, other: &PatchScript) -> Vec<Error> {
        let mut conflicts = Vec::new();
        for (name, incoming) in &other.sections {
            let section = self.section_mut(name);
            for comment in &incoming.comments {
                section.add_comment(comment);
            }
            for (key, value) in &incoming.entries {
                let outcome = if incoming.refs.contains(key) {
                    match value.as_scalar() {
                        Some(target) => section.set_reference(name, key, target),
                        None => Err(Error::PatchScriptConflict {
                            section: name.clone(),
                            key: key.clone(),
                        }),
                    }
                } else {
                    let values: Vec<&str> = match value {
                        Value::Scalar(v) => vec![v.as_str()],
                        Value::List(vs) => vs.iter().map(String::as_str).collect(),
                    };
                    values
                        .into_iter()
                        .try_for_each(|v| section.merge_value(name, key, v))
                };
                if let Err(error) = outcome {
                    conflicts.push(error);
                }
            }
        }
        conflicts
    }
}

/// Prefix used for the keys that point a section at its sub-tables.
fn reference_prefix(section: &str) -> &'static str {
    match section {
        SECTION_2DA => "Table",
        SECTION_GFF | SECTION_SSF => "File",
        SECTION_INSTALL => "install_folder",
        _ => "Entry",
    }
}

/// Folds analyzer output into an ordered, de-duplicated [`PatchScript`].
pub struct PatchGenerator;

impl PatchGenerator {
    /// Builds a script from a run of diff results.
    ///
    /// `Added` and unstructured `Modified` results become install entries,
    /// structured edits become section entries via the analyzer, and
    /// `Removed` results become advisory comments only. Per-key conflicts
    /// are skipped with a warning; they cannot abort the run.
    pub fn generate_from_diff(
        results: impl IntoIterator<Item = ResourceDiffResult>,
    ) -> PatchScript {
        let mut script = PatchScript::new();
        for result in results {
            if let Some(diagnostic) = &result.diagnostic {
                script
                    .section_mut(SECTION_INSTALL)
                    .add_comment(&format!("skipped {}: {diagnostic}", result.left_label));
                continue;
            }
            if result.diff_type == DiffType::Removed {
                script
                    .section_mut(SECTION_INSTALL)
                    .add_comment(&format!("removed: {}", result.left_label));
                continue;
            }
            for modification in Analyzer::analyze(&result) {
                if let Err(error) = Self::apply_modification(&mut script, &modification) {
                    warn!(%error, key = %modification.key, "Skipping conflicting patch entry");
                }
            }
        }
        script
    }

    /// Routes one modification into its section or named sub-table.
    pub fn apply_modification(script: &mut PatchScript, modification: &Modification) -> Result<()> {
        let target = match &modification.target_subsection {
            None => modification.target_section.clone(),
            Some(subsection) => Self::ensure_subsection(
                script,
                &modification.target_section,
                subsection,
            )?,
        };
        script
            .section_mut(&target)
            .merge_value(&target, &modification.key, &modification.value)
    }

    /// Guarantees a parent key referencing the sub-table named `display`,
    /// plus the sub-table section itself, and returns the sub-table's name.
    fn ensure_subsection(
        script: &mut PatchScript,
        parent: &str,
        display: &str,
    ) -> Result<String> {
        let prefix = reference_prefix(parent);
        let parent_section = script.section_mut(parent);

        let already_referenced = parent_section
            .referenced_targets()
            .iter()
            .any(|target| *target == display);
        if !already_referenced {
            let ordinal = parent_section.referenced_targets().len();
            parent_section.set_reference(parent, &format!("{prefix}{ordinal}"), display)?;
        }

        script.section_mut(display);
        Ok(display.to_string())
    }

    /// Merges raw `key=value` (or `; comment`) lines into one section.
    /// Idempotent: merging the same lines twice yields the same script.
    pub fn merge_section_lines(
        script: &mut PatchScript,
        section: &str,
        lines: &[String],
    ) -> Vec<Error> {
        let mut conflicts = Vec::new();
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix(';') {
                script
                    .section_mut(section)
                    .add_comment(comment.trim_start());
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    if let Err(error) = script.section_mut(section).merge_value(section, key, value)
                    {
                        conflicts.push(error);
                    }
                }
                None => conflicts.push(Error::PatchDataInvalid {
                    reason: format!("malformed line: {line:?}"),
                }),
            }
        }
        conflicts
    }

    /// Parses serialized script text and merges every section of it.
    pub fn merge_sections_from_serializer(
        script: &mut PatchScript,
        text: &str,
    ) -> Result<Vec<Error>> {
        let parsed = PatchScript::from_ini_str(text)?;
        Ok(script.merge(&parsed))
    }

    /// Pre-flight validation before any file is written: the target must be
    /// a writable directory, every subsection reference must resolve, and
    /// install destinations must stay inside the target installation.
    pub fn validate_tslpatchdata_arguments(target: &Path, script: &PatchScript) -> Result<()> {
        let metadata = std::fs::metadata(target).map_err(|e| Error::PatchDataInvalid {
            reason: format!("target {} is not accessible: {e}", target.display()),
        })?;
        if !metadata.is_dir() {
            return Err(Error::PatchDataInvalid {
                reason: format!("target {} is not a directory", target.display()),
            });
        }
        if metadata.permissions().readonly() {
            return Err(Error::PatchDataInvalid {
                reason: format!("target {} is read-only", target.display()),
            });
        }

        for (name, section) in &script.sections {
            for target_name in section.referenced_targets() {
                if script.section(target_name).is_none() {
                    return Err(Error::PatchDataInvalid {
                        reason: format!(
                            "section {name} references missing sub-table {target_name}"
                        ),
                    });
                }
            }
        }

        if let Some(install) = script.section(SECTION_INSTALL) {
            for folder in install.referenced_targets() {
                let suspicious = Path::new(folder)
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir));
                if suspicious {
                    return Err(Error::PatchDataInvalid {
                        reason: format!("install destination escapes the installation: {folder}"),
                    });
                }
            }
        }

        Ok(())
    }

    /// The install destinations a script for `installation` may target:
    /// the override directory plus every discovered capsule.
    pub fn determine_install_folders(installation: &Installation) -> Vec<String> {
        let mut folders = vec!["override".to_string()];
        folders.extend(
            installation
                .module_names()
                .iter()
                .map(|name| format!("modules/{name}")),
        );
        folders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ResourceType;
    use crate::diff::PatchOperation;

    fn two_da_change() -> Modification {
        Modification {
            target_section: SECTION_2DA.to_string(),
            target_subsection: Some("spells.2da".to_string()),
            operation: PatchOperation::Change,
            key: "ChangeRow12".to_string(),
            value: "cost=10".to_string(),
        }
    }

    #[test]
    fn second_write_upgrades_scalar_to_list() {
        let mut script = PatchScript::new();
        let section = script.section_mut("TLKList");
        section.merge_value("TLKList", "AppendStrRef", "first").unwrap();
        section.merge_value("TLKList", "AppendStrRef", "second").unwrap();
        section.merge_value("TLKList", "AppendStrRef", "first").unwrap();

        assert_eq!(
            script.section("TLKList").unwrap().get("AppendStrRef"),
            Some(&Value::List(vec!["first".to_string(), "second".to_string()]))
        );
    }

    #[test]
    fn merge_section_lines_is_idempotent() {
        let lines = vec![
            "StrRef42=New line".to_string(),
            "; removed: y.utc".to_string(),
        ];

        let mut once = PatchScript::new();
        assert!(PatchGenerator::merge_section_lines(&mut once, "TLKList", &lines).is_empty());
        let mut twice = once.clone();
        assert!(PatchGenerator::merge_section_lines(&mut twice, "TLKList", &lines).is_empty());

        assert_eq!(once, twice);
        assert_eq!(once.to_ini_string(), twice.to_ini_string());
    }

    #[test]
    fn ini_round_trips_exactly() {
        let text = "[TLKList]\nStrRef42=New line\nAppendStrRef=a\nAppendStrRef=b\n\n[2DAList]\nTable0=spells.2da\n\n[spells.2da]\nChangeRow12=cost=10\n";
        let script = PatchScript::from_ini_str(text).unwrap();
        assert_eq!(script.to_ini_string(), text);

        // Table0 points at a real section and is re-marked as a reference
        assert!(script.section("2DAList").unwrap().is_reference("Table0"));
    }

    #[test]
    fn subsections_are_referenced_once() {
        let mut script = PatchScript::new();
        PatchGenerator::apply_modification(&mut script, &two_da_change()).unwrap();
        PatchGenerator::apply_modification(
            &mut script,
            &Modification {
                key: "AddRow13".to_string(),
                operation: PatchOperation::Add,
                value: "cost=20".to_string(),
                ..two_da_change()
            },
        )
        .unwrap();

        let parent = script.section(SECTION_2DA).unwrap();
        assert_eq!(parent.keys().collect::<Vec<_>>(), ["Table0"]);
        let table = script.section("spells.2da").unwrap();
        assert_eq!(table.keys().collect::<Vec<_>>(), ["ChangeRow12", "AddRow13"]);
    }

    #[test]
    fn data_write_to_reference_key_conflicts() {
        let mut script = PatchScript::new();
        PatchGenerator::apply_modification(&mut script, &two_da_change()).unwrap();

        let result = script
            .section_mut(SECTION_2DA)
            .merge_value(SECTION_2DA, "Table0", "something else");
        assert!(matches!(result, Err(Error::PatchScriptConflict { .. })));

        // The conflicting key kept its original value
        assert_eq!(
            script.section(SECTION_2DA).unwrap().get("Table0").unwrap().as_scalar(),
            Some("spells.2da")
        );
    }

    #[test]
    fn removed_resources_become_comments() {
        let results = vec![
            ResourceDiffResult::removed("y.utc", Some(ResourceType::Utc), b"gone".to_vec()),
            ResourceDiffResult::added("z.utc", Some(ResourceType::Utc), b"new".to_vec()),
        ];
        let script = PatchGenerator::generate_from_diff(results);

        let install = script.section(SECTION_INSTALL).unwrap();
        assert_eq!(install.comments(), ["removed: y.utc"]);
        // The removal produced no actionable key anywhere
        assert!(install.keys().all(|k| k != "y.utc"));
        assert_eq!(
            script.section("override").unwrap().get("z.utc").unwrap().as_scalar(),
            Some("z.utc")
        );
    }

    #[test]
    fn generate_twice_is_identical() {
        let results = || {
            vec![
                ResourceDiffResult::modified(
                    "spells.2da",
                    "spells.2da",
                    Some(ResourceType::TwoDA),
                    b"l".to_vec(),
                    b"r".to_vec(),
                    vec![crate::diff::StructuredEdit::ChangeRow {
                        row_label: "3".to_string(),
                        cells: vec![("name".to_string(), "1234".to_string())],
                    }],
                ),
                ResourceDiffResult::added("z.utc", Some(ResourceType::Utc), b"new".to_vec()),
            ]
        };

        let first = PatchGenerator::generate_from_diff(results());
        let second = PatchGenerator::generate_from_diff(results());
        assert_eq!(first.to_ini_string(), second.to_ini_string());
    }

    #[test]
    fn validation_rejects_escaping_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = PatchScript::new();
        script
            .section_mut(SECTION_INSTALL)
            .set_reference(SECTION_INSTALL, "install_folder0", "../outside")
            .unwrap();
        script.section_mut("../outside");

        let result = PatchGenerator::validate_tslpatchdata_arguments(dir.path(), &script);
        assert!(matches!(result, Err(Error::PatchDataInvalid { .. })));
    }

    #[test]
    fn validation_rejects_dangling_subsections() {
        let dir = tempfile::tempdir().unwrap();
        let text = "[2DAList]\nTable0=spells.2da\n\n[spells.2da]\nChangeRow0=x=1\n";
        let mut script = PatchScript::from_ini_str(text).unwrap();
        PatchGenerator::validate_tslpatchdata_arguments(dir.path(), &script).unwrap();

        // Drop the sub-table but keep the reference
        script.sections.retain(|(name, _)| name != "spells.2da");
        script.rebuild_references();
        // rebuild_references demotes the dangling key, so re-mark it
        script.section_mut("2DAList").refs.insert("Table0".to_string());

        let result = PatchGenerator::validate_tslpatchdata_arguments(dir.path(), &script);
        assert!(matches!(result, Err(Error::PatchDataInvalid { .. })));
    }

    #[test]
    fn install_folders_come_from_the_installation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("override")).unwrap();
        std::fs::create_dir_all(dir.path().join("modules")).unwrap();
        std::fs::write(
            dir.path().join("modules/danm13.mod"),
            crate::erf::tests::build_erf(&[("door01", ResourceType::Utd, b"door")]),
        )
        .unwrap();

        let install = Installation::from_existing(dir.path()).unwrap();
        assert_eq!(
            PatchGenerator::determine_install_folders(&install),
            ["override", "modules/danm13.mod"]
        );
    }
}
