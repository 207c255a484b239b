// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::PatchScript;
use crate::{Error, Result};

/// Writes a [`PatchScript`] into a `tslpatchdata/` layout, merging into any
/// `changes.ini` already there instead of clobbering it.
///
/// Re-writes are stable: existing section and key order is preserved and
/// only genuinely new entries are appended, so writing the same script
/// twice leaves the file byte-identical.
pub struct IncrementalTslPatchDataWriter {
    root: PathBuf,
}

impl IncrementalTslPatchDataWriter {
    /// `root` is the directory that will contain `tslpatchdata/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tslpatchdata_dir(&self) -> PathBuf {
        self.root.join("tslpatchdata")
    }

    pub fn changes_ini_path(&self) -> PathBuf {
        self.tslpatchdata_dir().join("changes.ini")
    }

    /// Serializes `script` to `changes.ini`, merging into the existing file
    /// when one is present. Returns the path written. Per-key merge
    /// conflicts keep the existing entry and are logged, not fatal.
    pub fn write(&self, script: &PatchScript) -> Result<PathBuf> {
        let dir = self.tslpatchdata_dir();
        fs::create_dir_all(&dir).map_err(|e| Error::PatchWriteFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let path = self.changes_ini_path();
        let merged = if path.is_file() {
            let text = fs::read_to_string(&path).map_err(|e| Error::PatchWriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let mut existing = PatchScript::from_ini_str(&text)?;
            for conflict in existing.merge(script) {
                warn!(%conflict, "Keeping existing patch entry");
            }
            existing
        } else {
            script.clone()
        };

        debug!(path = %path.display(), "Writing patch script");
        fs::write(&path, merged.to_ini_string()).map_err(|e| Error::PatchWriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(path)
    }

    /// Stages one added resource's payload next to `changes.ini` so the
    /// install entries have something to copy. `filename` must be a bare
    /// name.
    pub fn stage_payload(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        if Path::new(filename).components().count() != 1 || filename.starts_with('.') {
            return Err(Error::PatchDataInvalid {
                reason: format!("payload name is not a bare filename: {filename:?}"),
            });
        }

        let dir = self.tslpatchdata_dir();
        fs::create_dir_all(&dir).map_err(|e| Error::PatchWriteFailed {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let path = dir.join(filename);
        fs::write(&path, bytes).map_err(|e| Error::PatchWriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ResourceType;
    use crate::diff::ResourceDiffResult;
    use crate::patch::PatchGenerator;

    fn sample_script() -> PatchScript {
        PatchGenerator::generate_from_diff(vec![
            ResourceDiffResult::added("z.utc", Some(ResourceType::Utc), b"new".to_vec()),
            ResourceDiffResult::removed("y.utc", Some(ResourceType::Utc), b"gone".to_vec()),
        ])
    }

    #[test]
    fn rewrite_of_same_script_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IncrementalTslPatchDataWriter::new(dir.path());

        let script = sample_script();
        let path = writer.write(&script).unwrap();
        let first = fs::read(&path).unwrap();

        writer.write(&script).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn merge_preserves_existing_order_and_appends_new() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IncrementalTslPatchDataWriter::new(dir.path());
        writer.write(&sample_script()).unwrap();

        let mut addition = PatchScript::new();
        addition
            .section_mut("TLKList")
            .merge_value("TLKList", "StrRef42", "New line")
            .unwrap();
        let path = writer.write(&addition).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let install = text.find("[InstallList]").unwrap();
        let tlk = text.find("[TLKList]").unwrap();
        // The pre-existing section stays first; the new one is appended
        assert!(install < tlk);
        assert!(text.contains("z.utc=z.utc"));
        assert!(text.contains("StrRef42=New line"));
        assert!(text.contains("; removed: y.utc"));
    }

    #[test]
    fn staged_payloads_land_in_tslpatchdata() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IncrementalTslPatchDataWriter::new(dir.path());

        let path = writer.stage_payload("z.utc", b"payload bytes").unwrap();
        assert_eq!(path, dir.path().join("tslpatchdata").join("z.utc"));
        assert_eq!(fs::read(&path).unwrap(), b"payload bytes");
    }

    #[test]
    fn payload_names_must_be_bare() {
        let dir = tempfile::tempdir().unwrap();
        let writer = IncrementalTslPatchDataWriter::new(dir.path());

        assert!(writer.stage_payload("../z.utc", b"x").is_err());
        assert!(writer.stage_payload("sub/z.utc", b"x").is_err());
    }
}
