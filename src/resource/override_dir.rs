// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::ByteBuffer;
use crate::common::ResourceId;

use super::{LayerKind, ResourceLayer};

/// The loose-file override directory, the highest-precedence layer.
///
/// The directory is walked once at construction in a deterministic
/// (lexicographic, case-insensitive) order; files whose extension is not a
/// known resource type are ignored.
pub struct OverrideLayer {
    directory: PathBuf,
    entries: Vec<(ResourceId, PathBuf)>,
}

impl OverrideLayer {
    pub fn from_existing(directory: &Path) -> Self {
        let mut entries = Vec::new();

        let walker = WalkDir::new(directory)
            .sort_by(|a, b| {
                a.file_name()
                    .to_string_lossy()
                    .to_lowercase()
                    .cmp(&b.file_name().to_string_lossy().to_lowercase())
            })
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file());

        for file in walker {
            if let Some(id) = ResourceId::from_filename(&file.file_name().to_string_lossy()) {
                entries.push((id, file.path().to_path_buf()));
            }
        }

        Self {
            directory: directory.to_path_buf(),
            entries,
        }
    }

    /// The on-disk path backing `id`, if this layer declares it.
    pub fn source_path(&self, id: &ResourceId) -> Option<&Path> {
        self.entries
            .iter()
            .rev()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, path)| path.as_path())
    }
}

impl ResourceLayer for OverrideLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Override
    }

    fn location(&self) -> &Path {
        &self.directory
    }

    fn list(&self) -> Vec<ResourceId> {
        self.entries.iter().map(|(id, _)| id.clone()).collect()
    }

    fn read(&self, id: &ResourceId) -> Option<ByteBuffer> {
        std::fs::read(self.source_path(id)?).ok()
    }

    fn exists(&self, id: &ResourceId) -> bool {
        self.source_path(id).is_some()
    }
}
