// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::bif::{BifFile, Decompressor};
use crate::common::ResourceId;
use crate::key::KeyFile;
use crate::{ByteBuffer, Error};

use super::{LayerKind, ResourceLayer};

/// The lowest-precedence layer: the KEY index plus its BIF/BZF bulk
/// archives.
///
/// A corrupt or missing bulk archive degrades only the entries stored in it;
/// the failure is kept as a structured diagnostic on the layer. Only an
/// unreadable KEY file fails construction outright.
pub struct BaseLayer {
    key_path: PathBuf,
    archives: Vec<Option<(PathBuf, BifFile)>>,
    entries: Vec<(ResourceId, usize, usize)>,
    diagnostics: Vec<Error>,
    decompressor: Option<Box<Decompressor>>,
}

impl BaseLayer {
    /// Opens the base archive from its KEY file. Archive paths in the index
    /// are resolved relative to `root`.
    pub fn from_existing(key_path: &Path, root: &Path) -> crate::Result<Self> {
        debug!(path = %key_path.display(), "Opening base archive index");

        let unreadable = |location: &Path, reason: String| Error::LayerUnreadable {
            location: location.display().to_string(),
            reason,
        };

        let key_buffer =
            std::fs::read(key_path).map_err(|e| unreadable(key_path, e.to_string()))?;
        let key = KeyFile::from_existing(&key_buffer)
            .ok_or_else(|| unreadable(key_path, "invalid KEY tables".to_string()))?;

        let mut archives = Vec::with_capacity(key.archive_filenames.len());
        let mut diagnostics = Vec::new();

        for filename in &key.archive_filenames {
            let archive_path = root.join(filename);
            let opened = std::fs::read(&archive_path)
                .map_err(|e| unreadable(&archive_path, e.to_string()))
                .and_then(|buffer| {
                    BifFile::from_existing(&buffer)
                        .ok_or_else(|| unreadable(&archive_path, "invalid archive tables".to_string()))
                });

            match opened {
                Ok(bif) => archives.push(Some((archive_path, bif))),
                Err(error) => {
                    warn!(archive = filename.as_str(), "Skipping unreadable bulk archive");
                    diagnostics.push(error);
                    archives.push(None);
                }
            }
        }

        let mut entries = Vec::with_capacity(key.entries().len());
        for key_entry in key.entries() {
            let archive_index = key_entry.archive_index as usize;
            let resource_index = key_entry.resource_index as usize;

            let Some(Some((_, bif))) = archives.get(archive_index) else {
                continue; // archive was degraded above
            };
            let Some(bif_entry) = bif.entries().get(resource_index) else {
                warn!(resref = %key_entry.id, "Index points past the archive's table");
                continue;
            };

            // When the index and the archive disagree about the type, the
            // archive's own metadata is trusted.
            let mut id = key_entry.id.clone();
            if bif_entry.restype != id.restype {
                warn!(
                    resref = %id,
                    index_code = id.restype.code(),
                    archive_code = bif_entry.restype.code(),
                    "Resource type mismatch between index and archive"
                );
                id = ResourceId::new(id.resref(), bif_entry.restype);
            }

            entries.push((id, archive_index, resource_index));
        }

        Ok(Self {
            key_path: key_path.to_path_buf(),
            archives,
            entries,
            diagnostics,
            decompressor: None,
        })
    }

    /// Supplies the byte transform used to unpack BZF payloads.
    pub fn with_decompressor(
        mut self,
        decompressor: impl Fn(&[u8], usize) -> Option<ByteBuffer> + Send + Sync + 'static,
    ) -> Self {
        self.decompressor = Some(Box::new(decompressor));
        self
    }
}

impl ResourceLayer for BaseLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::BaseArchive
    }

    fn location(&self) -> &Path {
        &self.key_path
    }

    fn list(&self) -> Vec<ResourceId> {
        self.entries.iter().map(|(id, _, _)| id.clone()).collect()
    }

    fn read(&self, id: &ResourceId) -> Option<ByteBuffer> {
        // Last declaration in the index wins.
        let (_, archive_index, resource_index) =
            self.entries.iter().rev().find(|(entry_id, _, _)| entry_id == id)?;

        let (archive_path, bif) = self.archives.get(*archive_index)?.as_ref()?;
        let buffer = std::fs::read(archive_path).ok()?;

        bif.read_entry(&buffer, *resource_index, self.decompressor.as_deref())
    }

    fn exists(&self, id: &ResourceId) -> bool {
        self.entries.iter().any(|(entry_id, _, _)| entry_id == id)
    }

    fn diagnostics(&self) -> &[Error] {
        &self.diagnostics
    }
}
