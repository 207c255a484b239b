// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod override_dir;
pub use override_dir::OverrideLayer;

mod capsule;
pub use capsule::CapsuleLayer;

mod base;
pub use base::BaseLayer;

use std::path::Path;

use crate::ByteBuffer;
use crate::Error;
use crate::common::ResourceId;

/// Which precedence class a layer belongs to. Ordering between classes is
/// fixed: override outranks capsules, capsules outrank the base archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Override,
    Capsule,
    BaseArchive,
}

/// A single source of resources: an override directory, a capsule file, or
/// the base archive behind its index.
///
/// Layers are constructed once when an installation is opened and immutable
/// afterwards; every `read` opens its backing file for the duration of the
/// call only, so abandoning a diff stream early leaks no handles.
pub trait ResourceLayer: Send + Sync {
    fn kind(&self) -> LayerKind;

    /// Where this layer lives on disk, for diagnostics.
    fn location(&self) -> &Path;

    /// Every identifier this layer declares, in declaration order and with
    /// duplicates included. Callers that need "who wins" semantics resolve
    /// duplicates last-declared-first.
    fn list(&self) -> Vec<ResourceId>;

    /// Reads the bytes for `id`. When the layer declares `id` more than
    /// once, the last declaration wins.
    fn read(&self, id: &ResourceId) -> Option<ByteBuffer>;

    fn exists(&self, id: &ResourceId) -> bool {
        self.read(id).is_some()
    }

    /// Structured errors recorded while opening this layer. A degraded layer
    /// still serves whatever it could open.
    fn diagnostics(&self) -> &[Error] {
        &[]
    }
}
