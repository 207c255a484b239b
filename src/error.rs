// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The installation root does not exist or contains no usable layers.
    #[error("installation not usable: {path}")]
    InstallationNotFound { path: String },

    /// One layer could not be opened. The index degrades, it does not abort.
    #[error("layer unreadable: {location}: {reason}")]
    LayerUnreadable { location: String, reason: String },

    /// The identifier was not found in any layer.
    #[error("resource not found: {identifier}")]
    ResourceNotFound { identifier: String },

    /// The diff cache produced the same key for two payloads of different
    /// length. This is a hashing bug, never a recoverable condition.
    #[error("diff cache key collision for {key:#034x}")]
    CacheKeyCollision { key: u128 },

    /// A patch-script key was merged with a value whose shape is incompatible
    /// with the existing value. Only that key's merge is abandoned.
    #[error("patch script conflict in [{section}] at key {key}")]
    PatchScriptConflict { section: String, key: String },

    /// Pre-flight validation of the patch output layout failed.
    #[error("patch data validation failed: {reason}")]
    PatchDataInvalid { reason: String },

    /// Writing the patch script to disk failed.
    #[error("failed to write patch script: {path}: {reason}")]
    PatchWriteFailed { path: String, reason: String },
}
