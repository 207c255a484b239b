// SPDX-FileCopyrightText: 2025 Telos Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Common structures used by other modules, such as resource identifiers and types.
pub mod common;

/// Reading ERF/MOD capsule archives.
pub mod erf;

/// Reading RIM capsule archives.
pub mod rim;

/// Reading the chitin KEY index file.
pub mod key;

/// Reading BIF and BZF bulk archives.
pub mod bif;

/// Layered resource sources: override directories, capsules, and the base archive.
pub mod resource;

/// Opening a game installation and discovering its layers.
pub mod installation;

/// The precedence-resolved resource index.
pub mod resindex;

/// Comparing resources, directories, capsules, and whole installations.
pub mod diff;

/// Generating and writing patch scripts.
pub mod patch;

mod error;
pub use error::{Error, Result};

/// An in-memory copy of a resource's bytes.
pub type ByteBuffer = Vec<u8>;
