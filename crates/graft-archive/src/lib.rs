//! File format (.grf) for archived maps.
//!
//! Wraps a [`graft_core::MapArchive`] in a small binary envelope so a
//! stored map can be recognised, version-checked and verified before any
//! node is rebuilt.
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Magic: 0x47524600 ("GRF\0") │  4 bytes
//! │ Version: major.minor.patch   │  3 bytes
//! │ Flags                        │  1 byte
//! ├──────────────────────────────┤
//! │   node_count: u64            │
//! │   input_count: u64           │
//! │   output_count: u64          │
//! │   payload_length: u64        │
//! ├──────────────────────────────┤
//! │ JSON payload (MapArchive)    │
//! ├──────────────────────────────┤
//! │ Content Hash (SHA-256)       │  32 bytes
//! └──────────────────────────────┘
//! ```

mod format;

pub use format::{FileError, FileFlags, FileVersion, ModelFile, MAGIC};
