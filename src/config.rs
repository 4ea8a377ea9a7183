use crate::cell::Cell;
use crate::translate::DEFAULT_FALLBACK_CONTENTS;
use std::path::{Path, PathBuf};

/// Region files kept open at once by default.
pub const DEFAULT_MAX_OPEN_REGIONS: usize = 100;
/// Spare bytes reserved after each slot for in-place growth.
pub const DEFAULT_SLOT_HEADROOM: u32 = 1024;
/// Node size of newly created linked files.
pub const DEFAULT_NODE_SIZE: i32 = 1024;

/// Which on-disk layout chunks are persisted in.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StorageBackend {
    /// Directory of 16x16 chunk region files, compacted on demand.
    RegionFiles,
    /// One file of fixed-size linked nodes with a free list.
    LinkedFile { node_size: i32 },
}

/// Terrain store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Folder holding the store files.
    pub directory: PathBuf,
    /// Appended to the store folder or file name.
    pub suffix: String,
    pub backend: StorageBackend,
    pub max_open_regions: usize,
    pub slot_headroom: u32,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        StoreConfig {
            directory: directory.as_ref().to_path_buf(),
            suffix: String::new(),
            backend: StorageBackend::RegionFiles,
            max_open_regions: DEFAULT_MAX_OPEN_REGIONS,
            slot_headroom: DEFAULT_SLOT_HEADROOM,
        }
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_owned();
        self
    }

    pub fn with_backend(mut self, backend: StorageBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_open_regions(mut self, max_open_regions: usize) -> Self {
        self.max_open_regions = max_open_regions.max(1);
        self
    }

    pub fn with_slot_headroom(mut self, slot_headroom: u32) -> Self {
        self.slot_headroom = slot_headroom;
        self
    }
}

/// Foreign world import settings.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Written for foreign blocks without translation.
    pub fallback: Cell,
    /// Import region files on the rayon pool instead of one after another.
    pub parallel: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            fallback: Cell::from_contents(DEFAULT_FALLBACK_CONTENTS),
            parallel: true,
        }
    }
}
