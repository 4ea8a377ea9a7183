//! Region file storage: 16x16 chunks per file with an in-file directory.
//!
//! ```text
//! offset 0      "RGN1"
//! offset 4      256 x (i32 offset, i32 size), little-endian, 0 offset = empty
//! offset 2052   slots: "CHK1" + payload + headroom
//! ```
//!
//! A slot is rewritten in place while the payload fits below the next
//! occupied slot (or the file end, which can grow). Otherwise the whole
//! region is rewritten tightly into a scratch file which replaces the
//! primary through `<name>.new`, so an interrupted compaction leaves either
//! the old or the new file intact.

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::position::{ChunkPosition, RegionPosition};
use crate::store::ChunkStorage;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Region file sentinel.
const REGION_MAGIC: [u8; 4] = *b"RGN1";
/// Chunk slot sentinel.
const CHUNK_MAGIC: [u8; 4] = *b"CHK1";
const CHUNK_MAGIC_LENGTH: u32 = 4;
/// Amount of chunks in region.
const REGION_CHUNKS: usize = 256;
/// Length of one directory entry in bytes.
const DIRECTORY_ENTRY_LENGTH: u64 = 8;
/// Region header length in bytes.
pub const REGION_HEADER_LENGTH: u32 = 4 + REGION_CHUNKS as u32 * DIRECTORY_ENTRY_LENGTH as u32;
/// Maximum chunk payload length in bytes.
pub const ENTRY_MAXIMUM_SIZE: u32 = 1 << 20;
/// Maximum region file length in bytes.
pub const REGION_MAXIMUM_LENGTH: u64 = 1 << 28;

/// Name of the legacy shared scratch file.
const SCRATCH_FILE_NAME: &str = "tmp";
const SCRATCH_EXTENSION: &str = "tmp";
const NEW_EXTENSION: &str = "new";

/// Directory entry of one chunk slot.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
struct DirectoryEntry {
    /// Offset of the slot sentinel, 0 when the slot is unused.
    offset: u32,
    /// Payload length without sentinel.
    size: u32,
}

impl DirectoryEntry {
    fn new(offset: u32, size: u32) -> Self {
        DirectoryEntry { offset, size }
    }

    fn is_empty(&self) -> bool {
        self.offset == 0
    }

    fn from_raw(offset: i32, size: i32) -> Result<Self, StorageError> {
        if size < 0 || size as u32 > ENTRY_MAXIMUM_SIZE {
            return Err(StorageError::EntrySizeOutOfBounds { size });
        }

        if offset < 0 || (offset > 0 && (offset as u32) < REGION_HEADER_LENGTH) {
            return Err(StorageError::EntryOffsetOutOfBounds { offset });
        }

        Ok(DirectoryEntry::new(offset as u32, size as u32))
    }
}

/// How a payload ended up on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Placement {
    /// New slot at the end of file.
    Appended,
    /// Existing slot overwritten within its headroom.
    Overwritten,
    /// Last slot of the file overwritten after growing the file.
    Grown,
    /// Region rewritten tightly with the new payload.
    Compacted,
}

/// Space reserved for a payload of `size` bytes, sentinel included.
fn slot_space(size: u32, slot_headroom: u32) -> u64 {
    size as u64 + slot_headroom as u64 + CHUNK_MAGIC_LENGTH as u64
}

fn check_region_length(length: u64) -> Result<(), StorageError> {
    if length > REGION_MAXIMUM_LENGTH {
        return Err(StorageError::RegionTooLarge { length });
    }

    Ok(())
}

/// Fails when an occupied slot runs into the next one.
fn check_overlaps(directory: &[DirectoryEntry]) -> Result<(), StorageError> {
    let mut occupied: Vec<_> = directory.iter().filter(|entry| !entry.is_empty()).collect();
    occupied.sort_by_key(|entry| entry.offset);

    for pair in occupied.windows(2) {
        let end = pair[0].offset as u64 + CHUNK_MAGIC_LENGTH as u64 + pair[0].size as u64;

        if end > pair[1].offset as u64 {
            return Err(StorageError::OverlappingEntries {
                offset: pair[0].offset,
                next_offset: pair[1].offset,
            });
        }
    }

    Ok(())
}

/// Offset of the closest occupied slot after `index`'s slot.
fn next_slot_offset(directory: &[DirectoryEntry], index: usize) -> Option<u32> {
    let offset = directory[index].offset;

    directory
        .iter()
        .filter(|entry| !entry.is_empty() && entry.offset > offset)
        .map(|entry| entry.offset)
        .min()
}

/// Single region file over any seekable source.
pub(crate) struct RegionFile<S> {
    position: RegionPosition,
    source: S,
    slot_headroom: u32,
}

impl<S> RegionFile<S> {
    pub(crate) fn new(position: RegionPosition, source: S, slot_headroom: u32) -> Self {
        RegionFile {
            position,
            source,
            slot_headroom,
        }
    }
}

impl<S: Read + Seek> RegionFile<S> {
    fn check_magic(&mut self) -> Result<(), StorageError> {
        let mut magic = [0u8; 4];
        self.source.seek(SeekFrom::Start(0))?;

        match self.source.read_exact(&mut magic) {
            Ok(()) if magic == REGION_MAGIC => Ok(()),
            Ok(()) => Err(StorageError::InvalidRegionMagic {
                region: self.position,
            }),
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                Err(StorageError::InvalidRegionMagic {
                    region: self.position,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    fn read_entry(&mut self, index: usize) -> Result<DirectoryEntry, StorageError> {
        self.source
            .seek(SeekFrom::Start(4 + index as u64 * DIRECTORY_ENTRY_LENGTH))?;

        let offset = self.source.read_i32::<LittleEndian>()?;
        let size = self.source.read_i32::<LittleEndian>()?;

        DirectoryEntry::from_raw(offset, size)
    }

    fn read_directory(&mut self) -> Result<[DirectoryEntry; REGION_CHUNKS], StorageError> {
        let mut raw = vec![0u8; REGION_CHUNKS * DIRECTORY_ENTRY_LENGTH as usize];

        self.source.seek(SeekFrom::Start(4))?;
        self.source.read_exact(&mut raw)?;

        let mut cursor = Cursor::new(raw);
        let mut directory = [DirectoryEntry::default(); REGION_CHUNKS];

        for entry in directory.iter_mut() {
            let offset = cursor.read_i32::<LittleEndian>()?;
            let size = cursor.read_i32::<LittleEndian>()?;

            *entry = DirectoryEntry::from_raw(offset, size)?;
        }

        check_overlaps(&directory)?;

        Ok(directory)
    }

    fn read_payload(&mut self, entry: DirectoryEntry) -> Result<Vec<u8>, StorageError> {
        let end = entry.offset as u64 + CHUNK_MAGIC_LENGTH as u64 + entry.size as u64;

        if end > self.source.len()? {
            return Err(StorageError::TruncatedPayload {
                offset: entry.offset,
                size: entry.size,
            });
        }

        let mut magic = [0u8; 4];
        self.source.seek(SeekFrom::Start(entry.offset as u64))?;
        self.source.read_exact(&mut magic)?;

        if magic != CHUNK_MAGIC {
            return Err(StorageError::InvalidChunkMagic {
                offset: entry.offset,
            });
        }

        let mut payload = vec![0u8; entry.size as usize];
        self.source.read_exact(&mut payload)?;

        Ok(payload)
    }

    /// Payload of the slot, `None` when unused.
    pub(crate) fn read_chunk(&mut self, index: usize) -> Result<Option<Vec<u8>>, StorageError> {
        let entry = self.read_entry(index)?;

        if entry.is_empty() {
            return Ok(None);
        }

        self.read_payload(entry).map(Some)
    }
}

impl<S: Read + Write + Seek> RegionFile<S> {
    /// Writes the sentinel and an all-empty directory.
    fn write_header(&mut self) -> Result<(), StorageError> {
        self.source.seek(SeekFrom::Start(0))?;
        self.source.write_all(&REGION_MAGIC)?;
        self.source
            .write_all(&vec![0u8; REGION_CHUNKS * DIRECTORY_ENTRY_LENGTH as usize])?;

        Ok(())
    }

    fn write_entry(&mut self, index: usize, entry: DirectoryEntry) -> Result<(), StorageError> {
        self.source
            .seek(SeekFrom::Start(4 + index as u64 * DIRECTORY_ENTRY_LENGTH))?;
        self.source.write_i32::<LittleEndian>(entry.offset as i32)?;
        self.source.write_i32::<LittleEndian>(entry.size as i32)?;

        Ok(())
    }

    fn write_slot(&mut self, offset: u32, payload: &[u8]) -> Result<(), StorageError> {
        self.source.seek(SeekFrom::Start(offset as u64))?;
        self.source.write_all(&CHUNK_MAGIC)?;
        self.source.write_all(payload)?;

        Ok(())
    }

    /// Stores the payload without moving other slots.
    ///
    /// Returns `None` when the slot cannot hold the payload and the region
    /// must be compacted. Nothing is written in that case.
    pub(crate) fn write_chunk(
        &mut self,
        index: usize,
        payload: &[u8],
    ) -> Result<Option<Placement>, StorageError> {
        let directory = self.read_directory()?;
        let entry = directory[index];
        let size = payload.len() as u32;

        if entry.is_empty() {
            let offset = self.source.len()?;
            let end = offset + slot_space(size, self.slot_headroom);
            check_region_length(end)?;

            self.source.extend_len(end)?;
            self.write_slot(offset as u32, payload)?;
            self.write_entry(index, DirectoryEntry::new(offset as u32, size))?;

            return Ok(Some(Placement::Appended));
        }

        let placement = match next_slot_offset(&directory, index) {
            Some(next_offset) => {
                let headroom = next_offset - entry.offset - CHUNK_MAGIC_LENGTH;

                if size > headroom {
                    return Ok(None);
                }

                Placement::Overwritten
            }
            None => {
                let end = entry.offset as u64 + CHUNK_MAGIC_LENGTH as u64 + size as u64;

                if end > self.source.len()? {
                    let grown_end = entry.offset as u64 + slot_space(size, self.slot_headroom);
                    check_region_length(grown_end)?;

                    self.source.extend_len(grown_end)?;
                    Placement::Grown
                } else {
                    Placement::Overwritten
                }
            }
        };

        self.write_slot(entry.offset, payload)?;
        self.write_entry(index, DirectoryEntry::new(entry.offset, size))?;

        Ok(Some(placement))
    }

    /// Writes a tight copy of this region into `destination`, with `payload`
    /// replacing the slot at `index`.
    pub(crate) fn write_compacted<W: Read + Write + Seek>(
        &mut self,
        index: usize,
        payload: &[u8],
        destination: W,
    ) -> Result<(), StorageError> {
        let directory = self.read_directory()?;
        let mut compacted = [DirectoryEntry::default(); REGION_CHUNKS];
        let mut end = REGION_HEADER_LENGTH as u64;

        for (slot, entry) in directory.iter().enumerate() {
            let size = if slot == index {
                payload.len() as u32
            } else if entry.is_empty() {
                continue;
            } else {
                entry.size
            };

            compacted[slot] = DirectoryEntry::new(end as u32, size);
            end += slot_space(size, self.slot_headroom);
        }

        check_region_length(end)?;

        let mut target = RegionFile::new(self.position, destination, self.slot_headroom);
        target.write_header()?;
        target.source.extend_len(end)?;

        for (slot, entry) in compacted.iter().enumerate() {
            if entry.is_empty() {
                continue;
            }

            if slot == index {
                target.write_slot(entry.offset, payload)?;
            } else {
                let data = self.read_payload(directory[slot])?;
                target.write_slot(entry.offset, &data)?;
            }

            target.write_entry(slot, *entry)?;
        }

        target.source.flush()?;

        Ok(())
    }
}

/// Open handle of one region, `None` while closed.
#[derive(Default)]
struct RegionSlot {
    file: Option<File>,
}

/// Chunk storage keeping one file per 16x16 chunk region.
///
/// Saves and loads against the same region are serialized, different
/// regions proceed concurrently.
pub struct RegionFileStorage {
    directory: PathBuf,
    max_open_regions: usize,
    slot_headroom: u32,
    regions: Mutex<HashMap<RegionPosition, Arc<Mutex<RegionSlot>>>>,
    /// Regions with an open handle, oldest first.
    opened: Mutex<VecDeque<RegionPosition>>,
}

impl RegionFileStorage {
    /// Opens the `Regions<suffix>` folder, creating it when missing.
    ///
    /// Leftovers of interrupted compactions are reconciled: scratch files
    /// are deleted, a `.new` file replaces a missing primary and is
    /// discarded otherwise.
    pub fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        let directory = config
            .directory
            .join(format!("Regions{}", config.suffix));

        fs::create_dir_all(&directory)?;
        reconcile_leftovers(&directory)?;

        Ok(RegionFileStorage {
            directory,
            max_open_regions: config.max_open_regions.max(1),
            slot_headroom: config.slot_headroom,
            regions: Mutex::new(HashMap::new()),
            opened: Mutex::new(VecDeque::new()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn region_path(&self, region: RegionPosition) -> PathBuf {
        self.directory.join(region_file_name(region))
    }

    /// Amount of region files currently held open.
    pub fn open_regions(&self) -> usize {
        self.opened.lock().len()
    }

    fn slot(&self, region: RegionPosition) -> Arc<Mutex<RegionSlot>> {
        self.regions
            .lock()
            .entry(region)
            .or_insert_with(Default::default)
            .clone()
    }

    /// Makes sure the slot holds a handle, returns whether it does.
    fn ensure_open(
        &self,
        region: RegionPosition,
        slot: &mut RegionSlot,
        create: bool,
    ) -> Result<bool, StorageError> {
        if slot.file.is_some() {
            return Ok(true);
        }

        let path = self.region_path(region);

        let file = if path.exists() {
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            RegionFile::new(region, &mut file, self.slot_headroom).check_magic()?;
            file
        } else if create {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            RegionFile::new(region, &mut file, self.slot_headroom).write_header()?;

            debug!(target: "terrain-store", "Created region file {}", path.display());
            file
        } else {
            return Ok(false);
        };

        slot.file = Some(file);
        self.track_opened(region);

        Ok(true)
    }

    /// Records a newly opened handle and closes the oldest idle ones over the limit.
    fn track_opened(&self, region: RegionPosition) {
        let mut opened = self.opened.lock();
        opened.push_back(region);

        let mut attempts = opened.len();

        while opened.len() > self.max_open_regions && attempts > 0 {
            attempts -= 1;

            let oldest = match opened.pop_front() {
                Some(oldest) => oldest,
                None => break,
            };

            if oldest == region {
                opened.push_back(oldest);
                continue;
            }

            let mut regions = self.regions.lock();

            let closed = match regions.get(&oldest) {
                Some(slot) => match slot.try_lock() {
                    Some(mut guard) => {
                        guard.file = None;
                        true
                    }
                    None => false,
                },
                None => true,
            };

            if !closed {
                // Busy in another save or load, retry later.
                opened.push_back(oldest);
                continue;
            }

            // Nobody else can reach the slot while `regions` is locked.
            if regions
                .get(&oldest)
                .map_or(false, |slot| Arc::strong_count(slot) == 1)
            {
                regions.remove(&oldest);
            }

            debug!(
                target: "terrain-store",
                "Closed region x: {}, z: {} file handle", oldest.x, oldest.z
            );
        }
    }

    /// Drops the slot of a region without a handle once no caller holds it.
    fn release_idle(&self, region: RegionPosition, slot: Arc<Mutex<RegionSlot>>) {
        let mut regions = self.regions.lock();

        let idle = Arc::strong_count(&slot) == 2
            && slot.try_lock().map_or(false, |guard| guard.file.is_none());

        if idle {
            regions.remove(&region);
        }
    }

    /// Amount of regions with a slot, open or not.
    pub(crate) fn cached_regions(&self) -> usize {
        self.regions.lock().len()
    }

    fn forget_opened(&self, region: RegionPosition) {
        self.opened.lock().retain(|opened| *opened != region);
    }

    pub(crate) fn store(
        &self,
        position: ChunkPosition,
        payload: &[u8],
    ) -> Result<Placement, StorageError> {
        if payload.len() > ENTRY_MAXIMUM_SIZE as usize {
            return Err(StorageError::PayloadTooLarge {
                length: payload.len(),
            });
        }

        let region = position.region();
        let index = position.region_chunk().directory_index();

        let slot = self.slot(region);
        let stored = self.store_locked(region, index, payload, &mut slot.lock());
        self.release_idle(region, slot);

        let placement = stored?;

        debug!(
            target: "terrain-store",
            "Chunk x: {}, z: {} with length {} stored to region x: {}, z: {} ({:?})",
            position.x,
            position.z,
            payload.len(),
            region.x,
            region.z,
            placement
        );

        Ok(placement)
    }

    fn store_locked(
        &self,
        region: RegionPosition,
        index: usize,
        payload: &[u8],
        slot: &mut RegionSlot,
    ) -> Result<Placement, StorageError> {
        self.ensure_open(region, slot, true)?;

        let written = match slot.file.as_mut() {
            Some(file) => {
                RegionFile::new(region, file, self.slot_headroom).write_chunk(index, payload)?
            }
            None => None,
        };

        match written {
            Some(placement) => Ok(placement),
            None => {
                self.compact(region, slot, index, payload)?;
                Ok(Placement::Compacted)
            }
        }
    }

    fn compact(
        &self,
        region: RegionPosition,
        slot: &mut RegionSlot,
        index: usize,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        let path = self.region_path(region);
        let scratch_path = sibling_path(&path, SCRATCH_EXTENSION);
        let new_path = sibling_path(&path, NEW_EXTENSION);

        let written = match slot.file.as_mut() {
            Some(file) => {
                write_scratch(region, file, &scratch_path, index, payload, self.slot_headroom)
            }
            None => return Ok(()),
        };

        if let Err(error) = written {
            let _ = fs::remove_file(&scratch_path);
            return Err(error);
        }

        // Handle must be released before the primary is replaced.
        slot.file = None;
        self.forget_opened(region);

        fs::rename(&scratch_path, &new_path)?;
        fs::rename(&new_path, &path)?;

        debug!(
            target: "terrain-store",
            "Compacted region x: {}, z: {} file", region.x, region.z
        );

        Ok(())
    }
}

fn write_scratch(
    region: RegionPosition,
    file: &mut File,
    scratch_path: &Path,
    index: usize,
    payload: &[u8],
    slot_headroom: u32,
) -> Result<(), StorageError> {
    let mut scratch = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(scratch_path)?;

    RegionFile::new(region, file, slot_headroom).write_compacted(index, payload, &mut scratch)?;
    scratch.sync_all()?;

    Ok(())
}

impl RegionFileStorage {
    fn load_locked(
        &self,
        region: RegionPosition,
        index: usize,
        slot: &mut RegionSlot,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        if !self.ensure_open(region, slot, false)? {
            return Ok(None);
        }

        match slot.file.as_mut() {
            Some(file) => RegionFile::new(region, file, self.slot_headroom).read_chunk(index),
            None => Ok(None),
        }
    }
}

impl ChunkStorage for RegionFileStorage {
    fn load(&self, position: ChunkPosition) -> Result<Option<Vec<u8>>, StorageError> {
        let region = position.region();
        let index = position.region_chunk().directory_index();

        let slot = self.slot(region);
        let loaded = self.load_locked(region, index, &mut slot.lock());
        self.release_idle(region, slot);

        loaded
    }

    fn save(&self, position: ChunkPosition, payload: &[u8]) -> Result<(), StorageError> {
        self.store(position, payload).map(|_| ())
    }
}

pub fn region_file_name(region: RegionPosition) -> String {
    format!("Region {},{}.dat", region.x, region.z)
}

fn sibling_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(extension);

    path.with_file_name(name)
}

/// Deletes scratch files and promotes or discards `.new` files.
fn reconcile_leftovers(directory: &Path) -> Result<(), StorageError> {
    let legacy_scratch = directory.join(SCRATCH_FILE_NAME);

    if legacy_scratch.exists() {
        fs::remove_file(&legacy_scratch)?;
    }

    for entry in fs::read_dir(directory)? {
        let path = entry?.path();

        if !path.is_file() {
            continue;
        }

        match path.extension().and_then(|extension| extension.to_str()) {
            Some(SCRATCH_EXTENSION) => {
                debug!(target: "terrain-store", "Removing scratch file {}", path.display());
                fs::remove_file(&path)?;
            }
            Some(NEW_EXTENSION) => {
                let primary = path.with_extension("");

                if primary.exists() {
                    debug!(target: "terrain-store", "Discarding stale {}", path.display());
                    fs::remove_file(&path)?;
                } else {
                    debug!(target: "terrain-store", "Promoting {}", path.display());
                    fs::rename(&path, &primary)?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Trait adds additional helper methods for `Seek`.
pub(crate) trait SeekExt {
    fn len(&mut self) -> Result<u64, io::Error>;
}

impl<S: Seek> SeekExt for S {
    fn len(&mut self) -> Result<u64, io::Error> {
        let old_pos = self.seek(SeekFrom::Current(0))?;
        let len = self.seek(SeekFrom::End(0))?;

        if old_pos != len {
            self.seek(SeekFrom::Start(old_pos))?;
        }

        Ok(len)
    }
}

/// Trait adds additional helper methods for `Seek+Write`.
pub(crate) trait SeekWriteExt {
    fn extend_len(&mut self, new_len: u64) -> Result<(), io::Error>;
}

impl<S: Seek + Write> SeekWriteExt for S {
    fn extend_len(&mut self, new_len: u64) -> Result<(), io::Error> {
        let old_pos = self.seek(SeekFrom::Current(0))?;
        let len = self.seek(SeekFrom::End(0))?;

        if new_len > len {
            let padding_len = new_len - len;
            self.write_all(&vec![0; padding_len as usize])?;
        }

        if old_pos != len {
            self.seek(SeekFrom::Start(old_pos))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::error::{ErrorKind, StorageError};
    use crate::position::{ChunkPosition, RegionPosition};
    use crate::region::{
        region_file_name, sibling_path, Placement, RegionFile, RegionFileStorage, SeekExt,
        SeekWriteExt, ENTRY_MAXIMUM_SIZE, REGION_HEADER_LENGTH,
    };
    use crate::store::ChunkStorage;
    use byteorder::{LittleEndian, WriteBytesExt};
    use rayon::prelude::*;
    use std::fs;
    use std::io::{Cursor, Seek, SeekFrom};

    fn payload(length: usize, seed: u8) -> Vec<u8> {
        (0..length).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect()
    }

    fn memory_region() -> RegionFile<Cursor<Vec<u8>>> {
        let mut region = RegionFile::new(RegionPosition::new(0, 0), Cursor::new(Vec::new()), 1024);
        region.write_header().unwrap();
        region
    }

    #[test]
    fn test_header_layout() {
        let mut region = memory_region();

        assert_eq!(region.source.len().unwrap(), REGION_HEADER_LENGTH as u64);
        assert_eq!(&region.source.get_ref()[..4], b"RGN1");
        assert_eq!(region.read_chunk(0).unwrap(), None);
    }

    #[test]
    fn test_append_layout() {
        let mut region = memory_region();
        let data = payload(100, 1);

        assert_eq!(region.write_chunk(17, &data).unwrap(), Some(Placement::Appended));

        let bytes = region.source.get_ref();
        let slot = REGION_HEADER_LENGTH as usize;

        assert_eq!(bytes.len(), slot + 100 + 1024 + 4);
        assert_eq!(&bytes[slot..slot + 4], b"CHK1");
        assert_eq!(&bytes[slot + 4..slot + 104], &data[..]);
        assert_eq!(region.read_chunk(17).unwrap(), Some(data));
    }

    #[test]
    fn test_larger_smaller_larger() {
        let mut region = memory_region();

        region.write_chunk(0, &payload(100, 0)).unwrap();
        region.write_chunk(1, &payload(100, 1)).unwrap();

        let grown = payload(1000, 2);
        assert_eq!(region.write_chunk(0, &grown).unwrap(), Some(Placement::Overwritten));
        assert_eq!(region.read_chunk(0).unwrap(), Some(grown));

        let shrunk = payload(50, 3);
        assert_eq!(region.write_chunk(0, &shrunk).unwrap(), Some(Placement::Overwritten));
        assert_eq!(region.read_chunk(0).unwrap(), Some(shrunk));

        // Headroom below the next slot is 1124 bytes.
        let large = payload(3000, 4);
        assert_eq!(region.write_chunk(0, &large).unwrap(), None);

        let mut compacted = Cursor::new(Vec::new());
        region.write_compacted(0, &large, &mut compacted).unwrap();

        let mut compacted = RegionFile::new(RegionPosition::new(0, 0), compacted, 1024);
        assert_eq!(compacted.read_chunk(0).unwrap(), Some(large));
        assert_eq!(compacted.read_chunk(1).unwrap(), Some(payload(100, 1)));
        assert_eq!(
            compacted.source.len().unwrap(),
            REGION_HEADER_LENGTH as u64 + (3000 + 1028) + (100 + 1028)
        );

        let regrown = payload(3500, 5);
        assert_eq!(compacted.write_chunk(0, &regrown).unwrap(), Some(Placement::Overwritten));
        assert_eq!(compacted.read_chunk(0).unwrap(), Some(regrown));
        assert_eq!(compacted.read_chunk(1).unwrap(), Some(payload(100, 1)));
    }

    #[test]
    fn test_last_slot_grows_in_place() {
        let mut region = memory_region();

        region.write_chunk(3, &payload(10, 0)).unwrap();
        let length = region.source.len().unwrap();

        let large = payload(5000, 1);
        assert_eq!(region.write_chunk(3, &large).unwrap(), Some(Placement::Grown));
        assert_eq!(
            region.source.len().unwrap(),
            REGION_HEADER_LENGTH as u64 + 5000 + 1028
        );
        assert!(region.source.len().unwrap() > length);
        assert_eq!(region.read_chunk(3).unwrap(), Some(large));
    }

    #[test]
    fn test_bad_region_magic() {
        let mut region = RegionFile::new(
            RegionPosition::new(2, -1),
            Cursor::new(b"RGN2 and some more bytes".to_vec()),
            1024,
        );

        match region.check_magic() {
            Err(StorageError::InvalidRegionMagic { region }) => {
                assert_eq!(region, RegionPosition::new(2, -1))
            }
            other => panic!("Expected `InvalidRegionMagic` but got `{:?}`", other),
        }
    }

    #[test]
    fn test_bad_chunk_magic() {
        let mut region = memory_region();
        region.write_chunk(0, &payload(10, 0)).unwrap();
        region.source.get_mut()[REGION_HEADER_LENGTH as usize] = b'X';

        let error = region.read_chunk(0).err().unwrap();

        assert_eq!(error.kind(), ErrorKind::Format);
        match error {
            StorageError::InvalidChunkMagic { offset } => assert_eq!(offset, REGION_HEADER_LENGTH),
            other => panic!("Expected `InvalidChunkMagic` but got `{:?}`", other),
        }
    }

    #[test]
    fn test_entry_size_out_of_bounds() {
        for size in &[-1, ENTRY_MAXIMUM_SIZE as i32 + 1] {
            let mut region = memory_region();
            region.source.seek(SeekFrom::Start(4)).unwrap();
            region.source.write_i32::<LittleEndian>(2052).unwrap();
            region.source.write_i32::<LittleEndian>(*size).unwrap();

            match region.read_chunk(0) {
                Err(StorageError::EntrySizeOutOfBounds { size: actual }) => {
                    assert_eq!(actual, *size)
                }
                other => panic!("Expected `EntrySizeOutOfBounds` but got `{:?}`", other),
            }
        }
    }

    #[test]
    fn test_overlapping_entries_rejected() {
        let mut region = memory_region();
        region.write_chunk(0, &payload(100, 0)).unwrap();
        region.write_chunk(1, &payload(100, 1)).unwrap();

        // Slot 1 now starts inside slot 0.
        region.source.seek(SeekFrom::Start(12)).unwrap();
        region.source.write_i32::<LittleEndian>(2054).unwrap();
        let length = region.source.len().unwrap();

        let error = region.write_chunk(0, &payload(200, 2)).err().unwrap();

        assert_eq!(error.kind(), ErrorKind::Format);
        match error {
            StorageError::OverlappingEntries {
                offset,
                next_offset,
            } => assert_eq!((offset, next_offset), (2052, 2054)),
            other => panic!("Expected `OverlappingEntries` but got `{:?}`", other),
        }

        assert_eq!(region.source.len().unwrap(), length);
        assert_eq!(region.read_chunk(0).unwrap(), Some(payload(100, 0)));
    }

    #[test]
    fn test_truncated_payload() {
        let mut region = memory_region();
        region.source.seek(SeekFrom::Start(4)).unwrap();
        region.source.write_i32::<LittleEndian>(2052).unwrap();
        region.source.write_i32::<LittleEndian>(64).unwrap();

        match region.read_chunk(0) {
            Err(StorageError::TruncatedPayload { offset, size }) => {
                assert_eq!((offset, size), (2052, 64))
            }
            other => panic!("Expected `TruncatedPayload` but got `{:?}`", other),
        }
    }

    #[test]
    fn test_storage_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let storage = RegionFileStorage::open(&StoreConfig::new(root.path())).unwrap();
        let position = ChunkPosition::new(-17, 40);

        assert_eq!(storage.load(position).unwrap(), None);
        assert!(!storage.region_path(position.region()).exists());

        storage.save(position, &payload(300, 9)).unwrap();

        assert_eq!(storage.load(position).unwrap(), Some(payload(300, 9)));
        assert_eq!(storage.load(ChunkPosition::new(-18, 40)).unwrap(), None);
        assert!(root.path().join("Regions").join("Region -2,2.dat").exists());
    }

    #[test]
    fn test_storage_compaction_replaces_primary() {
        let root = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(root.path()).with_suffix("Test");
        let storage = RegionFileStorage::open(&config).unwrap();

        let first = ChunkPosition::new(0, 0);
        let second = ChunkPosition::new(1, 0);

        assert_eq!(storage.store(first, &payload(100, 0)).unwrap(), Placement::Appended);
        assert_eq!(storage.store(second, &payload(100, 1)).unwrap(), Placement::Appended);
        assert_eq!(storage.store(first, &payload(4000, 2)).unwrap(), Placement::Compacted);
        assert_eq!(storage.store(first, &payload(4100, 3)).unwrap(), Placement::Overwritten);

        assert_eq!(storage.load(first).unwrap(), Some(payload(4100, 3)));
        assert_eq!(storage.load(second).unwrap(), Some(payload(100, 1)));

        let path = storage.region_path(first.region());
        assert!(!sibling_path(&path, "new").exists());
        assert!(!sibling_path(&path, "tmp").exists());
        assert!(path.starts_with(root.path().join("RegionsTest")));
    }

    #[test]
    fn test_payload_too_large() {
        let root = tempfile::tempdir().unwrap();
        let storage = RegionFileStorage::open(&StoreConfig::new(root.path())).unwrap();
        let payload = vec![0u8; ENTRY_MAXIMUM_SIZE as usize + 1];

        let error = storage.save(ChunkPosition::new(0, 0), &payload).err().unwrap();

        assert_eq!(error.kind(), ErrorKind::InvariantViolation);
    }

    #[test]
    fn test_not_a_region_file() {
        let root = tempfile::tempdir().unwrap();
        let storage = RegionFileStorage::open(&StoreConfig::new(root.path())).unwrap();
        let position = ChunkPosition::new(0, 0);

        fs::write(storage.region_path(position.region()), b"not a region").unwrap();

        assert_eq!(storage.load(position).err().unwrap().kind(), ErrorKind::Format);
    }

    #[test]
    fn test_new_file_promoted_when_primary_missing() {
        let root = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(root.path());
        let positions: Vec<_> = (0..5).map(|i| ChunkPosition::new(i * 3, i)).collect();

        let primary = {
            let storage = RegionFileStorage::open(&config).unwrap();
            for (i, position) in positions.iter().enumerate() {
                storage.save(*position, &payload(200 + i, i as u8)).unwrap();
            }
            storage.region_path(RegionPosition::new(0, 0))
        };

        // Crash between the two renames of a compaction.
        fs::rename(&primary, sibling_path(&primary, "new")).unwrap();
        fs::write(primary.with_file_name("tmp"), b"scratch").unwrap();

        let storage = RegionFileStorage::open(&config).unwrap();

        assert!(primary.exists());
        assert!(!sibling_path(&primary, "new").exists());
        assert!(!primary.with_file_name("tmp").exists());

        for (i, position) in positions.iter().enumerate() {
            assert_eq!(storage.load(*position).unwrap(), Some(payload(200 + i, i as u8)));
        }
    }

    #[test]
    fn test_stale_new_file_discarded() {
        let root = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(root.path());
        let position = ChunkPosition::new(0, 0);

        let primary = {
            let storage = RegionFileStorage::open(&config).unwrap();
            storage.save(position, &payload(64, 1)).unwrap();
            storage.region_path(position.region())
        };

        fs::write(sibling_path(&primary, "new"), b"half written").unwrap();
        fs::write(sibling_path(&primary, "tmp"), b"half written").unwrap();

        let storage = RegionFileStorage::open(&config).unwrap();

        assert!(!sibling_path(&primary, "new").exists());
        assert!(!sibling_path(&primary, "tmp").exists());
        assert_eq!(storage.load(position).unwrap(), Some(payload(64, 1)));
    }

    #[test]
    fn test_open_handles_are_bounded() {
        let root = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(root.path()).with_max_open_regions(2);
        let storage = RegionFileStorage::open(&config).unwrap();

        for region in 0..6 {
            let position = ChunkPosition::new(region * 16, 0);
            storage.save(position, &payload(32, region as u8)).unwrap();
            assert!(storage.open_regions() <= 2);
        }

        for region in 0..6 {
            let position = ChunkPosition::new(region * 16, 0);
            assert_eq!(storage.load(position).unwrap(), Some(payload(32, region as u8)));
            assert!(storage.open_regions() <= 2);
        }

        for region in 0..6 {
            let missing = ChunkPosition::new(region * 16, 160);
            assert_eq!(storage.load(missing).unwrap(), None);
        }

        assert!(storage.cached_regions() <= 2);
    }

    #[test]
    fn test_parallel_saves_to_distinct_regions() {
        let root = tempfile::tempdir().unwrap();
        let storage = RegionFileStorage::open(&StoreConfig::new(root.path())).unwrap();

        (0..100i32).into_par_iter().for_each(|region| {
            for local in 0..4 {
                let position = ChunkPosition::new(region * 16 + local, -region * 16);
                let data = payload(100 + local as usize * 700, region as u8);
                storage.save(position, &data).unwrap();
            }
        });

        for region in 0..100i32 {
            for local in 0..4 {
                let position = ChunkPosition::new(region * 16 + local, -region * 16);
                let data = payload(100 + local as usize * 700, region as u8);
                assert_eq!(storage.load(position).unwrap(), Some(data));
            }
        }
    }

    #[test]
    fn test_parallel_saves_to_same_region() {
        let root = tempfile::tempdir().unwrap();
        let storage = RegionFileStorage::open(&StoreConfig::new(root.path())).unwrap();

        (0..64i32).into_par_iter().for_each(|local| {
            let position = ChunkPosition::new(local % 16, local / 16);
            storage.save(position, &payload(10, 0)).unwrap();
            storage.save(position, &payload(2000, local as u8)).unwrap();
        });

        for local in 0..64i32 {
            let position = ChunkPosition::new(local % 16, local / 16);
            assert_eq!(storage.load(position).unwrap(), Some(payload(2000, local as u8)));
        }
    }

    #[test]
    fn test_region_file_name() {
        assert_eq!(region_file_name(RegionPosition::new(-1, 3)), "Region -1,3.dat");
    }

    #[test]
    fn test_len() {
        let mut cursor = Cursor::new(vec![1, 2, 3, 4, 5]);
        let len = cursor.len().unwrap();

        assert_eq!(len, 5);
    }

    #[test]
    fn test_extend_len() {
        let mut cursor = Cursor::new(vec![1, 2, 3, 4, 5]);
        cursor.extend_len(10).unwrap();
        let len = cursor.len().unwrap();

        assert_eq!(len, 10);
    }
}
