//! Read-only access to foreign Anvil region files (`r.<x>.<z>.mca`).

use crate::error::{ChunkReadError, ImportError};
use crate::position::ChunkPosition;
use byteorder::{BigEndian, ReadBytesExt};
use nbt::decode::{read_gzip_compound_tag, read_zlib_compound_tag};
use nbt::CompoundTag;
use std::fs::read_dir;
use std::io;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Anvil region side length in chunks.
pub const ANVIL_REGION_SIDE: u8 = 32;
/// Amount of chunks in region.
const REGION_CHUNKS: usize = 1024;
/// Region header length in bytes.
const REGION_HEADER_BYTES_LENGTH: u64 = 8 * REGION_CHUNKS as u64;
/// Region sector length in bytes.
const REGION_SECTOR_BYTES_LENGTH: u32 = 4096;
/// Maximum chunk length in bytes.
const CHUNK_MAXIMUM_BYTES_LENGTH: u32 = REGION_SECTOR_BYTES_LENGTH * 256;

/// Gzip compression type value.
const GZIP_COMPRESSION_TYPE: u8 = 1;
/// Zlib compression type value.
const ZLIB_COMPRESSION_TYPE: u8 = 2;

/// Position of a 32x32 chunk Anvil region.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
pub struct AnvilRegionPosition {
    pub x: i32,
    pub z: i32,
}

impl AnvilRegionPosition {
    pub fn new(x: i32, z: i32) -> AnvilRegionPosition {
        AnvilRegionPosition { x, z }
    }

    /// Parses the position out of a `r.<x>.<z>.mca` path.
    pub fn from_path(path: &Path) -> Result<AnvilRegionPosition, ImportError> {
        // Lossy is fine, non UTF-8 names fail the format check anyway.
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        let parts: Vec<_> = file_name.split('.').collect();

        match parse_coords(&parts).map(|(x, z)| AnvilRegionPosition::new(x, z)) {
            Some(position) if position.is_addressable() => Ok(position),
            _ => Err(ImportError::InvalidRegionFileName {
                file_name: file_name.into_owned(),
            }),
        }
    }

    pub fn file_name(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Chunk-space position of a chunk addressed relative to this region,
    /// `None` when it does not fit into `i32`.
    pub fn chunk_position(&self, region_chunk_x: u8, region_chunk_z: u8) -> Option<ChunkPosition> {
        let side = ANVIL_REGION_SIDE as i32;

        Some(ChunkPosition::new(
            self.x.checked_mul(side)?.checked_add(region_chunk_x as i32)?,
            self.z.checked_mul(side)?.checked_add(region_chunk_z as i32)?,
        ))
    }

    /// Whether every chunk of the region has a cell-space origin.
    fn is_addressable(&self) -> bool {
        let last = ANVIL_REGION_SIDE - 1;

        [(0, 0), (last, last)].iter().all(|&(x, z)| {
            self.chunk_position(x, z)
                .and_then(|position| position.origin())
                .is_some()
        })
    }
}

fn parse_coords(parts: &[&str]) -> Option<(i32, i32)> {
    let incorrect_format = parts.len() != 4 || parts[0] != "r" || parts[3] != "mca";

    if incorrect_format {
        return None;
    }

    Some((i32::from_str(parts[1]).ok()?, i32::from_str(parts[2]).ok()?))
}

/// Lists every Anvil region file of a folder, ordered by position.
///
/// Files not named like a region are ignored.
pub fn region_files(folder: &Path) -> Result<Vec<(AnvilRegionPosition, PathBuf)>, io::Error> {
    let mut files: Vec<_> = read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            AnvilRegionPosition::from_path(&path)
                .ok()
                .map(|position| (position, path))
        })
        .collect();

    files.sort();

    Ok(files)
}

/// Anvil region represents a 32x32 group of foreign chunks.
pub struct AnvilRegion<S> {
    position: AnvilRegionPosition,
    /// Source in which region are stored.
    source: S,
    /// Array of chunks metadata.
    chunks_metadata: [ChunkMetadata; REGION_CHUNKS],
}

impl<S> AnvilRegion<S> {
    pub fn position(&self) -> AnvilRegionPosition {
        self.position
    }

    /// Whether the header declares data for the chunk.
    pub fn has_chunk(&self, region_chunk_x: u8, region_chunk_z: u8) -> bool {
        !self
            .get_metadata(region_chunk_x, region_chunk_z)
            .is_empty()
    }

    /// Returns chunk metadata at specified coordinates.
    fn get_metadata(&self, region_chunk_x: u8, region_chunk_z: u8) -> ChunkMetadata {
        self.chunks_metadata[metadata_index(region_chunk_x, region_chunk_z)]
    }
}

fn metadata_index(region_chunk_x: u8, region_chunk_z: u8) -> usize {
    debug_assert!(
        ANVIL_REGION_SIDE > region_chunk_x,
        "Region chunk x coordinate out of bounds"
    );
    debug_assert!(
        ANVIL_REGION_SIDE > region_chunk_z,
        "Region chunk z coordinate out of bounds"
    );

    region_chunk_x as usize + region_chunk_z as usize * ANVIL_REGION_SIDE as usize
}

impl<S: Read + Seek> AnvilRegion<S> {
    pub fn load(position: AnvilRegionPosition, mut source: S) -> Result<Self, io::Error> {
        let source_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;

        let chunks_metadata = Self::read_header(&mut source, source_len)?;

        Ok(AnvilRegion {
            position,
            source,
            chunks_metadata,
        })
    }

    pub fn read_chunk(
        &mut self,
        region_chunk_x: u8,
        region_chunk_z: u8,
    ) -> Result<CompoundTag, ChunkReadError> {
        let metadata = self.get_metadata(region_chunk_x, region_chunk_z);

        if metadata.is_empty() {
            return Err(ChunkReadError::ChunkNotFound {
                region_chunk_x,
                region_chunk_z,
            });
        }

        let seek_offset = metadata.start_sector_index as u64 * REGION_SECTOR_BYTES_LENGTH as u64;
        let maximum_length =
            (metadata.sectors as u32 * REGION_SECTOR_BYTES_LENGTH).min(CHUNK_MAXIMUM_BYTES_LENGTH);

        self.source.seek(SeekFrom::Start(seek_offset))?;
        let length = self.source.read_u32::<BigEndian>()?;

        if length == 0 || length > maximum_length {
            return Err(ChunkReadError::LengthExceedsMaximum {
                length,
                maximum_length,
            });
        }

        let compression_scheme = self.source.read_u8()?;
        let mut compressed_buffer = vec![0u8; (length - 1) as usize];
        self.source.read_exact(&mut compressed_buffer)?;

        let mut cursor = Cursor::new(&compressed_buffer);

        match compression_scheme {
            GZIP_COMPRESSION_TYPE => Ok(read_gzip_compound_tag(&mut cursor)?),
            ZLIB_COMPRESSION_TYPE => Ok(read_zlib_compound_tag(&mut cursor)?),
            _ => Err(ChunkReadError::UnsupportedCompressionScheme { compression_scheme }),
        }
    }

    /// First 8KB of source are header of 1024 offsets and 1024 timestamps,
    /// only the offsets are used.
    fn read_header(
        source: &mut S,
        source_len: u64,
    ) -> Result<[ChunkMetadata; REGION_CHUNKS], io::Error> {
        let mut chunks_metadata = [Default::default(); REGION_CHUNKS];

        if REGION_HEADER_BYTES_LENGTH > source_len {
            return Ok(chunks_metadata);
        }

        let mut header = vec![0u8; REGION_HEADER_BYTES_LENGTH as usize];
        source.read_exact(&mut header)?;

        let mut cursor = Cursor::new(header);

        for metadata in chunks_metadata.iter_mut() {
            let offset = cursor.read_u32::<BigEndian>()?;

            let start_sector_index = offset >> 8;
            let sectors = (offset & 0xFF) as u8;

            *metadata = ChunkMetadata::new(start_sector_index, sectors);
        }

        Ok(chunks_metadata)
    }
}

/// Chunk metadata are stored in header.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
struct ChunkMetadata {
    /// Sector index from which starts chunk data.
    start_sector_index: u32,
    /// Amount of sectors used to store chunk.
    sectors: u8,
}

impl ChunkMetadata {
    fn new(start_sector_index: u32, sectors: u8) -> Self {
        ChunkMetadata {
            start_sector_index,
            sectors,
        }
    }

    fn is_empty(&self) -> bool {
        self.sectors == 0 || self.start_sector_index < 2
    }
}
