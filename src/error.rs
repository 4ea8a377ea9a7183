use crate::position::{ChunkPosition, RegionPosition};
use nbt::decode::TagDecodeError;
use std::{error::Error, fmt::Display, io};

/// Failure category shared by every error of the crate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Stored or foreign bytes do not match the expected layout.
    Format,
    /// Underlying file operation failed.
    Io,
    /// A hard limit of the format was exceeded.
    InvariantViolation,
}

/// Possible errors while encoding or decoding chunk payload.
#[derive(Debug)]
pub enum CellCodecError {
    /// Payload could not be compressed or decompressed.
    CompressionError { io_error: io::Error },
    /// Decompressed payload exceeds the worst case chunk payload length.
    ///
    /// Region file are corrupted.
    PayloadOverflow { maximum_length: usize },
    /// Decompressed payload is shorter than the column block.
    TruncatedColumns { length: usize },
    /// Run at the given offset is cut short by the payload end.
    TruncatedRun { offset: usize },
    /// Run at the given offset writes past the last chunk cell.
    RunOverflow { offset: usize },
    /// Stream ended with the cell cursor anywhere but one past the last cell.
    CursorMismatch { x: usize, y: usize, z: usize },
    /// A single run must cover 1..=271 cells.
    RunLengthOutOfBounds { count: usize },
}

impl CellCodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CellCodecError::CompressionError { io_error } => match io_error.kind() {
                io::ErrorKind::InvalidInput
                | io::ErrorKind::InvalidData
                | io::ErrorKind::UnexpectedEof => ErrorKind::Format,
                _ => ErrorKind::Io,
            },
            CellCodecError::RunLengthOutOfBounds { .. } => ErrorKind::InvariantViolation,
            _ => ErrorKind::Format,
        }
    }
}

impl From<io::Error> for CellCodecError {
    fn from(io_error: io::Error) -> Self {
        CellCodecError::CompressionError { io_error }
    }
}

impl Error for CellCodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CellCodecError::CompressionError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for CellCodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CellCodecError::*;
        match self {
            CompressionError { .. } => write!(f, "Deflate stream error"),
            PayloadOverflow { maximum_length } => write!(
                f,
                "Decompressed chunk payload exceeds maximum ({})",
                maximum_length
            ),
            TruncatedColumns { length } => write!(
                f,
                "Chunk payload of {} bytes is shorter than column block",
                length
            ),
            TruncatedRun { offset } => write!(f, "Truncated run at offset {}", offset),
            RunOverflow { offset } => {
                write!(f, "Run at offset {} overflows chunk cells", offset)
            }
            CursorMismatch { x, y, z } => write!(
                f,
                "Corrupt chunk data: cell stream ended at {}, {}, {}",
                x, y, z
            ),
            RunLengthOutOfBounds { count } => {
                write!(f, "Run of {} cells cannot be encoded", count)
            }
        }
    }
}

/// Possible errors while decoding palette indices.
#[derive(Debug, Eq, PartialEq)]
pub enum PaletteError {
    /// Palette must contain at least one entry.
    EmptyPalette,
    /// Bits per index must be between 1 and 16.
    UnsupportedBitWidth { bits: u32 },
    /// Packed array holds fewer words than the indices need.
    WordsTooShort { expected: usize, actual: usize },
    /// Decoded index does not point into palette.
    IndexOutOfRange { index: usize, palette_length: usize },
}

impl PaletteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaletteError::UnsupportedBitWidth { .. } => ErrorKind::InvariantViolation,
            _ => ErrorKind::Format,
        }
    }
}

impl Error for PaletteError {}

impl Display for PaletteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use PaletteError::*;
        match self {
            EmptyPalette => write!(f, "Palette is empty"),
            UnsupportedBitWidth { bits } => write!(f, "Unsupported bit width: {}", bits),
            WordsTooShort { expected, actual } => write!(
                f,
                "Packed array of {} words is shorter than expected {}",
                actual, expected
            ),
            IndexOutOfRange {
                index,
                palette_length,
            } => write!(
                f,
                "Palette index {} out of range (palette length {})",
                index, palette_length
            ),
        }
    }
}

/// Possible errors of the chunk storage back-ends.
#[derive(Debug)]
pub enum StorageError {
    /// Region file does not start with the region sentinel.
    ///
    /// Region file are corrupted or not a region file at all.
    InvalidRegionMagic { region: RegionPosition },
    /// Chunk payload at the given offset does not start with the chunk sentinel.
    InvalidChunkMagic { offset: u32 },
    /// Directory entry declares a size outside the allowed bounds.
    ///
    /// This should not occur under normal conditions.
    EntrySizeOutOfBounds { size: i32 },
    /// Directory entry points into the header or before file start.
    EntryOffsetOutOfBounds { offset: i32 },
    /// Slot at `offset` runs into the slot at `next_offset`.
    OverlappingEntries { offset: u32, next_offset: u32 },
    /// Stored payload ends past the end of file.
    TruncatedPayload { offset: u32, size: u32 },
    /// Payload length exceeds the maximum a directory entry can describe.
    PayloadTooLarge { length: usize },
    /// Region file would grow past its maximum length.
    RegionTooLarge { length: u64 },
    /// Linked file does not start with the file sentinel.
    InvalidFileMagic,
    /// Linked file header declares an unsupported node size.
    InvalidNodeSize { node_size: i32 },
    /// Node index points outside of the node area.
    InvalidNode { node: i32 },
    /// Node does not start with the node sentinel.
    InvalidNodeMagic { node: i32 },
    /// Node is reachable from more than one chain.
    CrossLinkedNode { node: i32 },
    /// Every chunk descriptor of the linked file is in use.
    DescriptorTableFull,
    /// I/O Error which happened while were accessing storage files.
    IOError { io_error: io::Error },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        use StorageError::*;
        match self {
            IOError { .. } => ErrorKind::Io,
            PayloadTooLarge { .. } | RegionTooLarge { .. } | DescriptorTableFull => {
                ErrorKind::InvariantViolation
            }
            _ => ErrorKind::Format,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(io_error: io::Error) -> Self {
        StorageError::IOError { io_error }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::IOError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use StorageError::*;
        match self {
            InvalidRegionMagic { region } => {
                write!(f, "Invalid region file {}, {} magic", region.x, region.z)
            }
            InvalidChunkMagic { offset } => {
                write!(f, "Invalid region file chunk magic at offset {}", offset)
            }
            EntrySizeOutOfBounds { size } => write!(
                f,
                "Region file entry size {} out of bounds, likely corrupt region file",
                size
            ),
            EntryOffsetOutOfBounds { offset } => write!(
                f,
                "Region file entry offset {} out of bounds, likely corrupt region file",
                offset
            ),
            OverlappingEntries {
                offset,
                next_offset,
            } => write!(
                f,
                "Region file slot at offset {} overlaps slot at offset {}",
                offset, next_offset
            ),
            TruncatedPayload { offset, size } => write!(
                f,
                "Region file is truncated: payload of {} bytes at offset {}",
                size, offset
            ),
            PayloadTooLarge { length } => {
                write!(f, "Chunk payload of {} bytes exceeds maximum (1mb)", length)
            }
            RegionTooLarge { length } => {
                write!(f, "Region file length of {} exceeds maximum", length)
            }
            InvalidFileMagic => write!(f, "Invalid chunks file header magic"),
            InvalidNodeSize { node_size } => {
                write!(f, "Invalid chunks file header node size: {}", node_size)
            }
            InvalidNode { node } => write!(f, "Invalid node: {}", node),
            InvalidNodeMagic { node } => write!(f, "Invalid node {} magic", node),
            CrossLinkedNode { node } => write!(f, "Node {} is cross-linked", node),
            DescriptorTableFull => write!(f, "Chunk descriptor table is full"),
            IOError { .. } => write!(f, "IO Error"),
        }
    }
}

/// Possible errors while reading chunk from a foreign region file.
#[derive(Debug)]
pub enum ChunkReadError {
    /// Chunk at specified coordinates inside region not found.
    ChunkNotFound {
        region_chunk_x: u8,
        region_chunk_z: u8,
    },
    /// Chunk length overlaps declared maximum.
    ///
    /// This should not occur under normal conditions.
    ///
    /// Region file are corrupted.
    LengthExceedsMaximum {
        /// Chunk length.
        length: u32,
        /// Chunk maximum expected length.
        maximum_length: u32,
    },
    /// Currently are only 2 types of compression: Gzip and Zlib.
    ///
    /// This should not occur under normal conditions.
    ///
    /// Region file are corrupted or was introduced new compression type.
    UnsupportedCompressionScheme {
        /// Compression scheme type id.
        compression_scheme: u8,
    },
    /// I/O Error which happened while were reading chunk data from region file.
    IOError { io_error: io::Error },
    /// Error while decoding binary data to NBT tag.
    ///
    /// This should not occur under normal conditions.
    ///
    /// Region file are corrupted or a developer error in the NBT library.
    TagDecodeError { tag_decode_error: TagDecodeError },
}

impl ChunkReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkReadError::IOError { .. } => ErrorKind::Io,
            _ => ErrorKind::Format,
        }
    }
}

impl From<io::Error> for ChunkReadError {
    fn from(io_error: io::Error) -> Self {
        ChunkReadError::IOError { io_error }
    }
}

impl From<TagDecodeError> for ChunkReadError {
    fn from(tag_decode_error: TagDecodeError) -> Self {
        ChunkReadError::TagDecodeError { tag_decode_error }
    }
}

impl Error for ChunkReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        use ChunkReadError::*;
        match self {
            IOError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for ChunkReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ChunkReadError::*;
        match self {
            ChunkNotFound {
                region_chunk_x,
                region_chunk_z,
            } => write!(f, "Chunk {}, {} not found", region_chunk_x, region_chunk_z),
            LengthExceedsMaximum {
                length,
                maximum_length,
            } => write!(
                f,
                "Chunk length of {} exceeds maximum ({})",
                length, maximum_length
            ),
            UnsupportedCompressionScheme { compression_scheme } => {
                write!(f, "Unsupported compression scheme: {}", compression_scheme)
            }
            IOError { .. } => write!(f, "IO Error"),
            ChunkReadError::TagDecodeError { .. } => write!(f, "Failed to decode nbt"),
        }
    }
}

/// Possible errors while loading the chunk from terrain store.
#[derive(Debug)]
pub enum ChunkLoadError {
    Storage {
        position: ChunkPosition,
        storage_error: StorageError,
    },
    Codec {
        position: ChunkPosition,
        codec_error: CellCodecError,
    },
}

impl ChunkLoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkLoadError::Storage { storage_error, .. } => storage_error.kind(),
            ChunkLoadError::Codec { codec_error, .. } => codec_error.kind(),
        }
    }
}

impl Error for ChunkLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChunkLoadError::Storage { storage_error, .. } => Some(storage_error),
            ChunkLoadError::Codec { codec_error, .. } => Some(codec_error),
        }
    }
}

impl Display for ChunkLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkLoadError::Storage { position, .. } | ChunkLoadError::Codec { position, .. } => {
                write!(f, "Error loading chunk ({},{})", position.x, position.z)
            }
        }
    }
}

/// Possible errors while saving the chunk to terrain store.
#[derive(Debug)]
pub enum ChunkSaveError {
    Storage {
        position: ChunkPosition,
        storage_error: StorageError,
    },
    Codec {
        position: ChunkPosition,
        codec_error: CellCodecError,
    },
}

impl ChunkSaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkSaveError::Storage { storage_error, .. } => storage_error.kind(),
            ChunkSaveError::Codec { codec_error, .. } => codec_error.kind(),
        }
    }
}

impl Error for ChunkSaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChunkSaveError::Storage { storage_error, .. } => Some(storage_error),
            ChunkSaveError::Codec { codec_error, .. } => Some(codec_error),
        }
    }
}

impl Display for ChunkSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkSaveError::Storage { position, .. } | ChunkSaveError::Codec { position, .. } => {
                write!(f, "Error saving chunk ({},{})", position.x, position.z)
            }
        }
    }
}

/// Possible errors while importing a foreign region file.
#[derive(Debug)]
pub enum ImportError {
    /// Region file name is not `r.<x>.<z>.mca`.
    InvalidRegionFileName { file_name: String },
    /// Region file could not be opened or its header read.
    IOError { io_error: io::Error },
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::InvalidRegionFileName { .. } => ErrorKind::Format,
            ImportError::IOError { .. } => ErrorKind::Io,
        }
    }
}

impl From<io::Error> for ImportError {
    fn from(io_error: io::Error) -> Self {
        ImportError::IOError { io_error }
    }
}

impl Error for ImportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ImportError::IOError { io_error } => Some(io_error),
            _ => None,
        }
    }
}

impl Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::InvalidRegionFileName { file_name } => {
                write!(f, "Invalid region file name: {}", file_name)
            }
            ImportError::IOError { .. } => write!(f, "IO Error"),
        }
    }
}
