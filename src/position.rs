/// Region side length in chunks.
pub const REGION_CHUNKS_SIDE: i32 = 16;
/// Bits of a chunk coordinate addressing the chunk inside its region.
const REGION_CHUNK_BITS: i32 = 4;

/// Chunk coordinates in chunk space.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
pub struct ChunkPosition {
    pub x: i32,
    pub z: i32,
}

impl ChunkPosition {
    pub fn new(x: i32, z: i32) -> ChunkPosition {
        ChunkPosition { x, z }
    }

    /// Cell-space coordinates of the chunk corner, `None` when they do not
    /// fit into `i32`.
    pub fn origin(&self) -> Option<(i32, i32)> {
        Some((self.x.checked_mul(16)?, self.z.checked_mul(16)?))
    }

    pub fn region(&self) -> RegionPosition {
        RegionPosition::from_chunk_position(*self)
    }

    pub fn region_chunk(&self) -> RegionChunkPosition {
        RegionChunkPosition::from_chunk_position(*self)
    }
}

#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
pub struct RegionPosition {
    pub x: i32,
    pub z: i32,
}

impl RegionPosition {
    pub fn new(x: i32, z: i32) -> RegionPosition {
        RegionPosition { x, z }
    }

    pub fn from_chunk_position(chunk: ChunkPosition) -> RegionPosition {
        let x = chunk.x >> REGION_CHUNK_BITS;
        let z = chunk.z >> REGION_CHUNK_BITS;

        RegionPosition::new(x, z)
    }
}

/// Chunk position relative to its region.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone)]
pub struct RegionChunkPosition {
    pub x: u8,
    pub z: u8,
}

impl RegionChunkPosition {
    pub fn new(x: u8, z: u8) -> RegionChunkPosition {
        debug_assert!(16 > x, "Region chunk x coordinate out of bounds");
        debug_assert!(16 > z, "Region chunk z coordinate out of bounds");

        RegionChunkPosition { x, z }
    }

    pub fn from_chunk_position(chunk: ChunkPosition) -> RegionChunkPosition {
        let x = (chunk.x & (REGION_CHUNKS_SIDE - 1)) as u8;
        let z = (chunk.z & (REGION_CHUNKS_SIDE - 1)) as u8;

        RegionChunkPosition::new(x, z)
    }

    /// Index of the slot in the region directory.
    pub(crate) fn directory_index(&self) -> usize {
        self.x as usize + self.z as usize * REGION_CHUNKS_SIDE as usize
    }
}
