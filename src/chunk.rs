use crate::cell::{Cell, Shaft};
use crate::position::ChunkPosition;

/// Chunk width and depth in cells.
pub const CHUNK_SIZE: usize = 16;
/// Chunk height in cells.
pub const CHUNK_HEIGHT: usize = 256;
/// Amount of cells in chunk.
pub const CHUNK_CELLS: usize = CHUNK_SIZE * CHUNK_HEIGHT * CHUNK_SIZE;
/// Amount of shafts (columns) in chunk.
pub const CHUNK_SHAFTS: usize = CHUNK_SIZE * CHUNK_SIZE;

/// Water contents id.
const WATER: u32 = 18;
/// Lava contents id.
const LAVA: u32 = 92;
/// Contents ids of blocks connecting to neighbouring fences.
const FENCES: [u32; 7] = [94, 163, 164, 166, 193, 194, 202];

/// Temperature assigned to freshly calculated columns.
const DEFAULT_TEMPERATURE: u32 = 12;
/// Humidity assigned to freshly calculated columns.
const DEFAULT_HUMIDITY: u32 = 12;

/// Dense 16x256x16 grid of cells with 16x16 column metadata.
///
/// Coordinates outside of `[0,16)x[0,256)x[0,16)` are a programming error
/// and panic.
pub struct VoxelChunk {
    position: ChunkPosition,
    cells: Box<[Cell]>,
    shafts: Box<[Shaft]>,
}

impl VoxelChunk {
    /// Creates a chunk filled with air and zeroed shafts.
    pub fn new(position: ChunkPosition) -> Self {
        VoxelChunk {
            position,
            cells: vec![Cell::AIR; CHUNK_CELLS].into_boxed_slice(),
            shafts: vec![Shaft::default(); CHUNK_SHAFTS].into_boxed_slice(),
        }
    }

    pub fn position(&self) -> ChunkPosition {
        self.position
    }

    pub fn set_position(&mut self, position: ChunkPosition) {
        self.position = position;
    }

    /// Resets every cell to air and every shaft to zero.
    pub fn clear(&mut self) {
        for cell in self.cells.iter_mut() {
            *cell = Cell::AIR;
        }

        for shaft in self.shafts.iter_mut() {
            *shaft = Shaft::default();
        }
    }

    pub fn cell(&self, x: usize, y: usize, z: usize) -> Cell {
        self.cells[cell_index(x, y, z)]
    }

    pub fn set_cell(&mut self, x: usize, y: usize, z: usize, cell: Cell) {
        self.cells[cell_index(x, y, z)] = cell;
    }

    pub fn shaft(&self, x: usize, z: usize) -> Shaft {
        self.shafts[shaft_index(x, z)]
    }

    pub fn set_shaft(&mut self, x: usize, z: usize, shaft: Shaft) {
        self.shafts[shaft_index(x, z)] = shaft;
    }

    /// Height of the highest non-air cell in column, 0 if the column is empty.
    pub fn topmost_cell_height(&self, x: usize, z: usize) -> usize {
        (0..CHUNK_HEIGHT)
            .rev()
            .find(|&y| self.cell(x, y, z).contents() != 0)
            .unwrap_or(0)
    }

    /// Recomputes column metadata and cell data derived from neighbours.
    ///
    /// Cells at y = 0 are never inspected.
    pub fn postcalculate(&mut self) {
        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                let mut shaft = self.shaft(x, z);
                let mut topmost_set = false;
                let mut in_fluid = false;

                for y in (1..CHUNK_HEIGHT).rev() {
                    let cell = self.cell(x, y, z);
                    let contents = cell.contents();

                    if contents != 0 && !topmost_set {
                        shaft = shaft
                            .with_top_height(y as u32)
                            .with_sunlight_height(y as u32);
                        topmost_set = true;
                    }

                    if contents == WATER || contents == LAVA {
                        if !in_fluid {
                            in_fluid = true;
                            self.set_cell(x, y, z, cell.with_top_flag());
                        }
                    } else {
                        in_fluid = false;
                    }

                    if is_fence(cell) {
                        self.update_fence(cell, x, y, z);
                    }
                }

                shaft = shaft
                    .with_bottom_height(0)
                    .with_temperature(DEFAULT_TEMPERATURE)
                    .with_humidity(DEFAULT_HUMIDITY);
                self.set_shaft(x, z, shaft);
            }
        }
    }

    fn update_fence(&mut self, cell: Cell, x: usize, y: usize, z: usize) {
        let mut variant = 0;

        if x + 1 < CHUNK_SIZE && is_fence(self.cell(x + 1, y, z)) {
            variant += 1;
        }

        if x > 0 && is_fence(self.cell(x - 1, y, z)) {
            variant += 2;
        }

        if z + 1 < CHUNK_SIZE && is_fence(self.cell(x, y, z + 1)) {
            variant += 4;
        }

        if z > 0 && is_fence(self.cell(x, y, z - 1)) {
            variant += 8;
        }

        self.set_cell(x, y, z, cell.with_variant(variant));
    }
}

fn is_fence(cell: Cell) -> bool {
    FENCES.contains(&cell.contents())
}

fn cell_index(x: usize, y: usize, z: usize) -> usize {
    assert!(x < CHUNK_SIZE, "Cell x coordinate {} out of bounds", x);
    assert!(y < CHUNK_HEIGHT, "Cell y coordinate {} out of bounds", y);
    assert!(z < CHUNK_SIZE, "Cell z coordinate {} out of bounds", z);

    y + x * CHUNK_HEIGHT + z * CHUNK_HEIGHT * CHUNK_SIZE
}

fn shaft_index(x: usize, z: usize) -> usize {
    assert!(x < CHUNK_SIZE, "Shaft x coordinate {} out of bounds", x);
    assert!(z < CHUNK_SIZE, "Shaft z coordinate {} out of bounds", z);

    x + z * CHUNK_SIZE
}
