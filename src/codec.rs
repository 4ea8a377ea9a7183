//! Compact chunk payload codec.
//!
//! Payload layout before compression:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 256 | Column bytes `(temperature << 4) \| humidity`, x inner, z outer |
//! | 256 | N | Run-length encoded cells, y outer, then z, then x |
//!
//! Each run is a little-endian cell word with its light field holding the run
//! length: `count - 1` for runs of 1..=15 cells, or the marker 15 followed by
//! one byte of `count - 16` for runs of 16..=271 cells. The whole buffer is
//! raw deflate compressed.

use crate::cell::{Cell, Shaft};
use crate::chunk::{VoxelChunk, CHUNK_CELLS, CHUNK_HEIGHT, CHUNK_SHAFTS, CHUNK_SIZE};
use crate::error::CellCodecError;
use crate::position::ChunkPosition;
use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Longest run a short run can describe.
const SHORT_RUN_MAXIMUM: usize = 15;
/// Shortest run stored as an extended run.
const EXTENDED_RUN_MINIMUM: usize = SHORT_RUN_MAXIMUM + 1;
/// Longest run a single encoded run can describe.
pub const RUN_MAXIMUM: usize = 271;
/// Light field value marking an extended run.
const EXTENDED_RUN_MARKER: u32 = 15;
/// Worst case uncompressed payload: columns plus one short run per cell.
pub const MAXIMUM_PAYLOAD_LENGTH: usize = CHUNK_SHAFTS + CHUNK_CELLS * 4;

/// Run length as it is stored on disk.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum RunLength {
    /// `count - 1` in the light field, always below the extended marker.
    Short(u8),
    /// Marker in the light field and `count - 16` in the trailing byte.
    Extended(u8),
}

/// One encoded run of 1..=271 identical light-stripped cells.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Run {
    cell: Cell,
    length: RunLength,
}

impl Run {
    /// Describes `count` repetitions of `cell`, with light stripped.
    pub fn new(cell: Cell, count: usize) -> Result<Run, CellCodecError> {
        let length = match count {
            1..=SHORT_RUN_MAXIMUM => RunLength::Short((count - 1) as u8),
            EXTENDED_RUN_MINIMUM..=RUN_MAXIMUM => {
                RunLength::Extended((count - EXTENDED_RUN_MINIMUM) as u8)
            }
            _ => return Err(CellCodecError::RunLengthOutOfBounds { count }),
        };

        Ok(Run {
            cell: cell.with_light(0),
            length,
        })
    }

    pub fn cell(&self) -> Cell {
        self.cell
    }

    pub fn count(&self) -> usize {
        match self.length {
            RunLength::Short(stored) => stored as usize + 1,
            RunLength::Extended(stored) => stored as usize + EXTENDED_RUN_MINIMUM,
        }
    }

    /// Whether the run needs the trailing length byte.
    pub fn is_extended(&self) -> bool {
        match self.length {
            RunLength::Short(_) => false,
            RunLength::Extended(_) => true,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self.length {
            RunLength::Short(_) => 4,
            RunLength::Extended(_) => 5,
        }
    }

    pub fn write(&self, buffer: &mut Vec<u8>) {
        let mut word = [0u8; 4];

        match self.length {
            RunLength::Short(stored) => {
                LittleEndian::write_u32(&mut word, self.cell.with_light(stored as u32).0);
                buffer.extend_from_slice(&word);
            }
            RunLength::Extended(stored) => {
                LittleEndian::write_u32(&mut word, self.cell.with_light(EXTENDED_RUN_MARKER).0);
                buffer.extend_from_slice(&word);
                buffer.push(stored);
            }
        }
    }

    /// Reads a run at `offset`, returning it with the offset past it.
    pub fn read(bytes: &[u8], offset: usize) -> Result<(Run, usize), CellCodecError> {
        if bytes.len() < offset + 4 {
            return Err(CellCodecError::TruncatedRun { offset });
        }

        let word = Cell(LittleEndian::read_u32(&bytes[offset..offset + 4]));
        let cell = word.with_light(0);
        let light = word.light();

        if light < EXTENDED_RUN_MARKER {
            let run = Run {
                cell,
                length: RunLength::Short(light as u8),
            };

            return Ok((run, offset + 4));
        }

        let stored = *bytes
            .get(offset + 4)
            .ok_or(CellCodecError::TruncatedRun { offset })?;

        let run = Run {
            cell,
            length: RunLength::Extended(stored),
        };

        Ok((run, offset + 5))
    }
}

/// Appends run-length encoded cells, splitting runs longer than 271 cells.
pub fn write_runs<I: IntoIterator<Item = Cell>>(
    cells: I,
    buffer: &mut Vec<u8>,
) -> Result<(), CellCodecError> {
    let mut current: Option<(Cell, usize)> = None;

    for cell in cells {
        let cell = cell.with_light(0);

        current = match current {
            Some((run_cell, count)) if run_cell == cell && count < RUN_MAXIMUM => {
                Some((run_cell, count + 1))
            }
            Some((run_cell, count)) => {
                Run::new(run_cell, count)?.write(buffer);
                Some((cell, 1))
            }
            None => Some((cell, 1)),
        };
    }

    if let Some((run_cell, count)) = current {
        Run::new(run_cell, count)?.write(buffer);
    }

    Ok(())
}

/// Chunk payload encoder and decoder.
pub struct ChunkCodec {
    compression: Compression,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        ChunkCodec {
            compression: Compression::fast(),
        }
    }
}

impl ChunkCodec {
    pub fn new(compression: Compression) -> Self {
        ChunkCodec { compression }
    }

    /// Encodes cells and column climate of chunk into compressed bytes.
    ///
    /// Light and every column field other than temperature and humidity are
    /// not persisted.
    pub fn encode(&self, chunk: &VoxelChunk) -> Result<Vec<u8>, CellCodecError> {
        let mut buffer = Vec::with_capacity(CHUNK_SHAFTS + 4096);

        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let shaft = chunk.shaft(x, z);
                buffer.push(((shaft.temperature() << 4) | shaft.humidity()) as u8);
            }
        }

        let cells = (0..CHUNK_CELLS).map(|index| {
            let (x, y, z) = stream_coordinates(index);
            chunk.cell(x, y, z)
        });
        write_runs(cells, &mut buffer)?;

        let mut encoder = DeflateEncoder::new(Vec::new(), self.compression);
        encoder.write_all(&buffer)?;

        Ok(encoder.finish()?)
    }

    /// Decodes compressed bytes into a new chunk at `position`.
    pub fn decode(
        &self,
        bytes: &[u8],
        position: ChunkPosition,
    ) -> Result<VoxelChunk, CellCodecError> {
        let mut chunk = VoxelChunk::new(position);
        self.decode_into(bytes, &mut chunk)?;

        Ok(chunk)
    }

    /// Decodes compressed bytes over every cell and shaft of `chunk`.
    ///
    /// Shaft fields other than temperature and humidity are reset to zero.
    /// On error the chunk content is unspecified.
    pub fn decode_into(&self, bytes: &[u8], chunk: &mut VoxelChunk) -> Result<(), CellCodecError> {
        let buffer = decompress(bytes)?;

        if buffer.len() < CHUNK_SHAFTS {
            return Err(CellCodecError::TruncatedColumns {
                length: buffer.len(),
            });
        }

        for z in 0..CHUNK_SIZE {
            for x in 0..CHUNK_SIZE {
                let byte = buffer[x + z * CHUNK_SIZE] as u32;
                let shaft = Shaft(0)
                    .with_temperature(byte >> 4)
                    .with_humidity(byte & 0xF);
                chunk.set_shaft(x, z, shaft);
            }
        }

        let mut offset = CHUNK_SHAFTS;
        let mut cursor = 0;

        while offset < buffer.len() {
            let (run, next_offset) = Run::read(&buffer, offset)?;

            if cursor + run.count() > CHUNK_CELLS {
                return Err(CellCodecError::RunOverflow { offset });
            }

            for index in cursor..cursor + run.count() {
                let (x, y, z) = stream_coordinates(index);
                chunk.set_cell(x, y, z, run.cell());
            }

            cursor += run.count();
            offset = next_offset;
        }

        if cursor != CHUNK_CELLS {
            let (x, y, z) = stream_coordinates(cursor);
            return Err(CellCodecError::CursorMismatch { x, y, z });
        }

        Ok(())
    }
}

fn decompress(bytes: &[u8]) -> Result<Vec<u8>, CellCodecError> {
    let mut buffer = Vec::with_capacity(CHUNK_SHAFTS + 4096);
    let mut decoder = DeflateDecoder::new(bytes).take(MAXIMUM_PAYLOAD_LENGTH as u64 + 1);
    decoder.read_to_end(&mut buffer)?;

    if buffer.len() > MAXIMUM_PAYLOAD_LENGTH {
        return Err(CellCodecError::PayloadOverflow {
            maximum_length: MAXIMUM_PAYLOAD_LENGTH,
        });
    }

    Ok(buffer)
}

/// Cell coordinates of the stream position `index`: x inner, then z, then y.
fn stream_coordinates(index: usize) -> (usize, usize, usize) {
    let x = index % CHUNK_SIZE;
    let z = (index / CHUNK_SIZE) % CHUNK_SIZE;
    let y = index / (CHUNK_SIZE * CHUNK_SIZE);

    debug_assert!(y <= CHUNK_HEIGHT);

    (x, y, z)
}

#[cfg(test)]
mod tests {
    use crate::cell::{Cell, Shaft};
    use crate::chunk::{VoxelChunk, CHUNK_HEIGHT, CHUNK_SIZE};
    use crate::codec::{write_runs, ChunkCodec, Run, RUN_MAXIMUM};
    use crate::error::{CellCodecError, ErrorKind};
    use crate::position::ChunkPosition;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Write;

    fn assert_same_cells(expected: &VoxelChunk, actual: &VoxelChunk) {
        for x in 0..CHUNK_SIZE {
            for y in 0..CHUNK_HEIGHT {
                for z in 0..CHUNK_SIZE {
                    let expected_cell = expected.cell(x, y, z);
                    let actual_cell = actual.cell(x, y, z);

                    assert_eq!(
                        (expected_cell.contents(), expected_cell.data()),
                        (actual_cell.contents(), actual_cell.data()),
                        "mismatch at ({}, {}, {})",
                        x,
                        y,
                        z
                    );
                    assert_eq!(actual_cell.light(), 0);
                }
            }
        }
    }

    fn round_trip(chunk: &VoxelChunk) -> VoxelChunk {
        let codec = ChunkCodec::default();
        let bytes = codec.encode(chunk).unwrap();

        codec.decode(&bytes, chunk.position()).unwrap()
    }

    fn deflate(buffer: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(buffer).unwrap();
        encoder.finish().unwrap()
    }

    fn fill(chunk: &mut VoxelChunk, cell: impl Fn(usize, usize, usize) -> Cell) {
        for x in 0..CHUNK_SIZE {
            for y in 0..CHUNK_HEIGHT {
                for z in 0..CHUNK_SIZE {
                    chunk.set_cell(x, y, z, cell(x, y, z));
                }
            }
        }
    }

    #[test]
    fn test_all_air_round_trip() {
        let chunk = VoxelChunk::new(ChunkPosition::new(1, 2));
        let decoded = round_trip(&chunk);

        assert_same_cells(&chunk, &decoded);
    }

    #[test]
    fn test_all_identical_round_trip() {
        let mut chunk = VoxelChunk::new(ChunkPosition::new(0, 0));
        fill(&mut chunk, |_, _, _| Cell::new(67, 9, 1234));

        assert_same_cells(&chunk, &round_trip(&chunk));
    }

    #[test]
    fn test_checkerboard_round_trip() {
        let mut chunk = VoxelChunk::new(ChunkPosition::new(0, 0));
        fill(&mut chunk, |x, y, z| {
            if (x + y + z) % 2 == 0 {
                Cell::new(3, 0, 0)
            } else {
                Cell::new(1023, 15, 262_143)
            }
        });

        assert_same_cells(&chunk, &round_trip(&chunk));
    }

    #[test]
    fn test_random_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..4 {
            let mut chunk = VoxelChunk::new(ChunkPosition::new(rng.gen(), rng.gen()));
            fill(&mut chunk, |_, _, _| Cell(0));

            // Layered terrain with random noise keeps runs of mixed lengths.
            for x in 0..CHUNK_SIZE {
                for z in 0..CHUNK_SIZE {
                    for y in 0..CHUNK_HEIGHT {
                        let cell = if y < 60 {
                            Cell::from_contents(3)
                        } else if rng.gen_bool(0.1) {
                            Cell(rng.gen())
                        } else {
                            Cell::AIR
                        };
                        chunk.set_cell(x, y, z, cell);
                    }
                }
            }

            assert_same_cells(&chunk, &round_trip(&chunk));
        }
    }

    #[test]
    fn test_column_climate_round_trip() {
        let mut chunk = VoxelChunk::new(ChunkPosition::new(0, 0));

        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                let shaft = Shaft(0)
                    .with_temperature(x as u32)
                    .with_humidity(z as u32)
                    .with_top_height(200)
                    .with_sunlight_height(100);
                chunk.set_shaft(x, z, shaft);
            }
        }

        let decoded = round_trip(&chunk);

        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                let shaft = decoded.shaft(x, z);
                assert_eq!(shaft.temperature(), x as u32);
                assert_eq!(shaft.humidity(), z as u32);
                assert_eq!(shaft.top_height(), 0);
                assert_eq!(shaft.sunlight_height(), 0);
            }
        }
    }

    #[test]
    fn test_run_splitting_byte_counts() {
        let expected = [
            (1, 4, 1),
            (15, 4, 1),
            (16, 5, 1),
            (270, 5, 1),
            (271, 5, 1),
            (272, 9, 2),
            (600, 15, 3),
        ];
        let cell = Cell::new(12, 7, 3);

        for &(length, bytes_len, runs_len) in expected.iter() {
            let mut buffer = Vec::new();
            write_runs(std::iter::repeat(cell).take(length), &mut buffer).unwrap();

            assert_eq!(buffer.len(), bytes_len, "run of {}", length);

            let mut offset = 0;
            let mut runs = Vec::new();
            while offset < buffer.len() {
                let (run, next_offset) = Run::read(&buffer, offset).unwrap();
                runs.push(run);
                offset = next_offset;
            }

            assert_eq!(runs.len(), runs_len, "run of {}", length);
            assert_eq!(runs.iter().map(Run::encoded_len).sum::<usize>(), bytes_len);
            assert!(runs.iter().all(|run| run.count() <= RUN_MAXIMUM));
            assert!(runs.iter().all(|run| run.cell() == cell.with_light(0)));
            assert_eq!(runs.iter().map(Run::count).sum::<usize>(), length);
        }
    }

    #[test]
    fn test_run_tags() {
        let cell = Cell::from_contents(5);

        let short = Run::new(cell, 15).unwrap();
        let extended = Run::new(cell, 16).unwrap();

        assert!(!short.is_extended());
        assert_eq!(short.count(), 15);
        assert!(extended.is_extended());
        assert_eq!(extended.count(), 16);

        let mut buffer = Vec::new();
        short.write(&mut buffer);
        extended.write(&mut buffer);

        assert_eq!(buffer, vec![5, 0x38, 0, 0, 5, 0x3C, 0, 0, 0]);
        assert_eq!(Run::read(&buffer, 0).unwrap(), (short, 4));
        assert_eq!(Run::read(&buffer, 4).unwrap(), (extended, 9));
    }

    #[test]
    fn test_run_length_bounds() {
        for &count in [0, RUN_MAXIMUM + 1, 1000].iter() {
            match Run::new(Cell::AIR, count) {
                Err(CellCodecError::RunLengthOutOfBounds { count: rejected }) => {
                    assert_eq!(rejected, count)
                }
                other => panic!("Expected `RunLengthOutOfBounds` but got `{:?}`", other),
            }
        }

        assert_eq!(Run::new(Cell::AIR, 1).unwrap().count(), 1);
        assert_eq!(Run::new(Cell::AIR, RUN_MAXIMUM).unwrap().count(), RUN_MAXIMUM);
    }

    #[test]
    fn test_short_stream_fails() {
        let mut buffer = vec![0u8; 256];
        write_runs(std::iter::repeat(Cell::AIR).take(1000), &mut buffer).unwrap();

        let result = ChunkCodec::default().decode(&deflate(&buffer), ChunkPosition::new(0, 0));

        match result {
            Err(CellCodecError::CursorMismatch { x: 8, y: 3, z: 14 }) => {}
            other => panic!("Expected `CursorMismatch` but got `{:?}`", other.err()),
        }
    }

    #[test]
    fn test_overlong_stream_fails() {
        let mut buffer = vec![0u8; 256];
        write_runs(std::iter::repeat(Cell::AIR).take(65_536 + 1), &mut buffer).unwrap();

        let result = ChunkCodec::default().decode(&deflate(&buffer), ChunkPosition::new(0, 0));

        assert!(matches!(result, Err(CellCodecError::RunOverflow { .. })));
    }

    #[test]
    fn test_truncated_run_fails() {
        let mut buffer = vec![0u8; 256];
        Run::new(Cell::AIR, 200).unwrap().write(&mut buffer);
        buffer.pop();

        let result = ChunkCodec::default().decode(&deflate(&buffer), ChunkPosition::new(0, 0));

        assert!(matches!(
            result,
            Err(CellCodecError::TruncatedRun { offset: 256 })
        ));
    }

    #[test]
    fn test_truncated_columns_fail() {
        let result = ChunkCodec::default().decode(&deflate(&[0u8; 100]), ChunkPosition::new(0, 0));

        assert!(matches!(
            result,
            Err(CellCodecError::TruncatedColumns { length: 100 })
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        // Reserved deflate block type.
        let result = ChunkCodec::default().decode(&[0xFF; 32], ChunkPosition::new(0, 0));

        match result {
            Err(error @ CellCodecError::CompressionError { .. }) => {
                assert_eq!(error.kind(), ErrorKind::Format)
            }
            other => panic!("Expected `CompressionError` but got `{:?}`", other.err()),
        }
    }
}
