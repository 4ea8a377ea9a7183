//! Decoding of palette-indexed chunk sections.
//!
//! A section stores 4096 fixed-width indices packed into 64-bit words. The
//! width depends on the palette length and never drops below 4 bits.

use crate::cell::Cell;
use crate::error::PaletteError;

/// Amount of cells in a 16x16x16 section.
pub const SECTION_CELLS: usize = 4096;
/// Smallest bit width used by packed sections.
const MINIMUM_BITS: u32 = 4;
/// First data version (20w17a) whose indices never straddle words.
const ALIGNED_PACKING_DATA_VERSION: i32 = 2529;

/// Number of bits needed to represent `value` in unsigned binary.
///
/// Returns the smallest `b` with `value < 2^b`, so 0 needs 0 bits.
pub fn exact_bit_length(value: u32) -> u32 {
    32 - value.leading_zeros()
}

/// Bits per index for a palette of `palette_length` entries.
pub fn bits_per_index(palette_length: usize) -> u32 {
    let highest_index = palette_length.saturating_sub(1) as u32;

    exact_bit_length(highest_index).max(MINIMUM_BITS)
}

/// Strategy for packing fixed-width indices into 64-bit words.
pub trait BitPacking: Sync {
    /// Amount of words needed to hold `count` indices of `bits` width.
    ///
    /// `bits` must be within `1..=16`.
    fn word_count(&self, bits: u32, count: usize) -> usize;

    /// Unpacks `indices.len()` indices from `words`.
    fn decode(&self, words: &[u64], bits: u32, indices: &mut [u16]) -> Result<(), PaletteError>;

    /// Packs indices, keeping the low `bits` of each.
    fn encode(&self, indices: &[u16], bits: u32) -> Result<Vec<u64>, PaletteError>;
}

/// Indices never straddle words, unused high bits of each word are wasted.
pub struct AlignedPacking;

impl BitPacking for AlignedPacking {
    fn word_count(&self, bits: u32, count: usize) -> usize {
        let per_word = (64 / bits) as usize;
        (count + per_word - 1) / per_word
    }

    fn decode(&self, words: &[u64], bits: u32, indices: &mut [u16]) -> Result<(), PaletteError> {
        check_bits(bits)?;
        check_words(words, self.word_count(bits, indices.len()))?;

        let per_word = (64 / bits) as usize;
        let mask = index_mask(bits);

        for (i, index) in indices.iter_mut().enumerate() {
            let word = words[i / per_word];
            let shift = (i % per_word) as u32 * bits;

            *index = ((word >> shift) & mask) as u16;
        }

        Ok(())
    }

    fn encode(&self, indices: &[u16], bits: u32) -> Result<Vec<u64>, PaletteError> {
        check_bits(bits)?;

        let per_word = (64 / bits) as usize;
        let mut words = vec![0u64; self.word_count(bits, indices.len())];

        for (i, &index) in indices.iter().enumerate() {
            let shift = (i % per_word) as u32 * bits;
            words[i / per_word] |= (index as u64 & index_mask(bits)) << shift;
        }

        Ok(words)
    }
}

/// Indices are packed back to back and may continue in the next word.
pub struct ContinuousPacking;

impl BitPacking for ContinuousPacking {
    fn word_count(&self, bits: u32, count: usize) -> usize {
        (count * bits as usize + 63) / 64
    }

    fn decode(&self, words: &[u64], bits: u32, indices: &mut [u16]) -> Result<(), PaletteError> {
        check_bits(bits)?;
        check_words(words, self.word_count(bits, indices.len()))?;

        let mask = index_mask(bits);

        for (i, index) in indices.iter_mut().enumerate() {
            let bit = i * bits as usize;
            let word = bit / 64;
            let offset = (bit % 64) as u32;

            let mut value = words[word] >> offset;

            // Remaining high bits continue at the bottom of the next word.
            if offset + bits > 64 {
                value |= words[word + 1] << (64 - offset);
            }

            *index = (value & mask) as u16;
        }

        Ok(())
    }

    fn encode(&self, indices: &[u16], bits: u32) -> Result<Vec<u64>, PaletteError> {
        check_bits(bits)?;

        let mut words = vec![0u64; self.word_count(bits, indices.len())];

        for (i, &index) in indices.iter().enumerate() {
            let value = index as u64 & index_mask(bits);
            let bit = i * bits as usize;
            let word = bit / 64;
            let offset = (bit % 64) as u32;

            words[word] |= value << offset;

            if offset + bits > 64 {
                words[word + 1] |= value >> (64 - offset);
            }
        }

        Ok(words)
    }
}

/// Wire format revision of packed section indices.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PackingFormat {
    /// Current format, see [`AlignedPacking`].
    Aligned,
    /// Historical format, see [`ContinuousPacking`].
    Continuous,
}

impl PackingFormat {
    pub fn for_data_version(data_version: i32) -> PackingFormat {
        if data_version >= ALIGNED_PACKING_DATA_VERSION {
            PackingFormat::Aligned
        } else {
            PackingFormat::Continuous
        }
    }

    pub fn packing(self) -> &'static dyn BitPacking {
        match self {
            PackingFormat::Aligned => &AlignedPacking,
            PackingFormat::Continuous => &ContinuousPacking,
        }
    }
}

/// Decodes sections referencing a fixed palette of canonical cells.
pub struct PaletteDecoder {
    palette: Vec<Cell>,
    format: PackingFormat,
}

impl PaletteDecoder {
    pub fn new(palette: Vec<Cell>, format: PackingFormat) -> Result<Self, PaletteError> {
        if palette.is_empty() {
            return Err(PaletteError::EmptyPalette);
        }

        Ok(PaletteDecoder { palette, format })
    }

    pub fn palette(&self) -> &[Cell] {
        &self.palette
    }

    pub fn bits(&self) -> u32 {
        bits_per_index(self.palette.len())
    }

    /// Unpacks the raw palette indices of one section.
    pub fn decode_indices(&self, words: &[u64]) -> Result<Vec<u16>, PaletteError> {
        let mut indices = vec![0u16; SECTION_CELLS];
        self.format
            .packing()
            .decode(words, self.bits(), &mut indices)?;

        Ok(indices)
    }

    /// Unpacks one section into canonical cells, in y, z, x nesting order.
    pub fn decode(&self, words: &[u64]) -> Result<Vec<Cell>, PaletteError> {
        let indices = self.decode_indices(words)?;

        indices
            .into_iter()
            .map(|index| {
                self.palette
                    .get(index as usize)
                    .copied()
                    .ok_or(PaletteError::IndexOutOfRange {
                        index: index as usize,
                        palette_length: self.palette.len(),
                    })
            })
            .collect()
    }
}

fn index_mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

fn check_bits(bits: u32) -> Result<(), PaletteError> {
    if bits == 0 || bits > 16 {
        return Err(PaletteError::UnsupportedBitWidth { bits });
    }

    Ok(())
}

fn check_words(words: &[u64], expected: usize) -> Result<(), PaletteError> {
    if words.len() < expected {
        return Err(PaletteError::WordsTooShort {
            expected,
            actual: words.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::cell::Cell;
    use crate::error::PaletteError;
    use crate::palette::{
        bits_per_index, exact_bit_length, AlignedPacking, BitPacking, ContinuousPacking,
        PackingFormat, PaletteDecoder, SECTION_CELLS,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn reference_bit_length(value: u32) -> u32 {
        let mut bits = 0;
        while bits < 32 && (value >> bits) != 0 {
            bits += 1;
        }
        bits
    }

    fn random_indices(palette_length: usize, seed: u64) -> Vec<u16> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..SECTION_CELLS)
            .map(|_| rng.gen_range(0..palette_length) as u16)
            .collect()
    }

    fn palette(length: usize) -> Vec<Cell> {
        (0..length).map(|i| Cell::from_contents(i as u32)).collect()
    }

    /// Packs indices without helpers, one index at a time.
    fn hand_pack_aligned(indices: &[u16], bits: u32) -> Vec<u64> {
        let per_word = 64 / bits as usize;
        let mut words = Vec::new();

        for group in indices.chunks(per_word) {
            let mut word = 0u64;
            for (slot, &index) in group.iter().enumerate() {
                word |= (index as u64) << (slot * bits as usize);
            }
            words.push(word);
        }

        words
    }

    #[test]
    fn test_exact_bit_length_boundaries() {
        let expected = [
            (0, 0),
            (1, 1),
            (2, 2),
            (3, 2),
            (7, 3),
            (8, 4),
            (15, 4),
            (16, 5),
            (255, 8),
            (256, 9),
        ];

        for &(value, bits) in expected.iter() {
            assert_eq!(exact_bit_length(value), bits, "bit length of {}", value);
        }
    }

    #[test]
    fn test_exact_bit_length_matches_reference() {
        for value in (1..70_000).chain(vec![u32::MAX, 1 << 31, (1 << 31) - 1]) {
            assert_eq!(exact_bit_length(value), reference_bit_length(value));
        }
    }

    #[test]
    fn test_bits_per_index() {
        let expected = [(1, 4), (2, 4), (16, 4), (17, 5), (256, 8), (257, 9)];

        for &(length, bits) in expected.iter() {
            assert_eq!(bits_per_index(length), bits, "palette length {}", length);
        }
    }

    #[test]
    fn test_decode_hand_built_words() {
        for (seed, &length) in [1usize, 2, 16, 17, 256].iter().enumerate() {
            let indices = random_indices(length, seed as u64);
            let words = hand_pack_aligned(&indices, bits_per_index(length));

            let decoder = PaletteDecoder::new(palette(length), PackingFormat::Aligned).unwrap();
            let decoded = decoder.decode_indices(&words).unwrap();

            assert_eq!(decoded, indices, "palette length {}", length);
        }
    }

    #[test]
    fn test_aligned_five_bits_wastes_high_bits() {
        // 12 indices of 5 bits per word, top 4 bits unused.
        let indices = random_indices(17, 99);
        let words = AlignedPacking.encode(&indices, 5).unwrap();

        assert_eq!(words.len(), (SECTION_CELLS + 11) / 12);
        assert!(words.iter().all(|word| word >> 60 == 0));
    }

    #[test]
    fn test_continuous_round_trip() {
        for &bits in [4u32, 5, 6, 7, 9, 13].iter() {
            let length = 1usize << bits;
            let indices = random_indices(length, bits as u64);
            let words = ContinuousPacking.encode(&indices, bits).unwrap();

            assert_eq!(words.len(), SECTION_CELLS * bits as usize / 64);

            let mut decoded = vec![0u16; SECTION_CELLS];
            ContinuousPacking
                .decode(&words, bits, &mut decoded)
                .unwrap();

            assert_eq!(decoded, indices, "{} bits", bits);
        }
    }

    #[test]
    fn test_continuous_straddling_index() {
        // Index 12 of 5 bits spans bits 60..65.
        let mut indices = vec![0u16; 13];
        indices[12] = 0b10111;

        let words = ContinuousPacking.encode(&indices, 5).unwrap();

        assert_eq!(words[0] >> 60, 0b0111);
        assert_eq!(words[1] & 1, 1);

        let mut decoded = vec![0u16; 13];
        ContinuousPacking.decode(&words, 5, &mut decoded).unwrap();
        assert_eq!(decoded[12], 0b10111);
    }

    #[test]
    fn test_decode_maps_palette() {
        let palette = vec![Cell::AIR, Cell::from_contents(3), Cell::new(8, 0, 2)];
        let mut indices = vec![0u16; SECTION_CELLS];
        indices[0] = 2;
        indices[4095] = 1;

        let words = AlignedPacking.encode(&indices, 4).unwrap();
        let decoder = PaletteDecoder::new(palette, PackingFormat::Aligned).unwrap();
        let cells = decoder.decode(&words).unwrap();

        assert_eq!(cells[0], Cell::new(8, 0, 2));
        assert_eq!(cells[1], Cell::AIR);
        assert_eq!(cells[4095], Cell::from_contents(3));
    }

    #[test]
    fn test_index_out_of_range() {
        let mut indices = vec![0u16; SECTION_CELLS];
        indices[10] = 9;

        let words = AlignedPacking.encode(&indices, 4).unwrap();
        let decoder = PaletteDecoder::new(palette(3), PackingFormat::Aligned).unwrap();

        assert_eq!(
            decoder.decode(&words).unwrap_err(),
            PaletteError::IndexOutOfRange {
                index: 9,
                palette_length: 3
            }
        );
    }

    #[test]
    fn test_words_too_short() {
        let decoder = PaletteDecoder::new(palette(2), PackingFormat::Aligned).unwrap();

        assert_eq!(
            decoder.decode_indices(&[0u64; 10]).unwrap_err(),
            PaletteError::WordsTooShort {
                expected: 256,
                actual: 10
            }
        );
    }

    #[test]
    fn test_unsupported_bit_width() {
        let packings: [&dyn BitPacking; 2] = [&AlignedPacking, &ContinuousPacking];

        for packing in packings.iter() {
            for &bits in [0u32, 17].iter() {
                assert_eq!(
                    packing.encode(&[1, 2, 3], bits).unwrap_err(),
                    PaletteError::UnsupportedBitWidth { bits }
                );

                let mut indices = [0u16; 3];
                assert_eq!(
                    packing.decode(&[0u64; 4], bits, &mut indices).unwrap_err(),
                    PaletteError::UnsupportedBitWidth { bits }
                );
            }
        }
    }

    #[test]
    fn test_empty_palette() {
        assert_eq!(
            PaletteDecoder::new(Vec::new(), PackingFormat::Aligned).err(),
            Some(PaletteError::EmptyPalette)
        );
    }

    #[test]
    fn test_format_for_data_version() {
        assert_eq!(PackingFormat::for_data_version(2586), PackingFormat::Aligned);
        assert_eq!(PackingFormat::for_data_version(2529), PackingFormat::Aligned);
        assert_eq!(PackingFormat::for_data_version(2230), PackingFormat::Continuous);
    }
}
