//! Conversion of foreign Anvil worlds into the terrain store.

use crate::anvil::{region_files, AnvilRegion, AnvilRegionPosition, ANVIL_REGION_SIDE};
use crate::cell::Cell;
use crate::chunk::VoxelChunk;
use crate::config::ImportConfig;
use crate::error::{ImportError, PaletteError};
use crate::palette::{PackingFormat, PaletteDecoder, SECTION_CELLS};
use crate::position::ChunkPosition;
use crate::store::TerrainStore;
use crate::tag::TagCompound;
use crate::translate::{BlockTranslator, TranslationMisses};
use log::{debug, error, warn};
use rayon::prelude::*;
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const SECTION_SIDE: usize = 16;
const SECTIONS: i32 = 16;
/// Section height used when a section carries no `Y`, always skipped.
const MISSING_SECTION_Y: i8 = 64;
const AIR_NAME: &str = "minecraft:air";

/// Outcome of a single region file import.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct RegionImport {
    pub chunks_converted: usize,
    pub chunks_failed: usize,
}

/// Outcome of a whole world import.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ImportReport {
    pub regions: usize,
    pub regions_failed: usize,
    pub chunks_converted: usize,
    pub chunks_failed: usize,
    /// Foreign block names without translation, sorted.
    pub missing_blocks: Vec<String>,
}

impl Display for ImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} chunks have been converted, {} blocks couldn't be translated",
            self.chunks_converted,
            self.missing_blocks.len()
        )?;

        if !self.missing_blocks.is_empty() {
            write!(f, ": {}", self.missing_blocks.join(", "))?;
        }

        Ok(())
    }
}

/// Translates foreign chunk trees into voxel chunks.
///
/// Shared between import workers; the only mutable state is the miss set.
pub struct ChunkImporter {
    translator: BlockTranslator,
    misses: TranslationMisses,
    parallel: bool,
}

impl ChunkImporter {
    pub fn new(translator: BlockTranslator, config: &ImportConfig) -> Self {
        ChunkImporter {
            translator: translator.with_fallback(config.fallback),
            misses: TranslationMisses::new(),
            parallel: config.parallel,
        }
    }

    pub fn misses(&self) -> &TranslationMisses {
        &self.misses
    }

    /// Fills `chunk` from one foreign chunk tree.
    ///
    /// Returns whether any section was written. The chunk is cleared and
    /// repositioned first, and postcalculated whenever it has sections.
    pub fn import_chunk<T: TagCompound>(
        &self,
        tag: &T,
        chunk: &mut VoxelChunk,
    ) -> Result<bool, PaletteError> {
        chunk.set_position(ChunkPosition::new(tag.int_or("xPos", 0), tag.int_or("zPos", 0)));
        chunk.clear();

        let sections = match tag.compound_list("sections") {
            Some(sections) => sections,
            None => return Ok(false),
        };

        let format = tag
            .int("DataVersion")
            .map_or(PackingFormat::Aligned, PackingFormat::for_data_version);

        let mut modified = false;

        for section in sections {
            modified |= self.import_section(section, format, chunk)?;
        }

        chunk.postcalculate();

        Ok(modified)
    }

    fn import_section<T: TagCompound>(
        &self,
        section: &T,
        format: PackingFormat,
        chunk: &mut VoxelChunk,
    ) -> Result<bool, PaletteError> {
        let section_y = section.byte_or("Y", MISSING_SECTION_Y) as i32;

        if section_y < 0 || section_y >= SECTIONS {
            return Ok(false);
        }

        let block_states = match section.compound("block_states") {
            Some(block_states) => block_states,
            None => return Ok(false),
        };

        let entries = match block_states.compound_list("palette") {
            Some(entries) => entries,
            None => return Ok(false),
        };

        let palette: Vec<Cell> = entries
            .iter()
            .map(|entry| {
                let name = entry.text_or("Name", AIR_NAME);
                self.translator
                    .translate(name, entry.compound("Properties"), &self.misses)
            })
            .collect();

        if palette.len() == 1 && palette[0] == Cell::AIR {
            return Ok(false);
        }

        let base_y = section_y as usize * SECTION_SIDE;

        let cells = match block_states.long_array("data") {
            Some(data) => {
                let words: Vec<u64> = data.iter().map(|word| *word as u64).collect();
                PaletteDecoder::new(palette, format)?.decode(&words)?
            }
            // Uniform section, a lone palette entry needs no indices.
            None if palette.len() == 1 => vec![palette[0]; SECTION_CELLS],
            None => return Ok(false),
        };

        for (index, cell) in cells.into_iter().enumerate() {
            let x = index % SECTION_SIDE;
            let z = (index / SECTION_SIDE) % SECTION_SIDE;
            let y = index / (SECTION_SIDE * SECTION_SIDE);

            chunk.set_cell(x, base_y + y, z, cell);
        }

        Ok(true)
    }

    /// Converts every chunk of one `r.<x>.<z>.mca` file and saves it to `store`.
    ///
    /// Chunks failing to read, decode or save are logged and counted.
    pub fn import_region(
        &self,
        path: &Path,
        store: &TerrainStore,
    ) -> Result<RegionImport, ImportError> {
        let position = AnvilRegionPosition::from_path(path)?;
        let file = BufReader::new(File::open(path)?);
        let mut region = AnvilRegion::load(position, file)?;

        let mut chunk = VoxelChunk::new(ChunkPosition::new(0, 0));
        let mut result = RegionImport::default();

        for region_chunk_x in 0..ANVIL_REGION_SIDE {
            for region_chunk_z in 0..ANVIL_REGION_SIDE {
                if !region.has_chunk(region_chunk_x, region_chunk_z) {
                    continue;
                }

                let tag = match region.read_chunk(region_chunk_x, region_chunk_z) {
                    Ok(tag) => tag,
                    Err(read_error) => {
                        warn!(
                            target: "terrain-store",
                            "Skipping chunk {}, {} of {}: {}",
                            region_chunk_x,
                            region_chunk_z,
                            path.display(),
                            read_error
                        );
                        result.chunks_failed += 1;
                        continue;
                    }
                };

                match self.import_chunk(&tag, &mut chunk) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(palette_error) => {
                        warn!(
                            target: "terrain-store",
                            "Skipping chunk {}, {} of {}: {}",
                            region_chunk_x,
                            region_chunk_z,
                            path.display(),
                            palette_error
                        );
                        result.chunks_failed += 1;
                        continue;
                    }
                }

                match store.save_chunk(&chunk) {
                    Ok(()) => result.chunks_converted += 1,
                    Err(save_error) => {
                        warn!(
                            target: "terrain-store",
                            "{} ({:?} error)", save_error, save_error.kind()
                        );
                        result.chunks_failed += 1;
                    }
                }
            }
        }

        debug!(
            target: "terrain-store",
            "Region x: {}, z: {} imported, {} chunks converted, {} failed",
            position.x,
            position.z,
            result.chunks_converted,
            result.chunks_failed
        );

        Ok(result)
    }

    /// Imports region files one task each, in parallel unless configured otherwise.
    pub fn import_regions(&self, paths: &[PathBuf], store: &TerrainStore) -> ImportReport {
        let import = |path: &PathBuf| {
            let result = self.import_region(path, store);

            if let Err(import_error) = &result {
                error!(
                    target: "terrain-store",
                    "Failed to import region file {}: {}",
                    path.display(),
                    import_error
                );
            }

            result
        };

        let results: Vec<_> = if self.parallel {
            paths.par_iter().map(import).collect()
        } else {
            paths.iter().map(import).collect()
        };

        let mut report = ImportReport {
            regions: paths.len(),
            ..Default::default()
        };

        for result in results {
            match result {
                Ok(region) => {
                    report.chunks_converted += region.chunks_converted;
                    report.chunks_failed += region.chunks_failed;
                }
                Err(_) => report.regions_failed += 1,
            }
        }

        report.missing_blocks = self.misses.names();
        report
    }

    /// Imports every `r.<x>.<z>.mca` file of a folder.
    pub fn import_folder(
        &self,
        folder: &Path,
        store: &TerrainStore,
    ) -> Result<ImportReport, ImportError> {
        let paths: Vec<_> = region_files(folder)?
            .into_iter()
            .map(|(_, path)| path)
            .collect();

        Ok(self.import_regions(&paths, store))
    }
}
