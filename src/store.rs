use crate::chunk::VoxelChunk;
use crate::codec::ChunkCodec;
use crate::config::{StorageBackend, StoreConfig};
use crate::error::{ChunkLoadError, ChunkSaveError, StorageError};
use crate::linked::LinkedFileStorage;
use crate::position::ChunkPosition;
use crate::region::RegionFileStorage;
use log::debug;

/// Persists opaque chunk payloads keyed by chunk position.
///
/// Implementations must accept concurrent calls for different regions.
pub trait ChunkStorage: Send + Sync {
    /// Returns stored payload, `None` when the chunk was never saved.
    fn load(&self, position: ChunkPosition) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores payload replacing any previous one.
    fn save(&self, position: ChunkPosition, payload: &[u8]) -> Result<(), StorageError>;
}

/// Chunk codec over one of the storage back-ends.
pub struct TerrainStore {
    storage: Box<dyn ChunkStorage>,
    codec: ChunkCodec,
}

impl TerrainStore {
    pub fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        let storage: Box<dyn ChunkStorage> = match config.backend {
            StorageBackend::RegionFiles => Box::new(RegionFileStorage::open(config)?),
            StorageBackend::LinkedFile { node_size } => {
                Box::new(LinkedFileStorage::open(config, node_size)?)
            }
        };

        debug!(
            target: "terrain-store",
            "Opened terrain store in {} ({:?})",
            config.directory.display(),
            config.backend
        );

        Ok(TerrainStore::new(storage, ChunkCodec::default()))
    }

    pub fn new(storage: Box<dyn ChunkStorage>, codec: ChunkCodec) -> Self {
        TerrainStore { storage, codec }
    }

    pub fn storage(&self) -> &dyn ChunkStorage {
        self.storage.as_ref()
    }

    pub fn save_chunk(&self, chunk: &VoxelChunk) -> Result<(), ChunkSaveError> {
        let position = chunk.position();

        let payload = self
            .codec
            .encode(chunk)
            .map_err(|codec_error| ChunkSaveError::Codec {
                position,
                codec_error,
            })?;

        self.storage
            .save(position, &payload)
            .map_err(|storage_error| ChunkSaveError::Storage {
                position,
                storage_error,
            })
    }

    /// Fills `chunk` with the stored chunk at its position.
    ///
    /// Returns `false` and leaves `chunk` untouched when nothing is stored.
    pub fn load_chunk(&self, chunk: &mut VoxelChunk) -> Result<bool, ChunkLoadError> {
        let position = chunk.position();

        let payload = match self.storage.load(position) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(false),
            Err(storage_error) => {
                return Err(ChunkLoadError::Storage {
                    position,
                    storage_error,
                })
            }
        };

        self.codec
            .decode_into(&payload, chunk)
            .map_err(|codec_error| ChunkLoadError::Codec {
                position,
                codec_error,
            })?;

        Ok(true)
    }
}
