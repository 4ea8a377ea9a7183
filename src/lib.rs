//! Voxel terrain persistence: packed cells, chunk payload codec, region file
//! storage and import of foreign Anvil worlds.

pub mod anvil;
pub mod cell;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod error;
pub mod import;
pub mod linked;
pub mod palette;
pub mod position;
pub mod region;
pub mod store;
pub mod tag;
pub mod translate;

pub use crate::cell::{Cell, Shaft};
pub use crate::chunk::VoxelChunk;
pub use crate::codec::ChunkCodec;
pub use crate::config::{ImportConfig, StorageBackend, StoreConfig};
pub use crate::error::ErrorKind;
pub use crate::import::{ChunkImporter, ImportReport};
pub use crate::position::ChunkPosition;
pub use crate::store::{ChunkStorage, TerrainStore};
pub use crate::translate::BlockTranslator;
