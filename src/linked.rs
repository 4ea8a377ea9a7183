//! Single file chunk storage built from fixed-size linked nodes.
//!
//! ```text
//! offset 0       magic 0xDEADBE00 (big-endian)
//! offset 4       node size (i32)
//! offset 8       free list head (i32, -1 = none)
//! offset 12      65536 x (chunk x, chunk z, start node), i32 each, start -1 = unused
//! offset 786444  nodes: magic 0xDEADCE00 (big-endian), header word (i32), data
//! ```
//!
//! Header word of the last node of a chain is `(data size << 1) | 1`, every
//! other node is full and stores `(next - (node + 1)) << 1`.

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::position::ChunkPosition;
use crate::region::{SeekExt, SeekWriteExt};
use crate::store::ChunkStorage;
use bitvec::prelude::*;
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LINKED_FILE_NAME: &str = "Chunks32fs.dat";
const FILE_MAGIC: u32 = 0xDEAD_BE00;
const NODE_MAGIC: u32 = 0xDEAD_CE00;
const FREE_NODE_OFFSET: u64 = 8;
const DESCRIPTORS_OFFSET: u64 = 12;
/// Amount of chunk descriptors in header.
pub const DESCRIPTORS: usize = 65536;
const DESCRIPTOR_LENGTH: u64 = 12;
/// File header length in bytes.
pub const LINKED_HEADER_LENGTH: u64 = DESCRIPTORS_OFFSET + DESCRIPTORS as u64 * DESCRIPTOR_LENGTH;
const NODE_HEADER_LENGTH: i32 = 8;
pub const MINIMUM_NODE_SIZE: i32 = 64;
pub const MAXIMUM_NODE_SIZE: i32 = 65536;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Descriptor {
    /// Slot in the descriptor table.
    index: usize,
    start_node: i32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Node {
    data_size: i32,
    next: Option<i32>,
}

/// Node accounting produced by [`LinkedFileStorage::verify`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeUsage {
    pub total: usize,
    /// Nodes holding chunk data.
    pub used: usize,
    /// Nodes on the free list.
    pub free: usize,
}

impl NodeUsage {
    /// Nodes reachable from neither a chunk nor the free list.
    pub fn orphaned(&self) -> usize {
        self.total - self.used - self.free
    }
}

pub(crate) struct LinkedFile<S> {
    source: S,
    node_size: i32,
    free_node: i32,
    descriptors: HashMap<ChunkPosition, Descriptor>,
    next_descriptor: usize,
}

fn check_node_size(node_size: i32) -> Result<(), StorageError> {
    if node_size < MINIMUM_NODE_SIZE || node_size > MAXIMUM_NODE_SIZE {
        return Err(StorageError::InvalidNodeSize { node_size });
    }

    Ok(())
}

impl<S: Read + Write + Seek> LinkedFile<S> {
    /// Reads the header, initializing an empty source first.
    pub(crate) fn open(mut source: S, node_size: i32) -> Result<Self, StorageError> {
        if source.len()? == 0 {
            Self::write_empty_header(&mut source, node_size)?;
        }

        let mut header = vec![0u8; LINKED_HEADER_LENGTH as usize];
        source.seek(SeekFrom::Start(0))?;

        match source.read_exact(&mut header) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(StorageError::InvalidFileMagic)
            }
            Err(error) => return Err(error.into()),
        }

        let mut cursor = Cursor::new(header);

        if cursor.read_u32::<BigEndian>()? != FILE_MAGIC {
            return Err(StorageError::InvalidFileMagic);
        }

        let node_size = cursor.read_i32::<LittleEndian>()?;
        check_node_size(node_size)?;

        let free_node = cursor.read_i32::<LittleEndian>()?;
        let mut descriptors = HashMap::new();
        let mut next_descriptor = 0;

        for index in 0..DESCRIPTORS {
            let x = cursor.read_i32::<LittleEndian>()?;
            let z = cursor.read_i32::<LittleEndian>()?;
            let start_node = cursor.read_i32::<LittleEndian>()?;

            if start_node >= 0 {
                descriptors.insert(ChunkPosition::new(x, z), Descriptor { index, start_node });
                next_descriptor = index + 1;
            }
        }

        Ok(LinkedFile {
            source,
            node_size,
            free_node,
            descriptors,
            next_descriptor,
        })
    }

    fn write_empty_header(source: &mut S, node_size: i32) -> Result<(), StorageError> {
        check_node_size(node_size)?;

        let mut header = Vec::with_capacity(LINKED_HEADER_LENGTH as usize);
        header.write_u32::<BigEndian>(FILE_MAGIC)?;
        header.write_i32::<LittleEndian>(node_size)?;
        header.write_i32::<LittleEndian>(-1)?;

        for _ in 0..DESCRIPTORS {
            header.write_i32::<LittleEndian>(0)?;
            header.write_i32::<LittleEndian>(0)?;
            header.write_i32::<LittleEndian>(-1)?;
        }

        source.seek(SeekFrom::Start(0))?;
        source.write_all(&header)?;

        Ok(())
    }

    fn node_data_size(&self) -> i32 {
        self.node_size - NODE_HEADER_LENGTH
    }

    fn node_count(&mut self) -> Result<i32, StorageError> {
        let len = self.source.len()?;

        Ok((len.saturating_sub(LINKED_HEADER_LENGTH) / self.node_size as u64) as i32)
    }

    fn seek_node(&mut self, node: i32) -> Result<(), StorageError> {
        if node < 0 || node >= self.node_count()? {
            return Err(StorageError::InvalidNode { node });
        }

        let offset = LINKED_HEADER_LENGTH + node as u64 * self.node_size as u64;
        self.source.seek(SeekFrom::Start(offset))?;

        Ok(())
    }

    /// Reads node header, appending its data to `data` when given.
    fn read_node(&mut self, node: i32, data: Option<&mut Vec<u8>>) -> Result<Node, StorageError> {
        self.seek_node(node)?;

        if self.source.read_u32::<BigEndian>()? != NODE_MAGIC {
            return Err(StorageError::InvalidNodeMagic { node });
        }

        let header = self.source.read_i32::<LittleEndian>()?;

        let parsed = if header & 1 != 0 {
            let data_size = header >> 1;

            if data_size < 0 || data_size > self.node_data_size() {
                return Err(StorageError::InvalidNode { node });
            }

            Node {
                data_size,
                next: None,
            }
        } else {
            Node {
                data_size: self.node_data_size(),
                next: Some(node + 1 + (header >> 1)),
            }
        };

        if let Some(data) = data {
            let start = data.len();
            data.resize(start + parsed.data_size as usize, 0);
            self.source.read_exact(&mut data[start..])?;
        }

        Ok(parsed)
    }

    fn write_node(&mut self, node: i32, data: &[u8], next: Option<i32>) -> Result<(), StorageError> {
        self.seek_node(node)?;

        let header = match next {
            Some(next) => (next - (node + 1)) << 1,
            None => ((data.len() as i32) << 1) | 1,
        };

        self.source.write_u32::<BigEndian>(NODE_MAGIC)?;
        self.source.write_i32::<LittleEndian>(header)?;
        self.source.write_all(data)?;

        Ok(())
    }

    fn set_free_node(&mut self, free_node: Option<i32>) -> Result<(), StorageError> {
        let free_node = free_node.unwrap_or(-1);

        self.source.seek(SeekFrom::Start(FREE_NODE_OFFSET))?;
        self.source.write_i32::<LittleEndian>(free_node)?;
        self.free_node = free_node;

        Ok(())
    }

    fn free_list_head(&self) -> Option<i32> {
        if self.free_node >= 0 {
            Some(self.free_node)
        } else {
            None
        }
    }

    fn write_descriptor(
        &mut self,
        position: ChunkPosition,
        descriptor: Descriptor,
    ) -> Result<(), StorageError> {
        let offset = DESCRIPTORS_OFFSET + descriptor.index as u64 * DESCRIPTOR_LENGTH;

        self.source.seek(SeekFrom::Start(offset))?;
        self.source.write_i32::<LittleEndian>(position.x)?;
        self.source.write_i32::<LittleEndian>(position.z)?;
        self.source.write_i32::<LittleEndian>(descriptor.start_node)?;

        Ok(())
    }

    /// Takes `count` nodes from the head of the free list, growing the file
    /// by the missing ones. The returned nodes stay linked in order.
    fn collect_free_nodes(&mut self, count: usize) -> Result<Vec<i32>, StorageError> {
        let mut nodes = Vec::with_capacity(count);
        let mut next = self.free_list_head();

        while let Some(node) = next {
            if nodes.len() >= count {
                break;
            }

            nodes.push(node);
            next = self.read_node(node, None)?.next;
        }

        if nodes.len() < count {
            let missing = (count - nodes.len()) as i32;
            let first_new = self.node_count()?;
            let last_new = first_new + missing - 1;

            let len = LINKED_HEADER_LENGTH + (last_new as u64 + 1) * self.node_size as u64;
            self.source.extend_len(len)?;
            self.write_node(last_new, &[], None)?;

            match nodes.last() {
                Some(&tail) => self.write_node(tail, &[], Some(first_new))?,
                None => self.set_free_node(Some(first_new))?,
            }

            debug!(
                target: "terrain-store",
                "Extended chunks file by {} nodes", missing
            );

            nodes.extend(first_new..=last_new);
        }

        Ok(nodes)
    }

    fn find_last_node(&mut self, start_node: i32) -> Result<i32, StorageError> {
        let limit = self.node_count()?;
        let mut node = start_node;

        for _ in 0..limit {
            match self.read_node(node, None)?.next {
                Some(next) => node = next,
                None => return Ok(node),
            }
        }

        Err(StorageError::CrossLinkedNode { node })
    }

    pub(crate) fn load(&mut self, position: ChunkPosition) -> Result<Option<Vec<u8>>, StorageError> {
        let descriptor = match self.descriptors.get(&position) {
            Some(descriptor) => *descriptor,
            None => return Ok(None),
        };

        let limit = self.node_count()?;
        let mut payload = Vec::new();
        let mut node = descriptor.start_node;

        for _ in 0..limit {
            match self.read_node(node, Some(&mut payload))?.next {
                Some(next) => node = next,
                None => return Ok(Some(payload)),
            }
        }

        Err(StorageError::CrossLinkedNode { node })
    }

    pub(crate) fn save(&mut self, position: ChunkPosition, payload: &[u8]) -> Result<(), StorageError> {
        let existing = self.descriptors.get(&position).copied();

        if existing.is_none() && self.next_descriptor >= DESCRIPTORS {
            return Err(StorageError::DescriptorTableFull);
        }

        let data_size = self.node_data_size() as usize;
        let count = ((payload.len() + data_size - 1) / data_size).max(1);

        let nodes = self.collect_free_nodes(count)?;
        let first = nodes[0];
        let last = nodes[nodes.len() - 1];
        let remaining = self.read_node(last, None)?.next;

        for (i, node) in nodes.iter().enumerate() {
            let start = (i * data_size).min(payload.len());
            let end = (start + data_size).min(payload.len());

            self.write_node(*node, &payload[start..end], nodes.get(i + 1).copied())?;
        }

        let descriptor = match existing {
            None => {
                self.set_free_node(remaining)?;

                let descriptor = Descriptor {
                    index: self.next_descriptor,
                    start_node: first,
                };
                self.next_descriptor += 1;
                descriptor
            }
            Some(descriptor) => {
                // Old chain goes in front of the remaining free list.
                let old_last = self.find_last_node(descriptor.start_node)?;
                self.write_node(old_last, &[], remaining)?;
                self.set_free_node(Some(descriptor.start_node))?;

                Descriptor {
                    start_node: first,
                    ..descriptor
                }
            }
        };

        self.write_descriptor(position, descriptor)?;
        self.descriptors.insert(position, descriptor);

        Ok(())
    }

    /// Marks every node of the chain, failing on a node already marked.
    fn mark_chain(&mut self, start_node: i32, marked: &mut BitVec) -> Result<usize, StorageError> {
        let mut node = Some(start_node);
        let mut length = 0;

        while let Some(current) = node {
            let index = current as usize;

            if current < 0 || index >= marked.len() {
                return Err(StorageError::InvalidNode { node: current });
            }

            if marked[index] {
                return Err(StorageError::CrossLinkedNode { node: current });
            }

            marked.set(index, true);
            length += 1;
            node = self.read_node(current, None)?.next;
        }

        Ok(length)
    }

    pub(crate) fn verify(&mut self) -> Result<NodeUsage, StorageError> {
        let total = self.node_count()? as usize;
        let mut marked = bitvec![0; total];

        let starts: Vec<_> = self
            .descriptors
            .values()
            .map(|descriptor| descriptor.start_node)
            .collect();

        let mut used = 0;

        for start in starts {
            used += self.mark_chain(start, &mut marked)?;
        }

        let free = match self.free_list_head() {
            Some(head) => self.mark_chain(head, &mut marked)?,
            None => 0,
        };

        Ok(NodeUsage { total, used, free })
    }
}

/// Chunk storage keeping every chunk in one `Chunks32fs.dat<suffix>` file.
///
/// All calls are serialized on one lock.
pub struct LinkedFileStorage {
    path: PathBuf,
    file: Mutex<LinkedFile<File>>,
}

impl LinkedFileStorage {
    /// Opens or creates the store file, `node_size` applies to new files only.
    pub fn open(config: &StoreConfig, node_size: i32) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.directory)?;

        let path = config
            .directory
            .join(format!("{}{}", LINKED_FILE_NAME, config.suffix));
        let fresh = !path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file = match LinkedFile::open(file, node_size) {
            Ok(file) => file,
            Err(error) => {
                if fresh {
                    let _ = fs::remove_file(&path);
                }
                return Err(error);
            }
        };

        debug!(
            target: "terrain-store",
            "Opened chunks file {} with {} chunks, node size {}",
            path.display(),
            file.descriptors.len(),
            file.node_size
        );

        Ok(LinkedFileStorage {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_size(&self) -> i32 {
        self.file.lock().node_size
    }

    /// Walks every chunk chain and the free list.
    ///
    /// Fails when a node is reachable twice or a chain is broken.
    pub fn verify(&self) -> Result<NodeUsage, StorageError> {
        self.file.lock().verify()
    }
}

impl ChunkStorage for LinkedFileStorage {
    fn load(&self, position: ChunkPosition) -> Result<Option<Vec<u8>>, StorageError> {
        self.file.lock().load(position)
    }

    fn save(&self, position: ChunkPosition, payload: &[u8]) -> Result<(), StorageError> {
        self.file.lock().save(position, payload)
    }
}
