//! GRF binary format implementation.
//!
//! A fixed-size header (magic, version, flags, counts, payload length) is
//! followed by the JSON-serialized map archive and a SHA-256 hash of
//! everything before it.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use graft_core::{Map, MapArchive, ModelError, NodeRegistry};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Magic bytes identifying a GRF file: "GRF\0"
pub const MAGIC: [u8; 4] = [0x47, 0x52, 0x46, 0x00];

/// 4 (magic) + 3 (version) + 1 (flags) + 8*4 (counts + payload_len)
const HEADER_SIZE: usize = 40;

const HASH_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("invalid magic bytes: expected GRF\\0")]
    InvalidMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(FileVersion),

    #[error("content hash mismatch: file is corrupted")]
    HashMismatch,

    #[error("file too small to be a valid GRF file")]
    FileTooSmall,

    #[error("header counts disagree with the payload: {0}")]
    CountMismatch(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FileVersion {
    pub const CURRENT: FileVersion = FileVersion {
        major: 0,
        minor: 1,
        patch: 0,
    };

    /// Same major version and no newer minor version than this build reads.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major && self.minor <= Self::CURRENT.minor
    }
}

impl std::fmt::Display for FileVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Summary bits describing what the archived map contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFlags {
    bits: u8,
}

impl FileFlags {
    pub const NONE: FileFlags = FileFlags { bits: 0 };

    /// Some node keeps state between computations.
    pub const HAS_STATE: u8 = 0x01;

    /// Some node links precompiled code.
    pub const HAS_PRECOMPILED_IR: u8 = 0x02;

    pub fn new(bits: u8) -> Self {
        Self { bits }
    }

    pub fn has(&self, flag: u8) -> bool {
        self.bits & flag != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.bits |= flag;
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }
}

/// A GRF file: header metadata plus the archived map.
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub version: FileVersion,
    pub flags: FileFlags,
    pub map_archive: MapArchive,
}

impl ModelFile {
    /// Archive `map`, deriving the flags from its nodes.
    pub fn new(map: &Map) -> Result<Self, FileError> {
        let mut flags = FileFlags::NONE;
        for node in map.model().nodes() {
            if node.has_state() {
                flags.set(FileFlags::HAS_STATE);
            }
            if node
                .as_compilable()
                .is_some_and(|compilable| compilable.has_precompiled_ir())
            {
                flags.set(FileFlags::HAS_PRECOMPILED_IR);
            }
        }
        Ok(Self {
            version: FileVersion::CURRENT,
            flags,
            map_archive: map.to_archive()?,
        })
    }

    /// Rebuild the map, creating nodes through `registry`.
    pub fn into_map(&self, registry: &NodeRegistry) -> Result<Map, FileError> {
        Ok(Map::from_archive(&self.map_archive, registry)?)
    }

    fn counts(&self) -> [u64; 3] {
        [
            self.map_archive.model.nodes.len() as u64,
            self.map_archive.inputs.len() as u64,
            self.map_archive.outputs.len() as u64,
        ]
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), FileError> {
        let payload = serde_json::to_vec(&self.map_archive)?;
        let mut hasher = Sha256::new();

        writer.write_all(&MAGIC)?;
        hasher.update(MAGIC);

        let version_bytes = [self.version.major, self.version.minor, self.version.patch];
        writer.write_all(&version_bytes)?;
        hasher.update(version_bytes);

        writer.write_all(&[self.flags.bits()])?;
        hasher.update([self.flags.bits()]);

        let [node_count, input_count, output_count] = self.counts();
        for val in [node_count, input_count, output_count, payload.len() as u64] {
            let bytes = val.to_le_bytes();
            writer.write_all(&bytes)?;
            hasher.update(bytes);
        }

        writer.write_all(&payload)?;
        hasher.update(&payload);

        let hash: [u8; HASH_SIZE] = hasher.finalize().into();
        writer.write_all(&hash)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FileError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FileError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FileError> {
        if data.len() < HEADER_SIZE + HASH_SIZE {
            return Err(FileError::FileTooSmall);
        }
        if data[0..4] != MAGIC {
            return Err(FileError::InvalidMagic);
        }

        let version = FileVersion {
            major: data[4],
            minor: data[5],
            patch: data[6],
        };
        if !version.is_compatible() {
            return Err(FileError::UnsupportedVersion(version));
        }
        let flags = FileFlags::new(data[7]);

        let counts = [read_u64(data, 8), read_u64(data, 16), read_u64(data, 24)];
        let payload_end = usize::try_from(read_u64(data, 32))
            .ok()
            .and_then(|len| len.checked_add(HEADER_SIZE))
            .filter(|end| end.checked_add(HASH_SIZE).is_some_and(|size| size <= data.len()))
            .ok_or(FileError::FileTooSmall)?;

        let stored_hash = &data[payload_end..payload_end + HASH_SIZE];
        let computed_hash: [u8; HASH_SIZE] = Sha256::digest(&data[..payload_end]).into();
        if computed_hash[..] != *stored_hash {
            return Err(FileError::HashMismatch);
        }

        let map_archive: MapArchive = serde_json::from_slice(&data[HEADER_SIZE..payload_end])?;
        let file = Self {
            version,
            flags,
            map_archive,
        };
        for (name, (stored, actual)) in ["node", "input", "output"]
            .into_iter()
            .zip(counts.into_iter().zip(file.counts()))
        {
            if stored != actual {
                return Err(FileError::CountMismatch(name));
            }
        }
        Ok(file)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FileError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        debug!(path = %path.display(), nodes = self.map_archive.model.nodes.len(), "saved map");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let path = path.as_ref();
        let file = Self::read_from(&mut BufReader::new(File::open(path)?))?;
        debug!(path = %path.display(), version = %file.version, "loaded map");
        Ok(file)
    }
}

/// Little-endian u64 at `offset`; callers have checked the length.
fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{InputNode, Model, OutputNode};

    fn sample_map() -> Map {
        let mut model = Model::new();
        let input = model.add_node(InputNode::<f64>::new(3)).unwrap().output().elements();
        let out = model.add_node(OutputNode::new(input)).unwrap().output().elements();
        Map::with_inputs(model, vec![("out".into(), out.into_base())]).unwrap()
    }

    fn sample_bytes() -> Vec<u8> {
        ModelFile::new(&sample_map()).unwrap().to_bytes().unwrap()
    }

    #[test]
    fn round_trip() {
        let bytes = sample_bytes();
        let loaded = ModelFile::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.version, FileVersion::CURRENT);
        assert_eq!(loaded.flags, FileFlags::NONE);
        assert_eq!(loaded.map_archive.model.nodes.len(), 2);
        assert_eq!(read_u64(&bytes, 8), 2);
        assert_eq!(read_u64(&bytes, 16), 1);
        assert_eq!(read_u64(&bytes, 24), 1);

        let map = loaded.into_map(&NodeRegistry::with_core_nodes()).unwrap();
        let out: Vec<f64> = map.compute_single(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = sample_bytes();
        bytes[0] = 0xFF;
        assert!(matches!(ModelFile::from_bytes(&bytes), Err(FileError::InvalidMagic)));
    }

    #[test]
    fn newer_minor_version_rejected() {
        let mut bytes = sample_bytes();
        bytes[5] = FileVersion::CURRENT.minor + 1;
        let err = ModelFile::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, FileError::UnsupportedVersion(v) if v.minor == 2));
        assert_eq!(err.to_string(), "unsupported format version 0.2.0");
    }

    #[test]
    fn corrupted_payload_rejected() {
        let mut bytes = sample_bytes();
        bytes[HEADER_SIZE + 10] ^= 0xFF;
        assert!(matches!(ModelFile::from_bytes(&bytes), Err(FileError::HashMismatch)));
    }

    #[test]
    fn corrupted_count_rejected() {
        let mut bytes = sample_bytes();
        bytes[8] ^= 0x01;
        assert!(matches!(ModelFile::from_bytes(&bytes), Err(FileError::HashMismatch)));
    }

    #[test]
    fn truncated_file_rejected() {
        assert!(matches!(ModelFile::from_bytes(&MAGIC), Err(FileError::FileTooSmall)));

        let bytes = sample_bytes();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(ModelFile::from_bytes(truncated), Err(FileError::FileTooSmall)));
    }

    #[test]
    fn oversized_payload_length_rejected() {
        let mut bytes = sample_bytes();
        bytes[32..40].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(ModelFile::from_bytes(&bytes), Err(FileError::FileTooSmall)));
    }

    #[test]
    fn flags_operations() {
        let mut flags = FileFlags::NONE;
        assert!(!flags.has(FileFlags::HAS_STATE));
        flags.set(FileFlags::HAS_PRECOMPILED_IR);
        assert!(flags.has(FileFlags::HAS_PRECOMPILED_IR));
        assert!(!flags.has(FileFlags::HAS_STATE));
        assert_eq!(flags.bits(), 0x02);
    }

    #[test]
    fn write_and_read_via_io() {
        let file = ModelFile::new(&sample_map()).unwrap();
        let mut buf = Vec::new();
        file.write_to(&mut buf).unwrap();
        let loaded = ModelFile::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded.map_archive, file.map_archive);
    }
}
