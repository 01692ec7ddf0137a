//! File splitting and content identification.

use super::types::{FileId, MAX_CHUNK_SIZE};

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// A file cut into ordered chunk payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFile {
    pub file_id: FileId,
    pub chunks: Vec<Vec<u8>>,
}

pub fn file_id_for(data: &[u8]) -> FileId {
    FileId(hex::encode(Sha256::digest(data)))
}

pub fn split_file(path: impl AsRef<Path>) -> io::Result<SplitFile> {
    let data = std::fs::read(path)?;
    Ok(split_bytes(&data))
}

/// Splits `data` into `MAX_CHUNK_SIZE` pieces. A length that is an exact multiple of the
/// chunk size (an empty file included) gets a trailing zero-length chunk so the receiver
/// can tell the file ended.
pub fn split_bytes(data: &[u8]) -> SplitFile {
    let mut chunks: Vec<Vec<u8>> = data.chunks(MAX_CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    if data.len() % MAX_CHUNK_SIZE == 0 {
        chunks.push(Vec::new());
    }

    SplitFile {
        file_id: file_id_for(data),
        chunks,
    }
}
