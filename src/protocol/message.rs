use crate::network::types::{Channel, PeerId};
use crate::storage::types::{ChunkKey, FileId, MAX_CHUNK_SIZE};

use std::fmt;
use thiserror::Error;

pub const CRLF: &str = "\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Highest replication degree a PUTCHUNK may ask for.
pub const MAX_DESIRED_DEGREE: u32 = 9;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("header is not terminated by an empty line")]
    MissingTerminator,

    #[error("header is not ASCII")]
    NotAscii,

    #[error("missing {0} field")]
    MissingField(&'static str),

    #[error("unknown message type {0:?}")]
    UnknownType(String),

    #[error("unknown protocol version {0:?}")]
    UnknownVersion(String),

    #[error("malformed file id {0:?}")]
    InvalidFileId(String),

    #[error("malformed {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unexpected trailing field {0:?}")]
    UnexpectedField(String),

    #[error("desired degree {0} is outside 1..=9")]
    InvalidDegree(u32),

    #[error("payload of {0} bytes exceeds the chunk size")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// `1.0`
    Base,
    /// `2.0`: suppression window, delete acknowledgements, direct-delivery announcements.
    Enhanced,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Base => "1.0",
            Version::Enhanced => "2.0",
        }
    }

    fn parse(text: &str) -> Result<Self, ProtocolError> {
        match text {
            "1.0" => Ok(Version::Base),
            "2.0" => Ok(Version::Enhanced),
            other => Err(ProtocolError::UnknownVersion(other.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    PutChunk {
        index: u32,
        desired_degree: u32,
        payload: Vec<u8>,
    },
    Stored {
        index: u32,
    },
    GetChunk {
        index: u32,
        /// Port of the requester's direct channel, when it wants a point-to-point reply.
        callback_port: Option<u16>,
    },
    /// `payload == None` announces that the chunk went out on the direct channel.
    Chunk {
        index: u32,
        payload: Option<Vec<u8>>,
    },
    Delete,
    Removed {
        index: u32,
    },
    DeletedChunk {
        index: u32,
    },
}

impl Body {
    pub fn type_name(&self) -> &'static str {
        match self {
            Body::PutChunk { .. } => "PUTCHUNK",
            Body::Stored { .. } => "STORED",
            Body::GetChunk { .. } => "GETCHUNK",
            Body::Chunk { .. } => "CHUNK",
            Body::Delete => "DELETE",
            Body::Removed { .. } => "REMOVED",
            Body::DeletedChunk { .. } => "DELETEDCHUNK",
        }
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            Body::PutChunk { index, .. }
            | Body::Stored { index }
            | Body::GetChunk { index, .. }
            | Body::Chunk { index, .. }
            | Body::Removed { index }
            | Body::DeletedChunk { index } => Some(*index),
            Body::Delete => None,
        }
    }

    /// Group channel this message type is sent on.
    pub fn channel(&self) -> Channel {
        match self {
            Body::PutChunk { .. } => Channel::Push,
            Body::Chunk { .. } => Channel::Pull,
            _ => Channel::Control,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: Version,
    pub sender: PeerId,
    pub file_id: FileId,
    pub body: Body,
}

impl Message {
    pub fn put_chunk(
        version: Version,
        sender: PeerId,
        key: &ChunkKey,
        desired_degree: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self::new(
            version,
            sender,
            key.file_id.clone(),
            Body::PutChunk {
                index: key.index,
                desired_degree,
                payload,
            },
        )
    }

    pub fn stored(version: Version, sender: PeerId, key: &ChunkKey) -> Self {
        Self::new(version, sender, key.file_id.clone(), Body::Stored { index: key.index })
    }

    pub fn get_chunk(
        version: Version,
        sender: PeerId,
        key: &ChunkKey,
        callback_port: Option<u16>,
    ) -> Self {
        Self::new(
            version,
            sender,
            key.file_id.clone(),
            Body::GetChunk {
                index: key.index,
                callback_port,
            },
        )
    }

    /// A CHUNK carrying data. Always tagged `1.0`, so that a zero-length chunk is never
    /// read as a direct-delivery announcement.
    pub fn chunk(sender: PeerId, key: &ChunkKey, payload: Vec<u8>) -> Self {
        Self::new(
            Version::Base,
            sender,
            key.file_id.clone(),
            Body::Chunk {
                index: key.index,
                payload: Some(payload),
            },
        )
    }

    /// Tells other holders that `key` was delivered on the direct channel.
    pub fn chunk_announcement(sender: PeerId, key: &ChunkKey) -> Self {
        Self::new(
            Version::Enhanced,
            sender,
            key.file_id.clone(),
            Body::Chunk {
                index: key.index,
                payload: None,
            },
        )
    }

    pub fn delete(version: Version, sender: PeerId, file_id: FileId) -> Self {
        Self::new(version, sender, file_id, Body::Delete)
    }

    pub fn removed(version: Version, sender: PeerId, key: &ChunkKey) -> Self {
        Self::new(version, sender, key.file_id.clone(), Body::Removed { index: key.index })
    }

    pub fn deleted_chunk(version: Version, sender: PeerId, key: &ChunkKey) -> Self {
        Self::new(
            version,
            sender,
            key.file_id.clone(),
            Body::DeletedChunk { index: key.index },
        )
    }

    fn new(version: Version, sender: PeerId, file_id: FileId, body: Body) -> Self {
        Self {
            version,
            sender,
            file_id,
            body,
        }
    }

    /// The chunk this message is about, if it names one.
    pub fn chunk_key(&self) -> Option<ChunkKey> {
        self.body
            .index()
            .map(|index| ChunkKey::new(self.file_id.clone(), index))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut header = format!(
            "{} {} {} {}",
            self.body.type_name(),
            self.version,
            self.sender,
            self.file_id
        );

        let mut payload: &[u8] = &[];
        match &self.body {
            Body::PutChunk {
                index,
                desired_degree,
                payload: data,
            } => {
                header.push_str(&format!(" {} {}", index, desired_degree));
                payload = data.as_slice();
            }
            Body::GetChunk {
                index,
                callback_port,
            } => {
                header.push_str(&format!(" {}", index));
                if let Some(port) = callback_port {
                    header.push_str(&format!(" {}", port));
                }
            }
            Body::Chunk {
                index,
                payload: data,
            } => {
                header.push_str(&format!(" {}", index));
                if let Some(data) = data {
                    payload = data.as_slice();
                }
            }
            Body::Stored { index } | Body::Removed { index } | Body::DeletedChunk { index } => {
                header.push_str(&format!(" {}", index));
            }
            Body::Delete => {}
        }

        header.push_str(CRLF);
        header.push_str(CRLF);

        let mut bytes = header.into_bytes();
        bytes.extend_from_slice(payload);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let split = bytes
            .windows(HEADER_END.len())
            .position(|window| window == HEADER_END)
            .ok_or(ProtocolError::MissingTerminator)?;
        let header = &bytes[..split];
        let payload = &bytes[split + HEADER_END.len()..];

        if !header.is_ascii() {
            return Err(ProtocolError::NotAscii);
        }
        let header = std::str::from_utf8(header).map_err(|_| ProtocolError::NotAscii)?;
        let mut fields = header.split_whitespace();

        let kind = fields.next().ok_or(ProtocolError::MissingField("type"))?;
        let version = Version::parse(fields.next().ok_or(ProtocolError::MissingField("version"))?)?;
        let sender = PeerId(
            fields
                .next()
                .ok_or(ProtocolError::MissingField("sender"))?
                .to_string(),
        );
        let file_id = fields.next().ok_or(ProtocolError::MissingField("file id"))?;
        if !FileId::is_well_formed(file_id) {
            return Err(ProtocolError::InvalidFileId(file_id.to_string()));
        }
        let file_id = FileId(file_id.to_ascii_lowercase());

        let body = match kind {
            "PUTCHUNK" => {
                let index = next_number(&mut fields, "chunk index")?;
                let desired_degree: u32 = next_number(&mut fields, "desired degree")?;
                if !(1..=MAX_DESIRED_DEGREE).contains(&desired_degree) {
                    return Err(ProtocolError::InvalidDegree(desired_degree));
                }
                if payload.len() > MAX_CHUNK_SIZE {
                    return Err(ProtocolError::PayloadTooLarge(payload.len()));
                }
                Body::PutChunk {
                    index,
                    desired_degree,
                    payload: payload.to_vec(),
                }
            }
            "STORED" => Body::Stored {
                index: next_number(&mut fields, "chunk index")?,
            },
            "GETCHUNK" => {
                let index = next_number(&mut fields, "chunk index")?;
                let callback_port = match fields.next() {
                    Some(port) => Some(parse_number(port, "callback port")?),
                    None => None,
                };
                Body::GetChunk {
                    index,
                    callback_port,
                }
            }
            "CHUNK" => {
                let index = next_number(&mut fields, "chunk index")?;
                if payload.len() > MAX_CHUNK_SIZE {
                    return Err(ProtocolError::PayloadTooLarge(payload.len()));
                }
                let payload = if version == Version::Enhanced && payload.is_empty() {
                    None
                } else {
                    Some(payload.to_vec())
                };
                Body::Chunk { index, payload }
            }
            "DELETE" => Body::Delete,
            "REMOVED" => Body::Removed {
                index: next_number(&mut fields, "chunk index")?,
            },
            "DELETEDCHUNK" => Body::DeletedChunk {
                index: next_number(&mut fields, "chunk index")?,
            },
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };

        if let Some(extra) = fields.next() {
            return Err(ProtocolError::UnexpectedField(extra.to_string()));
        }

        Ok(Self::new(version, sender, file_id, body))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk_key() {
            Some(key) => write!(f, "{} {} from {}", self.body.type_name(), key, self.sender),
            None => write!(
                f,
                "{} {} from {}",
                self.body.type_name(),
                self.file_id,
                self.sender
            ),
        }
    }
}

fn next_number<'a, T: std::str::FromStr>(
    fields: &mut impl Iterator<Item = &'a str>,
    field: &'static str,
) -> Result<T, ProtocolError> {
    let value = fields.next().ok_or(ProtocolError::MissingField(field))?;
    parse_number(value, field)
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<T, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}
