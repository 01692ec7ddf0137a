use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Identity of a peer as carried in every message header.
///
/// Must be a single whitespace-free token since it travels inside the ASCII header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical channel a message travels on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Channel {
    Control,
    Push,
    Pull,
    Direct,
}

impl Channel {
    pub const GROUPS: [Channel; 3] = [Channel::Control, Channel::Push, Channel::Pull];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Control => "control",
            Channel::Push => "push",
            Channel::Pull => "pull",
            Channel::Direct => "direct",
        };
        f.write_str(name)
    }
}

/// A raw inbound message together with where it came from.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: Channel,
    pub sender: SocketAddr,
    pub bytes: Vec<u8>,
}
