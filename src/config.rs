//! Peer configuration and command-line flags.

use crate::network::multicast::ChannelGroups;
use crate::network::types::PeerId;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_CAPACITY_BYTES: u64 = 100_000_000;
pub const DEFAULT_MAX_CONCURRENT_BACKUPS: usize = 16;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub peer_id: PeerId,
    pub data_dir: PathBuf,
    pub capacity_bytes: u64,
    /// Speak protocol 2.0: suppression window and confirmed deletes.
    pub enhanced: bool,
    /// Ask holders to send restored chunks point-to-point.
    pub direct_restore: bool,
    pub max_concurrent_backups: usize,
    pub http_addr: SocketAddr,
    pub groups: ChannelGroups,
}

impl PeerConfig {
    /// Defaults for a peer keeping its data under `data_dir`.
    pub fn new(peer_id: PeerId, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            peer_id,
            data_dir: data_dir.into(),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            enhanced: false,
            direct_restore: false,
            max_concurrent_backups: DEFAULT_MAX_CONCURRENT_BACKUPS,
            http_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            groups: ChannelGroups::default(),
        }
    }

    /// Parses `--id`, `--data`, `--capacity`, `--http`, `--control`, `--push`, `--pull`,
    /// `--max-backups`, `--enhanced` and `--direct`. Unknown flags are skipped.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::new(PeerId::new(), "peer-data");
        let mut data_dir: Option<PathBuf> = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--id" => {
                    config.peer_id = PeerId(flag_value(args, i)?.to_string());
                    i += 2;
                }
                "--data" => {
                    data_dir = Some(PathBuf::from(flag_value(args, i)?));
                    i += 2;
                }
                "--capacity" => {
                    config.capacity_bytes = parse_flag(args, i)?;
                    i += 2;
                }
                "--http" => {
                    config.http_addr = parse_flag(args, i)?;
                    i += 2;
                }
                "--control" => {
                    config.groups.control = parse_flag(args, i)?;
                    i += 2;
                }
                "--push" => {
                    config.groups.push = parse_flag(args, i)?;
                    i += 2;
                }
                "--pull" => {
                    config.groups.pull = parse_flag(args, i)?;
                    i += 2;
                }
                "--max-backups" => {
                    config.max_concurrent_backups = parse_flag(args, i)?;
                    i += 2;
                }
                "--enhanced" => {
                    config.enhanced = true;
                    i += 1;
                }
                "--direct" => {
                    config.direct_restore = true;
                    i += 1;
                }
                _ => {
                    i += 1;
                }
            }
        }

        if config.peer_id.0.is_empty() || config.peer_id.0.contains(char::is_whitespace) {
            anyhow::bail!("--id must be a single token");
        }
        if config.max_concurrent_backups == 0 {
            anyhow::bail!("--max-backups must be at least 1");
        }
        config.data_dir = data_dir.unwrap_or_else(|| PathBuf::from(format!("peer-{}", config.peer_id)));

        Ok(config)
    }

    /// Where restored files are written.
    pub fn restore_dir(&self) -> PathBuf {
        self.data_dir.join("restored")
    }
}

fn flag_value(args: &[String], i: usize) -> Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} needs a value", args[i]))
}

fn parse_flag<T>(args: &[String], i: usize) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = flag_value(args, i)?;
    value
        .parse()
        .with_context(|| format!("invalid value {:?} for {}", value, args[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("peer")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = PeerConfig::from_args(&args(&["--id", "p1"])).unwrap();

        assert_eq!(config.peer_id, PeerId("p1".to_string()));
        assert_eq!(config.capacity_bytes, DEFAULT_CAPACITY_BYTES);
        assert_eq!(config.data_dir, PathBuf::from("peer-p1"));
        assert_eq!(config.groups, ChannelGroups::default());
        assert!(!config.enhanced);
        assert!(!config.direct_restore);
    }

    #[test]
    fn test_all_flags() {
        let config = PeerConfig::from_args(&args(&[
            "--id",
            "p2",
            "--data",
            "/tmp/p2",
            "--capacity",
            "5000",
            "--http",
            "127.0.0.1:9100",
            "--push",
            "239.1.1.1:9002",
            "--max-backups",
            "4",
            "--enhanced",
            "--direct",
            "--unknown",
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/p2"));
        assert_eq!(config.restore_dir(), PathBuf::from("/tmp/p2/restored"));
        assert_eq!(config.capacity_bytes, 5000);
        assert_eq!(config.http_addr.port(), 9100);
        assert_eq!(config.groups.push.port(), 9002);
        assert_eq!(config.max_concurrent_backups, 4);
        assert!(config.enhanced);
        assert!(config.direct_restore);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(PeerConfig::from_args(&args(&["--capacity", "lots"])).is_err());
        assert!(PeerConfig::from_args(&args(&["--http"])).is_err());
        assert!(PeerConfig::from_args(&args(&["--max-backups", "0"])).is_err());
    }
}
