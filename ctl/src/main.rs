//! `backup-ctl <peer_http_addr> <COMMAND> [args]`
//!
//! Sends one operation to a peer's control surface and prints the JSON reply.

use anyhow::{Context, Result, bail};
use peer_backup::control::protocol::{
    BackupRequest, DeleteRequest, ENDPOINT_BACKUP, ENDPOINT_DELETE, ENDPOINT_RECLAIM,
    ENDPOINT_RESTORE, ENDPOINT_STATE, ReclaimRequest, RestoreRequest,
};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Backup { filename: String, degree: u32 },
    Restore { filename: String },
    Delete { filename: String },
    Reclaim { bytes: u64 },
    State,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            bail!("missing command");
        };
        let operand = |position: usize, what: &str| {
            args.get(position)
                .cloned()
                .with_context(|| format!("{} needs {}", name, what))
        };

        let command = match name.to_ascii_uppercase().as_str() {
            "BACKUP" => Command::Backup {
                filename: operand(1, "a filename")?,
                degree: operand(2, "a replication degree")?
                    .parse()
                    .context("replication degree must be a number")?,
            },
            "RESTORE" => Command::Restore {
                filename: operand(1, "a filename")?,
            },
            "DELETE" => Command::Delete {
                filename: operand(1, "a filename")?,
            },
            "RECLAIM" => Command::Reclaim {
                bytes: operand(1, "a byte count")?
                    .parse()
                    .context("byte count must be a number")?,
            },
            "STATE" => Command::State,
            other => bail!("unknown command {}", other),
        };
        Ok(command)
    }
}

fn peer_url(addr: &str) -> String {
    let trimmed = addr.trim();
    let normalized = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    normalized.trim_end_matches('/').to_string()
}

async fn run(client: &reqwest::Client, base: &str, command: Command) -> Result<serde_json::Value> {
    let request = match command {
        Command::Backup { filename, degree } => client
            .post(format!("{}{}", base, ENDPOINT_BACKUP))
            .json(&BackupRequest {
                filename,
                replication_degree: degree,
            }),
        Command::Restore { filename } => client
            .post(format!("{}{}", base, ENDPOINT_RESTORE))
            .json(&RestoreRequest { filename }),
        Command::Delete { filename } => client
            .post(format!("{}{}", base, ENDPOINT_DELETE))
            .json(&DeleteRequest { filename }),
        Command::Reclaim { bytes } => client
            .post(format!("{}{}", base, ENDPOINT_RECLAIM))
            .json(&ReclaimRequest { bytes }),
        Command::State => client.get(format!("{}{}", base, ENDPOINT_STATE)),
    };

    let response = request.send().await.context("peer unreachable")?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.context("invalid reply")?;
    if !status.is_success() {
        tracing::warn!("Peer answered {}", status);
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage: {} <peer_http_addr> BACKUP <file> <degree> | RESTORE <file> | DELETE <file> | RECLAIM <bytes> | STATE",
            args[0]
        );
        eprintln!("Example: {} 127.0.0.1:9000 BACKUP notes.txt 2", args[0]);
        std::process::exit(1);
    }

    let base = peer_url(&args[1]);
    let command = Command::parse(&args[2..])?;
    let client = reqwest::Client::new();

    let reply = run(&client, &base, command).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse(&args(&["BACKUP", "a.txt", "3"])).unwrap(),
            Command::Backup {
                filename: "a.txt".to_string(),
                degree: 3
            }
        );
        assert_eq!(
            Command::parse(&args(&["restore", "a.txt"])).unwrap(),
            Command::Restore {
                filename: "a.txt".to_string()
            }
        );
        assert_eq!(
            Command::parse(&args(&["RECLAIM", "64000"])).unwrap(),
            Command::Reclaim { bytes: 64000 }
        );
        assert_eq!(Command::parse(&args(&["STATE"])).unwrap(), Command::State);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse(&args(&[])).is_err());
        assert!(Command::parse(&args(&["BACKUP", "a.txt"])).is_err());
        assert!(Command::parse(&args(&["RECLAIM", "lots"])).is_err());
        assert!(Command::parse(&args(&["SHRED", "a.txt"])).is_err());
    }

    #[test]
    fn test_peer_url_normalization() {
        assert_eq!(peer_url("127.0.0.1:9000"), "http://127.0.0.1:9000");
        assert_eq!(peer_url(" http://host:1/ "), "http://host:1");
    }
}
