use peer_backup::config::PeerConfig;
use peer_backup::control;
use peer_backup::engine::Peer;
use peer_backup::network::multicast::MulticastTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let level = if args.iter().any(|arg| arg == "--verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if args.iter().any(|arg| arg == "--help") {
        eprintln!(
            "Usage: {} [--id <peer>] [--data <dir>] [--capacity <bytes>] [--http <addr:port>]",
            args[0]
        );
        eprintln!(
            "          [--control <group:port>] [--push <group:port>] [--pull <group:port>]"
        );
        eprintln!("          [--max-backups <n>] [--enhanced] [--direct] [--verbose]");
        eprintln!(
            "Example: {} --id peer1 --data ./peer1 --http 127.0.0.1:9001 --enhanced",
            args[0]
        );
        std::process::exit(1);
    }

    let config = PeerConfig::from_args(&args)?;
    tracing::info!(
        "Starting peer {} (data in {})",
        config.peer_id,
        config.data_dir.display()
    );

    // 1. Channels (multicast groups + direct listener):
    let (transport, inbound) = MulticastTransport::bind(config.groups).await?;

    // 2. Store and protocol engine:
    let http_addr = config.http_addr;
    let peer = Peer::open(config, transport)?;
    tracing::info!(
        "Disk: {} of {} bytes used, {} files backed up",
        peer.store().used_bytes(),
        peer.store().capacity_bytes(),
        peer.store().backed_up_files().len()
    );

    // 3. Receive loop:
    peer.start(inbound);

    // 4. Control surface:
    let app = control::router(peer.clone());

    tracing::info!("Control surface listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
