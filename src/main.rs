//! `femtoleech`: a minimal single-peer BitTorrent leech client.
//!
//! Reads a single-file `.torrent`, announces to its tracker (unless a peer
//! is given explicitly), dials the first peer, and drives the download to a
//! file via [`femtoleech::peer::PeerSession`].
use anyhow::{bail, Context, Result};
use clap::Parser;
use femtoleech::peer::{Handshake, PeerSession};
use femtoleech::torrent::TorrentFile;
use femtoleech::tracker;
use std::fs::File;
use std::io::BufWriter;
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Download a single-file torrent from one peer.
#[derive(Debug, Parser)]
#[command(name = "femtoleech", version, about)]
struct Args {
    /// Path to the `.torrent` metainfo file.
    torrent: PathBuf,

    /// Path to write the downloaded file to.
    output: PathBuf,

    /// Skip the tracker announce and dial this peer directly (`host:port`).
    #[arg(long)]
    peer: Option<SocketAddr>,

    /// Override the tracker URL declared in the torrent's `announce` field.
    #[arg(long)]
    announce: Option<String>,

    /// TCP port to advertise to the tracker as our own listening port.
    #[arg(long, default_value_t = 6881)]
    port: u16,

    /// Read timeout, in seconds, applied to the peer connection.
    #[arg(long, default_value_t = 120)]
    read_timeout_secs: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        tracing::error!(%err, "download failed");
        return Err(err);
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let data = std::fs::read(&args.torrent)
        .with_context(|| format!("reading torrent file {}", args.torrent.display()))?;
    let mut torrent = TorrentFile::parse(&data).context("parsing torrent metainfo")?;
    if let Some(announce) = args.announce {
        torrent.announce = announce;
    }

    tracing::info!(
        name = %torrent.info.name,
        pieces = torrent.num_pieces(),
        length = torrent.total_length(),
        "loaded torrent"
    );

    let (peer_addr, local_peer_id) = match args.peer {
        Some(addr) => (addr, tracker::generate_peer_id()),
        None => {
            let client = tracker::Client::new(args.port).context("building tracker client")?;
            let response = client.announce(&torrent).context("announcing to tracker")?;
            let Some(peer) = response.peers.into_iter().next() else {
                bail!("tracker returned no peers");
            };
            (SocketAddr::new(peer.ip, peer.port), client.peer_id())
        }
    };

    tracing::info!(%peer_addr, "dialing peer");
    let (stream, their_handshake) =
        Handshake::connect(&peer_addr.to_string(), torrent.info_hash, local_peer_id)
            .context("peer handshake")?;
    tracing::info!(remote_peer_id = %hex::encode(their_handshake.peer_id), "handshake complete");

    configure_timeouts(&stream, args.read_timeout_secs)?;

    let output = File::create(&args.output)
        .with_context(|| format!("creating output file {}", args.output.display()))?;
    let mut sink = BufWriter::new(output);

    let mut session = PeerSession::new(stream, &torrent);
    session.run(&mut sink).context("peer session")?;

    tracing::info!(output = %args.output.display(), "download complete");
    Ok(())
}

fn configure_timeouts(stream: &TcpStream, read_timeout_secs: u64) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_secs(read_timeout_secs)))
        .context("setting read timeout on peer connection")?;
    Ok(())
}
