mod latin1;
mod telnet;

use std::sync::Arc;

use anyhow::Context;
use mumemap::{
    DirSource, HttpSource, MapEvent, MapSession, MapSource, RoomCoords, TrackerConfig,
    WorldMap,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};

#[derive(Clone, Debug)]
struct Config {
    host: String,
    port: u16,
    mapdata: MapData,
    nearby_radius: i32,
    start_at: Option<RoomCoords>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum MapData {
    Http(String),
    Dir(String),
}

impl MapData {
    fn parse(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            MapData::Http(s.to_string())
        } else {
            MapData::Dir(s.to_string())
        }
    }
}

impl std::fmt::Display for MapData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapData::Http(u) => write!(f, "{u}"),
            MapData::Dir(d) => write!(f, "dir:{d}"),
        }
    }
}

fn usage_and_exit() -> ! {
    eprintln!(
        "mume_map (MUME client with map tracking)\n\n\
USAGE:\n  mume_map [--host HOST] [--port PORT] [--mapdata URL|DIR] [--radius N] [--at X,Y,Z]\n\n\
ENV:\n  MUME_HOST           default mume.org\n  MUME_PORT           default 4242\n  MUME_MAPDATA        default mapdata/v1 (http(s) URL or local directory)\n  MUME_NEARBY_RADIUS  default 20 (rooms fetched around each position)\n  MUME_START_AT       unset (starting position before any room is seen)\n  RUST_LOG            default info,mume_map=info (logs go to stderr)\n"
    );
    std::process::exit(2);
}

/// `x,y,z`, with the `#` of a web client link tolerated.
fn parse_start_at(s: &str) -> Option<RoomCoords> {
    s.trim().trim_start_matches('#').parse().ok()
}

fn parse_args() -> Config {
    let mut host = std::env::var("MUME_HOST").unwrap_or_else(|_| "mume.org".to_string());
    let mut port: u16 = std::env::var("MUME_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4242);
    let mut mapdata = MapData::parse(
        &std::env::var("MUME_MAPDATA").unwrap_or_else(|_| "mapdata/v1".to_string()),
    );
    let mut nearby_radius: i32 = std::env::var("MUME_NEARBY_RADIUS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(TrackerConfig::default().nearby_radius);
    let mut start_at = std::env::var("MUME_START_AT")
        .ok()
        .and_then(|v| parse_start_at(&v));

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--host" => host = it.next().unwrap_or_else(|| usage_and_exit()),
            "--port" => {
                port = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--mapdata" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                mapdata = MapData::parse(&v);
            }
            "--radius" => {
                nearby_radius = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage_and_exit())
            }
            "--at" => {
                start_at = Some(
                    it.next()
                        .and_then(|v| parse_start_at(&v))
                        .unwrap_or_else(|| usage_and_exit()),
                )
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        host,
        port,
        mapdata,
        nearby_radius: nearby_radius.max(1),
        start_at,
    }
}

/// A map that fails to load only costs us the tracking, not the game.
async fn open_session<S: MapSource>(
    source: S,
    events: mpsc::UnboundedSender<MapEvent>,
    cfg: TrackerConfig,
) -> MapSession {
    match WorldMap::load(Arc::new(source)).await {
        Ok(map) => MapSession::new(Some(Arc::new(map)), events, cfg),
        Err(e) => {
            warn!(err = %e, "map unavailable; playing without it");
            MapSession::without_map()
        }
    }
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<MapEvent>) {
    while let Some(ev) = rx.recv().await {
        match ev {
            MapEvent::Moved(c) => info!(x = c.x, y = c.y, z = c.z, "position"),
            MapEvent::Rooms(rooms) => {
                for r in &rooms {
                    debug!(at = %r.coords(), name = %r.data().name, "room nearby");
                }
            }
            MapEvent::RoomsSettled { around, total } => {
                info!(around = %around, rooms = total, "surroundings loaded")
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mume_map=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cfg = parse_args();
    info!(host = %cfg.host, port = cfg.port, mapdata = %cfg.mapdata, "mume_map starting");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(log_events(events_rx));

    let tracker_cfg = TrackerConfig {
        nearby_radius: cfg.nearby_radius,
    };
    let mut session = match &cfg.mapdata {
        MapData::Http(url) => {
            let source = HttpSource::new(url).context("bad map data url")?;
            open_session(source, events_tx, tracker_cfg).await
        }
        MapData::Dir(dir) => open_session(DirSource::new(dir), events_tx, tracker_cfg).await,
    };
    if let Some(at) = cfg.start_at {
        info!(at = %at, "starting position");
        session.set_position(at);
    }

    let stream = TcpStream::connect((cfg.host.as_str(), cfg.port))
        .await
        .with_context(|| format!("connecting to {}:{}", cfg.host, cfg.port))?;
    info!(host = %cfg.host, port = cfg.port, "connected");
    session.connected();

    let (mut rd, mut wr) = stream.into_split();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut telnet = telnet::TelnetFilter::new();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        tokio::select! {
            n = rd.read(&mut buf) => {
                let n = n.context("reading from server")?;
                if n == 0 {
                    info!("server closed the connection");
                    break;
                }
                let t = telnet.parse(&buf[..n]);
                if !t.replies.is_empty() {
                    wr.write_all(&t.replies).await.context("writing to server")?;
                }
                let out = session.filter_input_text(&latin1::decode(&t.data));
                if !out.upstream.is_empty() {
                    debug!(bytes = out.upstream.len(), "requesting xml mode");
                    wr.write_all(&out.upstream).await.context("writing to server")?;
                }
                stdout.write_all(out.text.as_bytes()).await?;
                stdout.flush().await?;
            }
            line = stdin.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    info!("stdin closed");
                    break;
                };
                let mut b = telnet::escape_iac(&latin1::encode(&line));
                b.extend_from_slice(b"\r\n");
                wr.write_all(&b).await.context("writing to server")?;
            }
            res = session.tracker_finished() => {
                match res {
                    Ok(()) => info!("map tracker stopped"),
                    Err(e) => error!(err = %e, "map tracker failed; playing without it"),
                }
            }
        }
    }

    Ok(())
}
