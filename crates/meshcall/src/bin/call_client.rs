//! Headless call client
//!
//! Joins a room over WebSocket signaling and keeps the call up until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Mesh room with up to 8 remote participants
//! cargo run --bin call_client -- \
//!   --signaling-url ws://localhost:8080 \
//!   --room r1 --name Alice --mode mesh --max-peers 8
//!
//! # Two-party call, audio only, with a TURN server
//! cargo run --bin call_client -- \
//!   --room r1 --name Bob --mode pair --no-video \
//!   --turn-servers turn:turn.example.org:3478:user:secret
//!
//! # Load settings from a JSON config file
//! cargo run --bin call_client -- --config ./call.json --room r1 --name Carol
//! ```

use anyhow::Context;
use clap::Parser;
use meshcall::{
    CallConfig, CallMode, CallRoom, LocalParticipant, LoggingSink, RoomNotice,
    RtcConnectionFactory, StaticSampleDevices, TurnServerConfig, WsSignalingClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Headless WebRTC call client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; explicit flags below override it
    #[arg(long, env = "CALL_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket signaling URL
    #[arg(long, default_value = "ws://localhost:8080", env = "CALL_SIGNALING_URL")]
    signaling_url: String,

    /// Room to join
    #[arg(long, env = "CALL_ROOM")]
    room: String,

    /// Display name
    #[arg(long, default_value = "meshcall", env = "CALL_NAME")]
    name: String,

    /// Participant id (random if omitted)
    #[arg(long, env = "CALL_PARTICIPANT_ID")]
    participant_id: Option<String>,

    /// Call variant: pair or mesh
    #[arg(long, default_value = "mesh", env = "CALL_MODE")]
    mode: ModeArg,

    /// Maximum remote participants (mesh only)
    #[arg(long, default_value_t = 10, env = "CALL_MAX_PEERS")]
    max_peers: u32,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "CALL_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Seconds an ICE restart has to bring a failed connection back
    #[arg(long, default_value_t = 30, env = "CALL_ICE_RECOVERY_TIMEOUT")]
    ice_recovery_timeout_secs: u32,

    /// Send audio only
    #[arg(long, default_value_t = false)]
    no_video: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    Pair,
    Mesh,
}

/// Parse TURN server string (format: turn:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    // Password may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

/// Build the call configuration from an optional file plus CLI overrides
fn build_config_from_args(args: &Args) -> anyhow::Result<CallConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            info!("Loaded call config from {}", path.display());
            CallConfig::from_json_str(&json)?
        }
        None => CallConfig::default(),
    };

    config.signaling_url = args.signaling_url.clone();
    config.stun_servers = args.stun_servers.clone();
    config.options.ice_recovery_timeout_secs = args.ice_recovery_timeout_secs;

    match args.mode {
        ModeArg::Pair => {
            config.mode = CallMode::Pair;
            config.max_peers = 1;
        }
        ModeArg::Mesh => {
            config.mode = CallMode::Mesh;
            config.max_peers = args.max_peers;
        }
    }

    for turn in &args.turn_servers {
        let turn = parse_turn_server(turn).map_err(anyhow::Error::msg)?;
        info!("Adding TURN server: {} (user: {})", turn.url, turn.username);
        config.turn_servers.push(turn);
    }

    if args.no_video {
        config.media.video = None;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meshcall=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    info!(
        version = meshcall::version(),
        room = %args.room,
        mode = ?args.mode,
        "Call client starting"
    );

    let config = build_config_from_args(&args)?;
    let signaling = WsSignalingClient::connect(&config.signaling_url).await?;
    let factory = RtcConnectionFactory::new(&config)?;

    let local = match &args.participant_id {
        Some(id) => LocalParticipant::new(id, &args.name),
        None => LocalParticipant::generated(&args.name),
    };

    let mut room = CallRoom::new(
        config,
        Arc::new(signaling),
        Arc::new(factory),
        Arc::new(StaticSampleDevices::new()),
        Arc::new(LoggingSink),
    )?;

    let mut notices = room.subscribe_notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                RoomNotice::ParticipantRemoved {
                    participant_id,
                    reason,
                } => warn!(participant_id = %participant_id, ?reason, "Participant removed"),
                RoomNotice::Left { .. } => break,
                other => info!(?other, "Room notice"),
            }
        }
    });

    room.join(&args.room, local).await?;

    let outcome = tokio::select! {
        result = room.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, leaving room");
            Ok(())
        }
    };

    if let Err(e) = &outcome {
        error!("Call ended with error: {}", e);
    }
    room.leave().await?;
    outcome?;

    info!("Call client stopped");
    Ok(())
}
