//! Headless live-room participant
//!
//! Connects to the signaling server, lists rooms, joins one (or goes live)
//! and relays chat between stdin and the room. Media is captured from the
//! synthetic sample backend, so this is mostly useful for exercising a
//! signaling deployment.
//!
//! # Usage
//!
//! ```bash
//! # Join a room as a listener
//! live-client --signaling-url wss://live.example.com/ws \
//!   --token-endpoint https://live.example.com/api/live/token \
//!   --room artist_42
//!
//! # Broadcast from your own room
//! live-client --user-id 42 --role host --go-live
//!
//! # Load everything from a YAML file
//! live-client --config ./live.yaml
//! ```
//!
//! While running, stdin lines are sent as chat. Lines starting with `/` are
//! commands: `/rooms`, `/join <room>`, `/leave`, `/live`, `/video`, `/audio`,
//! `/share`, `/unshare`, `/quit`.

use anyhow::{bail, Context};
use clap::Parser;
use encore_live_rooms::{
    CredentialRole, HttpCredentialSource, LiveClient, LiveClientConfig, LiveEvent,
    MediaConstraints, NullTrackSink, SampleCaptureBackend, TurnServerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Encore live-room client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override it
    #[arg(short, long, env = "LIVE_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket signaling URL
    #[arg(long, env = "LIVE_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Credential issuer endpoint
    #[arg(long, env = "LIVE_TOKEN_ENDPOINT")]
    token_endpoint: Option<String>,

    /// Bearer token presented to the credential issuer
    #[arg(long, env = "LIVE_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Credential role (defaults to host with --go-live)
    #[arg(long, env = "LIVE_ROLE")]
    role: Option<RoleArg>,

    /// Display name in rooms
    #[arg(short, long, env = "LIVE_USERNAME")]
    username: Option<String>,

    /// Broadcaster id (required for --go-live)
    #[arg(long, env = "LIVE_USER_ID")]
    user_id: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "LIVE_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Room to join after connecting
    #[arg(short, long)]
    room: Option<String>,

    /// Publish camera and microphone in the joined room
    #[arg(long, default_value_t = false)]
    publish: bool,

    /// Go live in this user's own room
    #[arg(long, default_value_t = false, conflicts_with = "room")]
    go_live: bool,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RoleArg {
    Host,
    Audience,
}

impl From<RoleArg> for CredentialRole {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Host => CredentialRole::Host,
            RoleArg::Audience => CredentialRole::Audience,
        }
    }
}

/// Parse TURN server string (format: turn:host:port:username:password)
fn parse_turn_server(s: &str) -> anyhow::Result<TurnServerConfig> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        bail!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        );
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        bail!("Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'", protocol);
    }

    // Password may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

/// Build the client configuration from an optional file plus flag overrides
fn build_config(args: &Args) -> anyhow::Result<LiveClientConfig> {
    let mut config = match &args.config {
        Some(path) => LiveClientConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => LiveClientConfig::default(),
    };

    if let Some(url) = &args.signaling_url {
        config.signaling_url = url.clone();
    }
    if let Some(endpoint) = &args.token_endpoint {
        config.token_endpoint = endpoint.clone();
    }
    if args.auth_token.is_some() {
        config.auth_token = args.auth_token.clone();
    }
    if let Some(role) = args.role {
        config.role = role.into();
    } else if args.go_live {
        config.role = CredentialRole::Host;
    }
    if let Some(username) = &args.username {
        config.username = username.clone();
    }
    if args.user_id.is_some() {
        config.user_id = args.user_id.clone();
    }
    if !args.stun_servers.is_empty() {
        config.stun_servers = args.stun_servers.clone();
    }
    if !args.turn_servers.is_empty() {
        config.turn_servers = args
            .turn_servers
            .iter()
            .map(|s| parse_turn_server(s))
            .collect::<anyhow::Result<_>>()?;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,encore_live_rooms=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shutdown = Arc::new(Notify::new());
    let handler_shutdown = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, leaving room...");
        handler_shutdown.notify_one();
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("live-client")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown))
}

async fn async_main(args: Args, shutdown: Arc<Notify>) -> anyhow::Result<()> {
    init_tracing(args.json);
    let config = build_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        signaling_url = %config.signaling_url,
        username = %config.username,
        role = config.role.as_str(),
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        "Live client starting"
    );

    let credentials = Arc::new(HttpCredentialSource::new(
        config.token_endpoint.clone(),
        config.auth_token.clone(),
    ));
    let client = LiveClient::start(
        config,
        credentials,
        Arc::new(SampleCaptureBackend::new()),
        Arc::new(NullTrackSink),
    )
    .await?;

    let printer = tokio::spawn(print_events(client.events()));

    let constraints = if args.publish {
        MediaConstraints::AUDIO_VIDEO
    } else {
        MediaConstraints::NONE
    };
    if args.go_live {
        client.go_live().await?;
    } else if let Some(room) = &args.room {
        client.join_room(room.clone(), constraints).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !run_line(&client, line.trim(), constraints).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        // stdin closed; keep running until Ctrl+C
                        shutdown.notified().await;
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        }
    }

    client.shutdown().await;
    printer.abort();
    info!("Live client stopped");
    Ok(())
}

/// Handle one stdin line; returns `false` to quit
async fn run_line(client: &LiveClient, line: &str, constraints: MediaConstraints) -> bool {
    if line.is_empty() {
        return true;
    }

    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let result = match command {
        "/quit" => return false,
        "/rooms" => {
            for room in client.rooms() {
                println!(
                    "  {}{}",
                    room.room_id,
                    if room.is_artist_room() { " (live)" } else { "" }
                );
            }
            client.refresh_rooms().await
        }
        "/join" if !rest.is_empty() => client.join_room(rest, constraints).await,
        "/leave" => client.leave_room().await,
        "/live" => client.go_live().await,
        "/video" => client
            .toggle_video()
            .await
            .map(|on| println!("video {}", if on { "on" } else { "off" })),
        "/audio" => client
            .toggle_audio()
            .await
            .map(|on| println!("audio {}", if on { "on" } else { "off" })),
        "/share" => client
            .start_screen_share()
            .await
            .map(|n| println!("sharing screen with {} peers", n)),
        "/unshare" => client.stop_screen_share().await.map(|_| ()),
        _ if line.starts_with('/') => {
            println!("unknown command: {}", command);
            Ok(())
        }
        _ => client.send_chat(line).await,
    };

    if let Err(e) = result {
        warn!("{}: {}", command, e);
    }
    true
}

async fn print_events(mut events: broadcast::Receiver<LiveEvent>) {
    loop {
        match events.recv().await {
            Ok(LiveEvent::ChatReceived(line)) => {
                println!("<{}> {}", line.username, line.message);
            }
            Ok(LiveEvent::RoomsUpdated(rooms)) => {
                info!(count = rooms.len(), "Room list updated");
            }
            Ok(LiveEvent::RoomStatusChanged(status)) => info!(%status, "Room status"),
            Ok(LiveEvent::ParticipantJoined { peer_id, .. }) => info!(%peer_id, "Participant joined"),
            Ok(LiveEvent::ParticipantLeft { peer_id, .. }) => info!(%peer_id, "Participant left"),
            Ok(LiveEvent::MediaError { message }) => error!(%message, "Media error"),
            Ok(LiveEvent::ServerError { message }) => warn!(%message, "Server error"),
            Ok(event) => info!(event = event.name(), "Live event"),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_turn_server_keeps_colons_in_password() {
        let turn = parse_turn_server("turns:turn.example.com:5349:kay:pa:ss").unwrap();
        assert_eq!(turn.url, "turns:turn.example.com:5349");
        assert_eq!(turn.username, "kay");
        assert_eq!(turn.credential, "pa:ss");
        assert!(parse_turn_server("stun:host:3478").is_err());
    }

    #[test]
    fn test_go_live_requests_host_role() {
        let args = Args::parse_from(["live-client", "--user-id", "42", "--go-live"]);
        assert_eq!(build_config(&args).unwrap().role, CredentialRole::Host);
    }

    #[test]
    fn test_explicit_role_wins_over_go_live() {
        let args = Args::parse_from([
            "live-client",
            "--user-id",
            "42",
            "--go-live",
            "--role",
            "audience",
        ]);
        assert_eq!(build_config(&args).unwrap().role, CredentialRole::Audience);
    }
}
