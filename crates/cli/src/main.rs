use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Parser)]
#[command(name = "deskbot")]
#[command(about = "Deskbot CLI: help desk bot with human handoff", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: DESKBOT_CONFIG_PATH or ~/.deskbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (HTTP + WebSocket, Telegram when a bot token is configured).
    Gateway {
        /// Config file path (default: DESKBOT_CONFIG_PATH or ~/.deskbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket and HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat through the gateway's web channel. Agents use the conversation id listed in handoff.agents (as web:<id>).
    ///
    /// Web agent ids are not authenticated: any client that passes the gateway token can claim
    /// one and act as that agent. Keep the gateway on loopback or behind a token you only give
    /// to agents when handoff.agents lists web:<id> entries.
    Chat {
        /// Config file path (default: DESKBOT_CONFIG_PATH or ~/.deskbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Conversation id to use; the gateway assigns one when omitted.
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Display name shown to agents.
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the current conversations and waiting queue (agents only).
    Queue {
        /// Config file path (default: DESKBOT_CONFIG_PATH or ~/.deskbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Agent conversation id (as listed in handoff.agents under web:<id>).
        #[arg(long, value_name = "ID")]
        conversation: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("deskbot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Gateway { config, port }) => run_gateway(config, port).await,
        Some(Commands::Chat {
            config,
            conversation,
            name,
        }) => run_chat(config, conversation, name).await,
        Some(Commands::Queue { config, conversation }) => run_queue(config, conversation).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(handoff::config::default_config_path);
    let dir = handoff::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<std::path::PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = handoff::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    handoff::gateway::run_gateway(config).await
}

/// Open the gateway socket and complete the connect handshake. Returns the socket and the
/// conversation id the gateway assigned.
async fn connect_gateway(
    config_path: Option<std::path::PathBuf>,
    conversation: Option<String>,
    name: Option<String>,
) -> anyhow::Result<(WsStream, String)> {
    let (config, _) = handoff::config::load_config(config_path)?;
    let ws_url = format!("ws://{}:{}/ws", config.gateway.bind.trim(), config.gateway.port);
    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .map_err(|e| anyhow::anyhow!("connecting to {}: {}", ws_url, e))?;

    let mut params = serde_json::json!({ "maxProtocol": 1 });
    if let Some(id) = conversation {
        params["conversationId"] = serde_json::Value::String(id);
    }
    if let Some(n) = name {
        params["name"] = serde_json::Value::String(n);
    }
    if let Some(token) = handoff::config::resolve_gateway_token(&config) {
        params["auth"] = serde_json::json!({ "token": token });
    }
    let payload = request(&mut ws, "connect", "connect", params).await?;
    let conversation_id = payload
        .get("conversationId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing conversationId in hello-ok"))?
        .to_string();
    if payload.get("agent").and_then(|v| v.as_bool()).unwrap_or(false) {
        println!("connected as agent web:{} (type *admin help* for commands)", conversation_id);
    } else {
        println!("connected as web:{}", conversation_id);
    }
    Ok((ws, conversation_id))
}

/// Send one request and wait for its response, skipping events. Returns the payload.
async fn request(
    ws: &mut WsStream,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let req = serde_json::json!({ "type": "req", "id": id, "method": method, "params": params });
    ws.send(Message::Text(req.to_string())).await?;
    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else { continue };
        let res: serde_json::Value = serde_json::from_str(&text)?;
        if res.get("type").and_then(|v| v.as_str()) != Some("res") || res.get("id").and_then(|v| v.as_str()) != Some(id) {
            continue;
        }
        if !res.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            let err = res.get("error").and_then(|v| v.as_str()).unwrap_or("request failed");
            anyhow::bail!("{}: {}", method, err);
        }
        return Ok(res.get("payload").cloned().unwrap_or(serde_json::Value::Null));
    }
    anyhow::bail!("gateway closed the connection before answering {}", method)
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    conversation: Option<String>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let (mut ws, _) = connect_gateway(config_path, conversation, name).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
                    break;
                }
                next_id += 1;
                let req = serde_json::json!({
                    "type": "req",
                    "id": next_id.to_string(),
                    "method": "message",
                    "params": { "text": input },
                });
                ws.send(Message::Text(req.to_string())).await?;
            }
            frame = ws.next() => {
                let Some(frame) = frame else { break };
                let Message::Text(text) = frame? else { continue };
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                match value.get("type").and_then(|v| v.as_str()) {
                    Some("event") => match value.get("event").and_then(|v| v.as_str()) {
                        Some("message") => {
                            let text = value
                                .get("payload")
                                .and_then(|p| p.get("text"))
                                .and_then(|v| v.as_str())
                                .unwrap_or("");
                            println!("< {}", text.trim());
                        }
                        Some("shutdown") => {
                            println!("gateway shut down");
                            break;
                        }
                        _ => {}
                    },
                    Some("res") if !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) => {
                        let err = value.get("error").and_then(|v| v.as_str()).unwrap_or("request failed");
                        eprintln!("chat error: {}", err);
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

async fn run_queue(config_path: Option<std::path::PathBuf>, conversation: String) -> anyhow::Result<()> {
    let (mut ws, _) = connect_gateway(config_path, Some(conversation), None).await?;
    let payload = request(&mut ws, "queue", "queue.list", serde_json::json!({})).await?;
    let pending = payload.get("pending").and_then(|v| v.as_u64()).unwrap_or(0);
    println!("{} waiting", pending);
    let conversations = payload
        .get("conversations")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for c in conversations {
        let customer = c.get("customer").and_then(|v| v.as_str()).unwrap_or("?");
        let name = c.get("name").and_then(|v| v.as_str()).unwrap_or("(unknown)");
        let state = c.get("state").and_then(|v| v.as_str()).unwrap_or("?");
        let mut line = format!("{:<32} {:<20} {}", customer, name, state);
        if let Some(agent) = c.get("agent").and_then(|v| v.as_str()) {
            line.push_str(&format!(" with {}", agent));
        }
        if let Some(since) = c.get("waitingSince").and_then(|v| v.as_str()) {
            line.push_str(&format!(" since {}", since));
        }
        println!("{}", line);
    }
    let _ = ws.close(None).await;
    Ok(())
}
