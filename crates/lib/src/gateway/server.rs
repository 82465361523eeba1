//! Gateway HTTP + WebSocket server (single port).

use crate::address::Address;
use crate::agents::AgentDirectory;
use crate::bot::{BotDialog, HelpDeskBot};
use crate::bridge::MessageBridge;
use crate::channels::{
    ChannelRegistry, InboundMessage, TelegramChannel, TelegramUpdate, WebAttachment, WebChannel,
    WEB_CHANNEL_ID,
};
use crate::config::{self, Config};
use crate::gateway::protocol::{
    event_json, ConnectParams, HelloOk, MessageParams, QueueEntry, QueueSnapshot, WsRequest, WsResponse,
};
use crate::intent::PhraseDetector;
use crate::registry::ConversationRegistry;
use crate::router::{Action, HandoffRouter};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub const PROTOCOL_VERSION: u32 = 1;

const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"event","event":"shutdown","payload":{}}"#;

/// Shared state for the gateway: the handoff core plus the transports feeding it.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// When Some, WebSocket connect must provide params.auth.token matching this.
    pub required_token: Option<String>,
    /// Broadcasts gateway events (shutdown) to connected sockets.
    pub event_tx: broadcast::Sender<String>,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    /// Sender for inbound channel messages. The processor task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub channel_registry: Arc<ChannelRegistry>,
    pub web: Arc<WebChannel>,
    pub router: Arc<HandoffRouter>,
    pub bridge: MessageBridge,
    pub agents: Arc<AgentDirectory>,
    pub bot: Arc<dyn BotDialog>,
}

impl GatewayState {
    /// Wire the handoff core from config: one registry, injected into the router; the bridge
    /// delivers through the channel registry, which starts with the web channel registered.
    pub async fn new(config: Config, inbound_tx: mpsc::Sender<InboundMessage>) -> Self {
        let channel_registry = Arc::new(ChannelRegistry::new());
        let web = Arc::new(WebChannel::new(256));
        channel_registry.register(web.clone()).await;

        let registry = Arc::new(ConversationRegistry::new());
        let bridge = MessageBridge::new(channel_registry.clone());
        let detector = Arc::new(PhraseDetector::new(&config.handoff.escalation_phrases));
        let router = Arc::new(HandoffRouter::new(registry, bridge.clone(), detector));

        let agents = Arc::new(AgentDirectory::from_entries(&config.handoff.agents));
        if agents.is_empty() {
            log::warn!("no agents configured (handoff.agents); escalated customers will wait indefinitely");
        }

        let required_token = if config.gateway.auth.mode == config::GatewayAuthMode::Token {
            config::resolve_gateway_token(&config)
        } else {
            None
        };
        let (event_tx, _) = broadcast::channel(64);

        Self {
            config: Arc::new(config),
            required_token,
            event_tx,
            channel_tasks: Arc::new(tokio::sync::RwLock::new(Vec::new())),
            inbound_tx,
            channel_registry,
            web,
            router,
            bridge,
            agents,
            bot: Arc::new(HelpDeskBot),
        }
    }

    pub fn is_agent(&self, address: &Address) -> bool {
        self.agents.is_agent(&address.key)
    }
}

/// Process one inbound channel message: route it through the handoff router and, when the
/// router passes it on, let the bot answer.
pub async fn process_inbound_message(state: &GatewayState, msg: InboundMessage) {
    let sender = msg.sender();
    let is_agent = state.is_agent(&sender);
    let handled = state.router.handle(&sender, is_agent, &msg.text).await;
    if !handled.failures.is_empty() {
        log::debug!(
            "inbound: {} message(s) for {} not delivered",
            handled.failures.len(),
            sender.key
        );
    }
    match handled.action {
        Action::Consumed => {}
        Action::Continue => {
            let Some(reply) = state.bot.reply(&sender, &msg.text).await else {
                return;
            };
            if let Err(e) = state.bridge.send(&sender, &reply).await {
                log::warn!("inbound: bot reply failed: {}", e);
            }
        }
    }
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// When bind is not loopback, a gateway token must be configured or startup fails.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        let token = config::resolve_gateway_token(&config);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or DESKBOT_GATEWAY_TOKEN)",
                bind
            );
        }
    }

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let state = GatewayState::new(config, inbound_tx.clone()).await;
    log::info!("handoff: {} agent address(es) configured", state.agents.len());

    {
        let state_inbound = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                process_inbound_message(&state_inbound, msg).await;
            }
        });
    }

    let telegram_webhook_for_shutdown = start_telegram(&state, inbound_tx).await;

    let port = state.config.gateway.port;
    let event_tx = state.event_tx.clone();
    let channel_registry = state.channel_registry.clone();
    let channel_tasks = state.channel_tasks.clone();
    let app = Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!(
        "gateway listening on {} (channels: {})",
        bind_addr,
        channel_registry.ids().await.join(", ")
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            event_tx,
            channel_registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Register the Telegram channel when a bot token is configured. Returns the channel when it runs
/// in webhook mode so shutdown can remove the webhook.
async fn start_telegram(
    state: &GatewayState,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> Option<Arc<TelegramChannel>> {
    let token = config::resolve_telegram_token(&state.config)?;
    let telegram = Arc::new(TelegramChannel::new(token));
    let telegram_config = &state.config.channels.telegram;
    if let Some(ref url) = telegram_config.webhook_url {
        if let Err(e) = telegram.set_webhook(url, telegram_config.webhook_secret.as_deref()).await {
            log::warn!("telegram set_webhook failed: {}", e);
        } else {
            log::info!("telegram channel registered (webhook mode): {}", url);
        }
        state.channel_registry.register(telegram.clone()).await;
        Some(telegram)
    } else {
        let handle = telegram.clone().start_inbound(inbound_tx);
        state.channel_tasks.write().await.push(handle);
        state.channel_registry.register(telegram).await;
        log::info!("telegram channel registered and getUpdates loop started");
        None
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts a shutdown event to WebSocket clients, stops channel connectors, removes Telegram webhook if used, then awaits in-process channel tasks.
async fn shutdown_signal(
    event_tx: broadcast::Sender<String>,
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, broadcasting shutdown and draining connections");

    let _ = event_tx.send(SHUTDOWN_EVENT_JSON.to_string());
    channel_registry.stop_all().await;

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// POST /telegram/webhook: receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
async fn telegram_webhook(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.into_inbound("telegram") else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for liveness checks).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
        "pending": state.router.registry().pending_count(),
    }))
}

/// GET /ws upgrades to WebSocket for the web channel.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Identity of a connected web socket. Holding the attachment keeps web deliveries to the
/// conversation succeeding.
struct WebSession {
    socket: WebAttachment,
    name: Option<String>,
}

impl WebSession {
    fn conversation_id(&self) -> &str {
        self.socket.conversation_id()
    }
}

async fn send_json<T: serde::Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            log::warn!("ws: failed to encode frame: {}", e);
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let mut session: Option<WebSession> = None;
    let mut event_rx = state.event_tx.subscribe();
    let mut web_rx = state.web.subscribe();

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(text) => {
                        let is_shutdown = text == SHUTDOWN_EVENT_JSON;
                        let _ = socket.send(Message::Text(text)).await;
                        if is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} broadcast events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            delivery = web_rx.recv() => {
                match delivery {
                    Ok(d) => {
                        let mine = session.as_ref().is_some_and(|s| s.conversation_id() == d.conversation_id);
                        if mine {
                            let frame = event_json("message", json!({ "text": d.text }));
                            if socket.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("ws client lagged; {} web deliveries dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(req): Result<WsRequest, _> = serde_json::from_str(&text) else { continue };
                if req.typ != "req" {
                    continue;
                }
                let res = handle_request(&state, &mut session, req).await;
                if !send_json(&mut socket, &res).await {
                    break;
                }
            }
        }
    }
}

async fn handle_request(state: &GatewayState, session: &mut Option<WebSession>, req: WsRequest) -> WsResponse {
    if req.method == "connect" {
        return connect(state, session, &req);
    }
    let Some(current) = session.as_ref() else {
        return WsResponse::err(&req.id, "first request must be connect");
    };
    match req.method.as_str() {
        "message" => {
            let params: MessageParams = match serde_json::from_value(req.params.clone()) {
                Ok(p) => p,
                Err(_) => return WsResponse::err(&req.id, "invalid message params"),
            };
            let inbound = InboundMessage {
                channel_id: WEB_CHANNEL_ID.to_string(),
                conversation_id: current.conversation_id().to_string(),
                sender_name: current.name.clone(),
                text: params.text,
            };
            if state.inbound_tx.send(inbound).await.is_err() {
                return WsResponse::err(&req.id, "gateway is shutting down");
            }
            WsResponse::ok(&req.id, json!({ "accepted": true }))
        }
        "queue.list" => {
            let address = Address::new(WEB_CHANNEL_ID, current.conversation_id());
            if !state.is_agent(&address) {
                return WsResponse::err(&req.id, "queue.list is only available to agents");
            }
            let registry = state.router.registry();
            let snapshot = QueueSnapshot {
                pending: registry.pending_count(),
                conversations: registry.list_all().iter().map(QueueEntry::from).collect(),
            };
            match serde_json::to_value(&snapshot) {
                Ok(payload) => WsResponse::ok(&req.id, payload),
                Err(e) => WsResponse::err(&req.id, e.to_string()),
            }
        }
        other => WsResponse::err(&req.id, format!("unknown method: {}", other)),
    }
}

fn connect(state: &GatewayState, session: &mut Option<WebSession>, req: &WsRequest) -> WsResponse {
    let params: ConnectParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(_) => return WsResponse::err(&req.id, "invalid connect params"),
    };
    if let Some(ref required) = state.required_token {
        let provided = params.auth.token.as_deref().unwrap_or("").trim();
        if provided.is_empty() {
            return WsResponse::err(
                &req.id,
                "unauthorized: gateway token missing (set DESKBOT_GATEWAY_TOKEN or gateway.auth.token)",
            );
        }
        if provided != required {
            return WsResponse::err(&req.id, "unauthorized: gateway token mismatch");
        }
    }
    let conversation_id = params
        .conversation_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let name = params.name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    // Agent ids are not authenticated: any client passing the gateway token can claim one.
    let agent = state.is_agent(&Address::new(WEB_CHANNEL_ID, &conversation_id));
    if agent {
        log::info!("ws: web client connected as agent {}:{}", WEB_CHANNEL_ID, conversation_id);
    } else {
        log::debug!("ws: web conversation {} connected", conversation_id);
    }

    let hello = HelloOk {
        typ: "hello-ok".to_string(),
        protocol: params.max_protocol.unwrap_or(PROTOCOL_VERSION).min(PROTOCOL_VERSION),
        conversation_id: conversation_id.clone(),
        agent,
    };
    *session = Some(WebSession {
        socket: state.web.attach(&conversation_id),
        name,
    });
    match serde_json::to_value(&hello) {
        Ok(payload) => WsResponse::ok(&req.id, payload),
        Err(e) => WsResponse::err(&req.id, e.to_string()),
    }
}
