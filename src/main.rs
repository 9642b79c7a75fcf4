//! Phonewire hub
//!
//! Real-time state-synchronization hub for a softphone's web control
//! surface:
//!
//! 1. **Channel fan-out**: any number of WebSocket clients subscribe to one
//!    of the fixed channels (`accounts`, `contacts`, `calls`, `chat`,
//!    `meter`, `video-source`) and receive every state change as one JSON
//!    frame per update, starting with a full snapshot on join.
//!
//! 2. **Account store**: persisted SIP credential records with derived
//!    registration status and active-selection flags, mutable from client
//!    commands and engine events.
//!
//! 3. **Call registry**: the set of live calls, driven by engine events
//!    (Incoming → Established → removed on Closed), never persisted.
//!
//! All mutation funnels through a single hub task, so clients of a channel
//! always observe snapshots in generation order.

mod accounts;
mod calls;
mod engine;
mod fanout;
mod handler;
mod hub;
mod persist;
mod protocol;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use accounts::AccountStore;
use engine::NullEngine;
use hub::{HubHandle, HubMsg};
use protocol::Channel;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "phonewire-hub", version, about = "Softphone control-surface state hub")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9000, env = "HUB_PORT")]
    port: u16,

    /// Directory for persisted state (the account document)
    #[arg(long, default_value = "./state", env = "HUB_STATE_DIR")]
    state_dir: String,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phonewire_hub=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    // The engine is an external collaborator; the standalone binary wires a
    // stand-in that logs commands and emits no events. A real integration
    // feeds EngineEvents through the hub handle.
    let mut null_engine = NullEngine::default();
    let blobs = persist::FileStore::new(&args.state_dir);
    let accounts = AccountStore::load(Box::new(blobs), &mut null_engine);
    let (hub, hub_task) = hub::spawn(accounts, Box::new(null_engine));

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws/:channel", get(ws_handler))
        .route("/status.json", get(status_handler))
        .route("/version", get(version_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(hub.clone());

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Phonewire hub starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .expect("Server error");

    // Orderly shutdown flushes the account document.
    hub.send(HubMsg::Shutdown);
    let _ = hub_task.await;
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler. The path segment selects the channel and fixes
/// it for the connection's lifetime; an unknown channel is rejected before
/// the upgrade.
async fn ws_handler(
    Path(channel): Path<String>,
    ws: WebSocketUpgrade,
    State(hub): State<HubHandle>,
) -> Response {
    let channel = match channel.parse::<Channel>() {
        Ok(channel) => channel,
        Err(()) => {
            tracing::debug!(channel = channel.as_str(), "Unknown channel requested");
            return (StatusCode::NOT_FOUND, "unknown channel").into_response();
        }
    };

    ws.on_upgrade(move |socket| handler::handle_socket(socket, channel, hub))
        .into_response()
}

/// Status endpoint — name/value/label rows for the UI's info panel.
async fn status_handler() -> impl IntoResponse {
    Json(json!([
        {
            "name": "service",
            "value": "phonewire-hub",
            "label": "default",
        },
        {
            "name": "version",
            "value": env!("CARGO_PKG_VERSION"),
            "label": "default",
        },
        {
            "name": "timestamp",
            "value": chrono::Utc::now().timestamp_millis().to_string(),
            "label": "default",
        },
    ]))
}

/// Version endpoint.
async fn version_handler() -> impl IntoResponse {
    env!("CARGO_PKG_VERSION")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
