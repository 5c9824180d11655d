//! wabot daemon: keeps one messaging session alive and serves the
//! status/pairing surface over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use wabot_core::creds::FileCredentialStore;
use wabot_core::gateway::GatewayFactory;
use wabot_core::session::{Supervisor, SupervisorConfig, SupervisorHandle};
use wabot_http::SharedState;

#[derive(Parser, Debug)]
#[command(name = "wabot-daemon", about = "Single-account messaging bot daemon")]
struct Args {
    /// Port for the HTTP status/pairing surface.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Externally reachable base URL, used in scan hints.
    #[arg(long, env = "PUBLIC_URL")]
    public_url: Option<String>,

    /// WebSocket URL of the protocol gateway bridge.
    #[arg(long, env = "GATEWAY_URL", default_value = "ws://127.0.0.1:3001")]
    gateway_url: String,

    /// Directory holding the persisted credential bundle.
    #[arg(long, env = "AUTH_DIR", default_value = "./auth")]
    auth_dir: PathBuf,
}

/// Log the scan URL whenever a fresh pairing token shows up.
fn watch_pairing_hints(supervisor: &SupervisorHandle, base_url: String) {
    let mut status_rx = supervisor.watch();
    tokio::spawn(async move {
        let mut last_token: Option<String> = None;
        while status_rx.changed().await.is_ok() {
            let token = status_rx.borrow_and_update().pairing_token.clone();
            if token.is_some() && token != last_token {
                log::info!("scan pairing QR at {base_url}/qr");
            }
            last_token = token;
        }
    });
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let store = Arc::new(FileCredentialStore::new(args.auth_dir.clone()));
    let factory = Arc::new(GatewayFactory::new(args.gateway_url.clone()));
    let supervisor = Supervisor::spawn(factory, store, SupervisorConfig::default());

    let base_url = args
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", args.port));
    watch_pairing_hints(&supervisor, base_url);

    let state = SharedState::new(supervisor.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let mut server = match wabot_http::start(state, addr).await {
        Ok(server) => server,
        Err(err) => {
            log::error!("failed to start HTTP server on {addr}: {err}");
            std::process::exit(1);
        }
    };

    tokio::signal::ctrl_c().await.ok();
    log::info!("shutting down");
    supervisor.shutdown().await;
    server.stop().await;
}
