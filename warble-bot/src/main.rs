//! warble: a WhatsApp chat bot.
//!
//! Runs as a single process: loads (or bootstraps) session credentials,
//! connects through the configured transport, loads the plugin directory
//! and watches it for changes, and supervises the connection until
//! shutdown. Chat commands come from the plugin manifests; `!help` lists
//! them.
//!
//! Login options, in order of preference: a persisted `creds.json`, a
//! `SESSION_ID` environment string, or interactive pairing with
//! `--pairing-code --phone <number>` (or `--qr`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use warble_transport::memory::LoopbackTransport;
use warble_transport::{ConnectConfig, Transport};

use warble_bot::handler::BotHandler;
use warble_bot::plugins::PluginRegistry;
use warble_bot::server;
use warble_bot::session::SessionStore;
use warble_bot::supervisor::{
    Phase, ReconnectPolicy, StatusBoard, Supervisor, SupervisorConfig,
};
use warble_bot::watch::PluginWatcher;

/// How often stale pre-key files are swept while connected.
const PREKEY_SWEEP: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(name = "warble", about = "WhatsApp chat bot with hot-reloadable plugins")]
struct Args {
    /// Session credential directory
    #[arg(long, default_value = "session")]
    session_dir: PathBuf,

    /// Plugin manifest directory
    #[arg(long, default_value = "plugins")]
    plugin_dir: PathBuf,

    /// Packed session string (tag~base64)
    #[arg(long, env = "SESSION_ID", hide_env_values = true)]
    session_id: Option<String>,

    /// Expected tag on the session string
    #[arg(long, default_value = "WARBLE")]
    session_tag: String,

    /// Pair via an 8-character pairing code instead of a QR scan
    #[arg(long)]
    pairing_code: bool,

    /// Phone number (with country code) for pairing-code login
    #[arg(long)]
    phone: Option<String>,

    /// Log QR payloads for QR pairing
    #[arg(long)]
    qr: bool,

    /// Serve /health and /status over HTTP
    #[arg(long)]
    server: bool,

    /// Status server port
    #[arg(long, default_value_t = 3000, env = "PORT")]
    port: u16,

    /// Characters accepted as a command prefix
    #[arg(long, default_value = "!./")]
    prefix: String,

    /// Message sent to our own chat when the connection opens
    #[arg(long, default_value = "warble is up")]
    greeting: String,

    /// Base reconnect delay in milliseconds (attempt n waits n times this)
    #[arg(long, default_value_t = 3000)]
    reconnect_base_ms: u64,

    /// Counted reconnect attempts before giving up
    #[arg(long, default_value_t = 5)]
    max_reconnects: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warble=info,warble_bot=info,warble_transport=info".into()),
        )
        .init();

    let args = Args::parse();
    if args.pairing_code && args.phone.is_none() {
        anyhow::bail!("--pairing-code needs --phone with the country code");
    }

    let session = Arc::new(SessionStore::open(&args.session_dir)?);
    let mut creds = session.load()?;
    if creds.is_none() {
        if let Some(value) = &args.session_id {
            creds = Some(session.bootstrap(value, &args.session_tag)?);
        }
    }
    if creds.is_none() && !args.pairing_code && !args.qr {
        anyhow::bail!(
            "no usable session: set SESSION_ID, or pair with --pairing-code --phone / --qr"
        );
    }

    std::fs::create_dir_all(&args.plugin_dir)?;
    let plugins = Arc::new(PluginRegistry::new(&args.plugin_dir));
    let count = plugins.load_all();
    tracing::info!(count, dir = %args.plugin_dir.display(), "plugins loaded");
    let _watcher = PluginWatcher::start(plugins.clone())?;

    let handler = Arc::new(BotHandler::new(plugins.clone(), args.prefix.clone()));
    let status = Arc::new(StatusBoard::new());

    if args.server {
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let status = status.clone();
        let plugins = plugins.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, status, plugins).await {
                tracing::error!(error = %e, "status server stopped");
            }
        });
    }

    // The bundled loopback transport stands in until a protocol backend is
    // wired up; it lets the whole stack run end to end locally.
    let mut transport = LoopbackTransport::new();
    if let Some(identity) = creds.as_ref().and_then(|blob| blob.identity()) {
        tracing::info!(jid = %identity.jid, "logged in");
        transport = transport.with_identity(identity);
    }
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let supervisor = Supervisor::new(
        transport,
        session.clone(),
        handler,
        status.clone(),
        SupervisorConfig {
            connect: ConnectConfig::default(),
            policy: ReconnectPolicy {
                base_delay: Duration::from_millis(args.reconnect_base_ms),
                max_attempts: args.max_reconnects,
                ..ReconnectPolicy::default()
            },
            greeting: Some(args.greeting.clone()),
            pairing_phone: args.pairing_code.then(|| args.phone.clone()).flatten(),
            show_qr: args.qr,
        },
    );

    // periodic pre-key sweep, skipped while disconnected
    {
        let session = session.clone();
        let status = status.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PREKEY_SWEEP);
            tick.tick().await;
            loop {
                tick.tick().await;
                if status.snapshot().phase != Phase::Open {
                    continue;
                }
                match session.clear_prekeys() {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!(removed, "stale pre-keys swept"),
                    Err(e) => tracing::warn!(error = %e, "pre-key sweep failed"),
                }
            }
        });
    }

    tokio::select! {
        result = supervisor.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}
