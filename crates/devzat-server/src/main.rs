//! Boot sequence: parse CLI flags, load config, wire up every collaborator
//! a [`devzat_core::session::Session`] needs, bind the SSH listener(s) and
//! the plugin gRPC server, then block on a shutdown signal.

mod ssh;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use russh::keys::ssh_key::rand_core::OsRng;
use tonic::{Request, Status};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devzat_core::antiabuse::{JoinRateLimiter, TorExitList};
use devzat_core::backlog::Backlog;
use devzat_core::ban::BanStore;
use devzat_core::config::{read_config, Config};
use devzat_core::plugin::{MiddlewareChain, PassiveListeners, PluginCommandRegistry, PluginService};
use devzat_core::prefs::PrefsStore;
use devzat_core::room::RoomRegistry;
use devzat_core::session::SessionDeps;
use devzat_core::token::TokenStore;

use devzat_proto::plugin_server::PluginServer;

const DEFAULT_CONFIG_PATH: &str = "devzat.toml";

#[derive(Parser, Debug)]
#[command(name = "devzat", about = "A multi-room SSH chat server")]
struct Cli {
    /// Path to a TOML config file. Defaults to `devzat.toml` in the
    /// working directory if present, otherwise built-in defaults.
    #[arg(long)]
    config_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(
        read_config(&cli.config_file, std::path::Path::new(DEFAULT_CONFIG_PATH))
            .context("loading configuration")?,
    );

    tokio::fs::create_dir_all(&config.data_dir).await.context("creating data directory")?;
    tokio::fs::create_dir_all(config.user_prefs_dir()).await.context("creating user-prefs directory")?;

    let bans = Arc::new(BanStore::load(config.bans_path()).await.context("loading bans.json")?);
    let tokens = Arc::new(TokenStore::load(config.tokens_path()).await.context("loading tokens.json")?);
    let prefs = Arc::new(PrefsStore::new(config.user_prefs_dir()));
    let rooms = RoomRegistry::new();
    rooms.ensure_main().await;
    let backlog = Arc::new(Backlog::new(config.backlog_len));
    let join_limiter = Arc::new(JoinRateLimiter::default());

    let tor = Arc::new(TorExitList::default());
    tor.refresh(&config.tor_list_url).await;

    // Shared with the plugin gRPC bridge below, so a chat line typed over
    // SSH passes through the same middleware/listener pipeline a plugin
    // sees, per spec §4.7.
    let middleware = Arc::new(MiddlewareChain::new());
    let passive_listeners = Arc::new(PassiveListeners::new());
    let plugin_commands = Arc::new(PluginCommandRegistry::new());

    let deps = Arc::new(SessionDeps {
        rooms: Arc::clone(&rooms),
        bans: Arc::clone(&bans),
        tokens: Arc::clone(&tokens),
        prefs: Arc::clone(&prefs),
        tor,
        join_limiter,
        config: Arc::clone(&config),
        backlog,
        middleware: Arc::clone(&middleware),
        passive_listeners: Arc::clone(&passive_listeners),
        plugin_commands: Arc::clone(&plugin_commands),
    });

    let plugin_server = spawn_plugin_server(
        Arc::clone(&rooms),
        Arc::clone(&tokens),
        Arc::clone(&config),
        middleware,
        passive_listeners,
        plugin_commands,
    );
    let ssh_server = spawn_ssh_listeners(Arc::clone(&deps), Arc::clone(&config));

    let handles = devzat_core::shutdown::ShutdownHandles { rooms, bans, prefs };
    tokio::select! {
        _ = plugin_server => warn!("plugin gRPC server exited unexpectedly"),
        _ = ssh_server => warn!("ssh listener task exited unexpectedly"),
        _ = devzat_core::shutdown::wait_and_shutdown(handles) => {}
    }

    Ok(())
}

fn spawn_plugin_server(
    rooms: Arc<RoomRegistry>,
    tokens: Arc<TokenStore>,
    config: Arc<Config>,
    middleware: Arc<MiddlewareChain>,
    passive_listeners: Arc<PassiveListeners>,
    plugin_commands: Arc<PluginCommandRegistry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let service = PluginService::new(rooms, middleware, plugin_commands, passive_listeners);

        let static_key = config.plugin_static_key.clone();
        let interceptor_tokens = Arc::clone(&tokens);
        let svc = PluginServer::with_interceptor(service, move |req: Request<()>| {
            authenticate_plugin_request(req, &interceptor_tokens, static_key.as_deref())
        });

        let addr = match config.plugin_addr.parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "invalid plugin_addr, plugin RPC bridge disabled");
                return;
            }
        };

        info!(%addr, "plugin gRPC bridge listening");
        if let Err(e) = tonic::transport::Server::builder().add_service(svc).serve(addr).await {
            warn!(error = %e, "plugin gRPC server failed");
        }
    })
}

fn authenticate_plugin_request(
    req: Request<()>,
    tokens: &TokenStore,
    static_key: Option<&str>,
) -> Result<Request<()>, Status> {
    let token = req
        .metadata()
        .get(devzat_proto::AUTH_METADATA_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(devzat_proto::AUTH_BEARER_PREFIX));

    match token {
        Some(t) if tokens.is_valid_sync(t, static_key) => Ok(req),
        _ => Err(Status::unauthenticated("missing or invalid plugin token")),
    }
}

fn spawn_ssh_listeners(deps: Arc<SessionDeps>, config: Arc<Config>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let server_config = Arc::new(make_server_config(&config.host_key_path));

        let primary = tokio::spawn(run_listener(
            Arc::clone(&server_config),
            Arc::clone(&deps),
            config.ssh_addr.clone(),
        ));

        let alt = match (&config.ssh_alt_addr, config.private) {
            (Some(addr), false) => {
                Some(tokio::spawn(run_listener(Arc::clone(&server_config), Arc::clone(&deps), addr.clone())))
            }
            _ => None,
        };

        let _ = primary.await;
        if let Some(alt) = alt {
            let _ = alt.await;
        }
    })
}

async fn run_listener(config: Arc<russh::server::Config>, deps: Arc<SessionDeps>, addr: String) {
    info!(%addr, "ssh listener starting");
    let server = ssh::DevzatSshServer { deps };
    if let Err(e) = russh::server::run(config, addr.clone(), server).await {
        warn!(error = %e, %addr, "ssh listener exited");
    }
}

fn make_server_config(host_key_path: &std::path::Path) -> russh::server::Config {
    let mut config = russh::server::Config::default();
    config.inactivity_timeout = Some(Duration::from_secs(3600));
    config.auth_rejection_time = Duration::from_millis(0);
    config.keys.push(load_or_generate_host_key(host_key_path));
    config
}

/// Load the Ed25519 host key from `path`, generating and persisting a new
/// one on first boot. A key that fails to parse falls back to an ephemeral
/// one rather than refusing to start.
fn load_or_generate_host_key(path: &std::path::Path) -> russh::keys::PrivateKey {
    if let Ok(pem) = std::fs::read_to_string(path) {
        match russh::keys::PrivateKey::from_openssh(&pem) {
            Ok(key) => return key,
            Err(e) => warn!(error = %e, "failed to parse host key, regenerating"),
        }
    }

    let key =
        russh::keys::PrivateKey::random(&mut OsRng, russh::keys::Algorithm::Ed25519).expect("generating host key");

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match key.to_openssh(russh::keys::ssh_key::LineEnding::LF) {
        Ok(pem) => {
            if let Err(e) = write_host_key(path, pem.as_bytes()) {
                warn!(error = %e, "failed to persist generated host key, it will regenerate on restart");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize generated host key"),
    }
    key
}

#[cfg(unix)]
fn write_host_key(path: &std::path::Path, pem: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?.write_all(pem)
}

#[cfg(not(unix))]
fn write_host_key(path: &std::path::Path, pem: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, pem)
}
