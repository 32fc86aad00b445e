use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info, warn};

use webpush_dispatcher::http::{build_router, AppState};
use webpush_dispatcher::{
    ConfigError, Dispatcher, InMemoryStore, Registry, RegistryError, ServerConfig, StoreConfig,
    StoreError, SubscriptionStore, VapidKeys, WebPushDelivery,
};

/// Web push alert server.
///
/// Browsers register push subscriptions; POST /sendAlert broadcasts a
/// message to all of them.
#[derive(Parser, Debug)]
#[command(name = "webpush-dispatcher", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address
        #[arg(long, env = "BIND")]
        bind: Option<String>,

        /// Listen port
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Redis URL; selects the redis store
        #[arg(long, env = "REDIS_URL")]
        redis_url: Option<String>,

        /// Postgres connection string; selects the postgres store
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,

        /// Keep subscriptions in memory only (overrides any store URL)
        #[arg(long)]
        memory: bool,

        /// VAPID private key (raw P-256 scalar, base64url)
        #[arg(long, env = "VAPID_PRIVATE_KEY", hide_env_values = true)]
        vapid_private_key: Option<String>,

        /// Directory with the browser client
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },

    /// Generate a VAPID keypair
    VapidKeys,
}

#[derive(Debug, Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("registry failed to start: {0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("webpush_dispatcher=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("webpush_dispatcher=info,tower_http=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    match cli.command {
        Commands::VapidKeys => {
            let keys = VapidKeys::generate();
            println!("VAPID_PRIVATE_KEY={}", keys.private_key());
            println!("VAPID_PUBLIC_KEY={}", keys.public_key());
            Ok(())
        }
        Commands::Serve {
            bind,
            port,
            redis_url,
            database_url,
            memory,
            vapid_private_key,
            static_dir,
        } => {
            let mut config = match cli.config.as_deref() {
                Some(path) => ServerConfig::load(path)?,
                None => ServerConfig::default(),
            };

            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if memory {
                config.store = StoreConfig::Memory;
            } else if let Some(url) = database_url {
                config.store = StoreConfig::Postgres { url };
            } else if let Some(url) = redis_url {
                let namespace = match config.store {
                    StoreConfig::Redis { namespace, .. } => namespace,
                    _ => None,
                };
                config.store = StoreConfig::Redis { url, namespace };
            }
            if vapid_private_key.is_some() {
                config.push.vapid_private_key = vapid_private_key;
            }
            if static_dir.is_some() {
                config.static_dir = static_dir;
            }

            serve(config).await
        }
    }
}

async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let vapid = match config.push.vapid_private_key.as_deref() {
        Some(private_key) => Some(VapidKeys::from_private_key(private_key)?),
        None => {
            warn!("no VAPID key configured; push services may reject unsigned pushes");
            None
        }
    };

    let store = open_store(&config.store).await?;
    let (registry, _registry_task) = Registry::spawn(store);
    let loaded = registry.ready().await?;
    info!(subscribers = loaded, "registry ready");

    let delivery = Arc::new(WebPushDelivery::new(config.push.web_push()));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        delivery,
        config.dispatch.dispatcher(),
    ));

    let state = Arc::new(AppState {
        registry,
        dispatcher,
        vapid_public_key: vapid.map(|keys| keys.public_key().to_string()),
    });
    let app = build_router(state, config.static_dir.as_deref());

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn SubscriptionStore>, ServerError> {
    match config {
        StoreConfig::Memory => {
            warn!("using in-memory store; subscriptions are lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreConfig::Redis { url, namespace } => {
            info!("using redis store");
            let mut store = webpush_dispatcher::RedisStore::open(url)?;
            if let Some(ns) = namespace {
                store = store.with_namespace(ns.clone());
            }
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        StoreConfig::Postgres { url } => {
            info!("using postgres store");
            let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
                .await
                .map_err(|e| StoreError::unavailable("postgres", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!(error = %e, "postgres connection closed");
                }
            });
            Ok(Arc::new(webpush_dispatcher::PostgresStore::new(client).await?))
        }
        #[allow(unreachable_patterns)]
        other => Err(ServerError::Unsupported(format!(
            "store backend {:?} is not compiled in",
            other
        ))),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
