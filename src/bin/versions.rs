//! Edge node binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use versions::common::config;
use versions::server::fetch::origin_servers;
use versions::server::OriginServer;
use versions::store::keys;
use versions::{ConfigStore, EdgeNode};

#[derive(Parser)]
#[command(name = "versions")]
#[command(about = "versions edge cache for static assets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an edge node
    Serve {
        /// Config file (defaults to versions.toml or $VERSIONS_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,

        /// HTTP port
        #[arg(long)]
        port: Option<u16>,

        /// Origin server as `url` or `url=id`, in failover order (repeatable)
        #[arg(long = "origin")]
        origins: Vec<String>,

        /// Admin token
        #[arg(long)]
        auth: Option<String>,

        /// Redis url; enables cluster sync
        #[arg(long)]
        redis: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config: config_path,
            port,
            origins,
            auth,
            redis,
        } => {
            // File and environment first, then CLI arguments.
            // Origins given on the command line join the configured list.
            let store = ConfigStore::with_defaults();
            config::load(&store, config_path.as_deref())?;

            if let Some(port) = port {
                store.set(keys::PORT, u64::from(port));
            }
            if !origins.is_empty() {
                let parsed: Vec<serde_json::Value> = origins
                    .iter()
                    .map(|raw| serde_json::to_value(OriginServer::parse(raw)))
                    .collect::<Result<_, _>>()?;
                store.set(keys::ORIGIN_SERVERS, serde_json::Value::Array(parsed));
            }
            if let Some(auth) = auth {
                store.set(keys::AUTH, auth);
            }
            if let Some(redis) = redis {
                store.set(keys::REDIS, redis);
                store.set(keys::SYNC, true);
            }

            let level = store
                .get_str(keys::LOG_LEVEL)
                .unwrap_or_else(|| "info".to_string());
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| level.into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            tracing::info!("Starting versions {}", versions::VERSION);
            tracing::info!("  Origins: {}", origin_servers(&store).len());
            tracing::info!("  Admin routes: {}", store.contains(keys::AUTH));

            let node = EdgeNode::new(Arc::new(store))?.with_configured_sync()?;
            tracing::info!("  Clustered: {}", node.is_clustered());
            node.serve().await?;
        }
    }

    Ok(())
}
