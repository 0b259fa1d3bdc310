//! CLI for tagging assets and managing the cluster version

use clap::{Parser, Subcommand};
use std::sync::Arc;
use versions::store::keys;
use versions::sync::polling::{parse_version_body, version_url};
use versions::{Client, ConfigStore, ConnectOptions};

#[derive(Parser)]
#[command(name = "versions-ctl")]
#[command(about = "versions edge cache CLI")]
#[command(version)]
struct Cli {
    /// Edge node URL
    #[arg(long, global = true, default_value = "http://localhost:8080")]
    server: String,

    /// Admin token
    #[arg(long, global = true, env = "VERSIONS_AUTH")]
    auth: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print versioned URLs for asset paths
    Tag {
        /// Asset paths
        #[arg(required = true)]
        paths: Vec<String>,

        /// Version to tag with (fetched from the server if omitted)
        #[arg(long)]
        version: Option<String>,

        /// Alias host (repeatable)
        #[arg(long = "alias")]
        aliases: Vec<String>,
    },

    /// Show the version the server currently serves
    Current,

    /// Set the cluster version, or bump its last segment
    Version {
        /// New version
        number: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let store = ConfigStore::with_defaults();
    if let Some(auth) = &cli.auth {
        store.set(keys::AUTH, auth.as_str());
    }

    match cli.command {
        Commands::Tag {
            paths,
            version,
            aliases,
        } => {
            let version = match version {
                Some(v) => v,
                None => current_version(&store, &cli.server).await?,
            };
            store.set(keys::VERSION, version);
            if !aliases.is_empty() {
                store.set(keys::ALIASES, aliases);
            }

            // Offline: no polling, no broker
            let client = Client::connect(Arc::new(store), None, ConnectOptions::default())?;
            for path in paths {
                let tagged = client.tag(&path);
                if tagged == path {
                    println!("{}{}", client.prefix(Some(&cli.server)), path);
                } else {
                    println!("{}", tagged);
                }
            }
        }

        Commands::Current => {
            println!("{}", current_version(&store, &cli.server).await?);
        }

        Commands::Version { number } => {
            if number.is_none() {
                let current = current_version(&store, &cli.server).await?;
                store.set(keys::VERSION, current);
            }
            let mut client = Client::connect(
                Arc::new(store),
                Some(&cli.server),
                ConnectOptions::default(),
            )?;
            let version = client.version(number.as_deref()).await?;
            client.end().await;
            println!("Version: {}", version);
        }
    }

    Ok(())
}

async fn current_version(store: &ConfigStore, server: &str) -> anyhow::Result<String> {
    let url = version_url(store, server);
    // The url carries the admin token; keep it out of error output
    let response = reqwest::get(&url)
        .await
        .map_err(reqwest::Error::without_url)?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("{} answered {}", server, status);
    }
    let body = response
        .text()
        .await
        .map_err(reqwest::Error::without_url)?;
    Ok(parse_version_body(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_version_error_hides_token() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let store = ConfigStore::with_defaults();
        store.set(keys::AUTH, "t0psecret");

        let err = current_version(&store, &format!("http://{}", addr))
            .await
            .unwrap_err();
        assert!(!format!("{:#}", err).contains("t0psecret"));
    }
}
