use anyhow::Result;
use clap::{Parser, Subcommand};
use mingle_core::BiometricStore;
use mingle_gateway::FeedsClient;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mingle", about = "Mingle event-kiosk operator CLI")]
struct Cli {
    /// Path to the JSON user store (default: $MINGLE_STORE_PATH or
    /// ~/.local/share/mingle/users.json)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Base URL of the spreadsheet feed API (default: $MINGLE_FEEDS_URL)
    #[arg(long)]
    feeds_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage enrolled users
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    /// Probe the event feeds
    Feeds {
        #[command(subcommand)]
        command: FeedsCommand,
    },
    /// Show store path and profile count
    Status,
    /// List available camera devices
    Devices,
}

#[derive(Subcommand)]
enum UsersCommand {
    /// List enrolled users
    List,
    /// Remove one enrolled user
    Remove {
        /// Profile ID to remove
        id: String,
    },
    /// Erase every enrolled user
    Clear {
        /// Required confirmation flag
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum FeedsCommand {
    /// Fetch the attendee list
    Attendees,
    /// Fetch the world chat
    World,
    /// Fetch the MC knowledge base
    Kb,
}

fn store_path(cli_arg: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path;
    }
    if let Ok(path) = std::env::var("MINGLE_STORE_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".local/share/mingle/users.json")
}

fn feeds_client(url: Option<String>) -> Result<FeedsClient> {
    let url = url
        .or_else(|| std::env::var("MINGLE_FEEDS_URL").ok())
        .ok_or_else(|| {
            anyhow::anyhow!("no feeds URL; pass --feeds-url or set MINGLE_FEEDS_URL")
        })?;
    Ok(FeedsClient::new(url))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let path = store_path(cli.store);

    match cli.command {
        Commands::Users { command } => {
            let mut store = BiometricStore::load(&path)?;
            match command {
                UsersCommand::List => {
                    if store.is_empty() {
                        println!("no users enrolled");
                    }
                    for profile in store.profiles() {
                        println!(
                            "{}  {}  ({} messages)",
                            profile.id,
                            profile.name,
                            profile.history.len()
                        );
                    }
                }
                UsersCommand::Remove { id } => {
                    if store.remove(&id)? {
                        println!("removed {id}");
                    } else {
                        println!("no such profile: {id}");
                    }
                }
                UsersCommand::Clear { yes } => {
                    if !yes {
                        anyhow::bail!("this erases every enrolled user; re-run with --yes");
                    }
                    let count = store.len();
                    store.clear()?;
                    println!("erased {count} users");
                }
            }
        }
        Commands::Feeds { command } => {
            let feeds = feeds_client(cli.feeds_url)?;
            match command {
                FeedsCommand::Attendees => {
                    for attendee in feeds.attendees().await {
                        println!("{}  {}  {}", attendee.id, attendee.name, attendee.role);
                    }
                }
                FeedsCommand::World => {
                    for msg in feeds.world_chat().await {
                        println!("{}: {}", msg.user_name, msg.text);
                    }
                }
                FeedsCommand::Kb => {
                    for row in feeds.knowledge_base().await {
                        println!("{}", serde_json::to_string(&row)?);
                    }
                }
            }
        }
        Commands::Status => {
            let store = BiometricStore::load(&path)?;
            println!("store: {}", path.display());
            println!("users: {}", store.len());
        }
        Commands::Devices => {
            let devices = mingle_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("no capture devices found");
            }
            for dev in devices {
                println!("{}  {}  ({})", dev.path, dev.name, dev.driver);
            }
        }
    }

    Ok(())
}
