//! CLI for kempub
//!
//! Subcommands:
//! - `server`: run the broker until interrupted
//! - `keygen`: generate the broker's Kyber768 key pair as PEM files
//! - `useradd`: write a user record directly into the store and print the
//!   private-key PEM once (bootstrap path for the first admin)

use clap::Parser;
use kempub::App;
use kempub_config::load_config;
use kempub_persistence::Store;
use kempub_protocol::keys;
use kempub_users::UserDirectory;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kempub")]
enum Command {
    /// Start the broker
    Server,
    /// Generate the broker key pair at the configured PEM paths
    Keygen,
    /// Create a user in the store; prints the private key PEM exactly once
    Useradd {
        name: String,
        /// Grant the administrative flag
        #[arg(long)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
            }
        }
        Command::Keygen => {
            if let Err(e) = run_keygen() {
                error!("Keygen failed: {}", e);
            }
        }
        Command::Useradd { name, admin } => {
            if let Err(e) = run_useradd(&name, admin).await {
                error!("Useradd failed: {}", e);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    kempub_utils::logging::init(&config.logging.level);

    let app = App::start(&config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    app.shutdown().await;

    Ok(())
}

fn run_keygen() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    kempub_utils::logging::init(&config.logging.level);

    let (public, private) = keys::generate_key_pair();
    public.save(&config.crypto.public_key_file)?;
    private.save(&config.crypto.private_key_file)?;

    println!(
        "wrote {} and {}",
        config.crypto.public_key_file, config.crypto.private_key_file
    );
    Ok(())
}

async fn run_useradd(name: &str, admin: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    kempub_utils::logging::init(&config.logging.level);

    let store = Store::open(&config.storage.db_file).await?;
    let users = UserDirectory::new(store.clone());
    users.start();

    let result = users.add_user(name, admin);
    store.shutdown().await;

    // The private key is shown exactly once; there is no second copy.
    println!("{}", result?);
    Ok(())
}
