use clap::Parser;
use server::identity::{DisconnectPolicy, SharedSecretVerifier};
use server::network::{Server, ServerConfig};
use server::persistence::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Parses command-line arguments and runs the orchestrator until
/// Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Tick rate (simulation steps per second)
        #[clap(short, long, default_value = "60")]
        tick_rate: u32,
        /// Score that ends a match
        #[clap(short, long, default_value = "5")]
        win_score: u32,
        /// What happens to a disconnected player's seat: never, immediate, or grace
        #[clap(long, default_value = "never")]
        disconnect_policy: String,
        /// Seconds before a seat is vacated under the grace policy
        #[clap(long, default_value = "10")]
        grace_secs: u64,
        /// Shared secret for session token verification
        #[clap(long, default_value = "dev-secret")]
        secret: String,
    }

    let args = Args::parse();

    let disconnect_policy = match args.disconnect_policy.as_str() {
        "never" => DisconnectPolicy::Never,
        "immediate" => DisconnectPolicy::Immediate,
        "grace" => DisconnectPolicy::Grace(Duration::from_secs(args.grace_secs)),
        other => return Err(format!("unknown disconnect policy {:?}", other).into()),
    };

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        win_score: args.win_score,
        disconnect_policy,
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        config,
        Arc::new(SharedSecretVerifier::new(args.secret)),
        Arc::new(MemoryStore::new()),
    )
    .await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
