use clap::Parser;
use tokio::signal;
use tracing::info;

mod cli;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let args = cli::Cli::parse();

    tokio::select! {
        result = cli::execute(args) => {
            if let Err(e) = result {
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }
}
