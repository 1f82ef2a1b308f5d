use clap::Parser;
use log::info;
use relay::config::RelayConfig;
use relay::network::RelayServer;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the relay socket to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value = "4433")]
    port: u16,

    /// Seconds of silence before a session is reaped
    #[arg(long, default_value = "30")]
    session_timeout: u64,

    /// Seconds between liveness sweeps
    #[arg(long, default_value = "5")]
    sweep_interval: u64,

    /// Maximum concurrent sessions
    #[arg(long, default_value = "1024")]
    max_sessions: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = RelayConfig {
        session_timeout: Duration::from_secs(args.session_timeout),
        sweep_interval: Duration::from_secs(args.sweep_interval),
        max_sessions: args.max_sessions,
        ..RelayConfig::default()
    };

    let addr = format!("{}:{}", args.host, args.port);
    let mut server = RelayServer::new(&addr, config).await?;

    info!("Starting relay on {}", addr);

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
