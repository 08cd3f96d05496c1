use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use server::auth::LocalVerifier;
use server::content::SampleContentProvider;
use server::engine::{Engine, EngineConfig};
use server::network::Gateway;
use server::persistence::LogSink;

/// Parses command-line arguments, wires the collaborators and runs the
/// gateway and the engine loop side by side.
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
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let (engine, engine_tx) = Engine::new(
        EngineConfig::default(),
        Arc::new(SampleContentProvider::new()),
        Arc::new(LogSink),
    );

    let gateway = Gateway::bind(&address, Arc::new(LocalVerifier), engine_tx).await?;

    let engine_handle = tokio::spawn(engine.run());
    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            error!("gateway stopped: {}", e);
        }
    });

    tokio::select! {
        result = engine_handle => {
            if let Err(e) = result {
                error!("engine task panicked: {}", e);
            }
        }
        result = gateway_handle => {
            if let Err(e) = result {
                error!("gateway task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
