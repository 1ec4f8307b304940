use clap::Parser;
use std::sync::Arc;
use termpoll::config::{self, Cli};
use termpoll::server::EventLoop;
use termpoll::session::NativeSpawner;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = config::Config::load(&cli)?;
    init_logging(&config.logging);

    let event_loop = EventLoop::bind(config, Arc::new(NativeSpawner)).await?;
    event_loop.run().await?;
    Ok(())
}

fn init_logging(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(logging.level.clone());
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
