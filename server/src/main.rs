use clap::Parser;
use tokio::net::TcpListener;

use tracing::{error, info};
use tracing_subscriber::fmt;

use server::{ServerConfig, ServerContext, ServerError, ServerListener};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let config = ServerConfig::parse();
    config.validate()?;

    fmt()
        .compact()
        .with_env_filter(config.env_filter()?)
        .init();

    info!("Server starting.. {:?}", &config.bind_addr);

    let listener = TcpListener::bind(&config.bind_addr).await
        .map_err(|e| { error!("Unable to bind to server address"); e })?;

    let ctx = ServerContext::new(&config)?;
    ServerListener::run(listener, ctx).await?;

    Ok(())
}
