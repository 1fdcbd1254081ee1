use clap::Parser;
use tracing::info;
use tracing_subscriber::fmt;

use client::{Client, ClientConfig, ClientError};

const GREETINGS: &str = "$ Welcome to chat!\n$ Commands: /status, /users, /send <nickname> <path>, /accept, /reject, /quit";

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::parse();

    fmt()
        .compact() // use abbreviated log format
        .with_env_filter(config.env_filter())
        .with_thread_ids(true) // display thread id where event happens
        .init(); // set as default subscriber

    info!("Client starting, connecting to server {:?}", &config.server_addr);

    let client = Client::connect(&config).await?;
    println!("{}", GREETINGS);

    client.run().await
}
