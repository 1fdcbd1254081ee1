use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::client_handler::ClientHandler;
use crate::server::ServerContext;
use crate::server_types::ConnId;

const COUNTER_SEED: u64 = 1;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct ServerListener;

impl ServerListener {

    // Accept loop over an already bound listener; one client task per connection
    pub async fn run(listener: TcpListener, ctx: ServerContext) -> io::Result<()> {
        info!("Server listening on {:?}", listener.local_addr()?);

        // Set up unique counter
        let counter = AtomicU64::new(COUNTER_SEED);

        loop {
            let (tcp_socket, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // e.g. out of file descriptors, the listener itself is still fine
                    error!("Unable to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let conn = ConnId(counter.fetch_add(1, Ordering::Relaxed));
            info!("Server received new client connection {:?} as {}", &addr, conn);

            let (tcp_read, tcp_write) = tcp_socket.into_split();
            ctx.delivery.attach(conn, addr, Box::new(tcp_write)).await;

            let handler = ClientHandler::new(conn, addr, tcp_read, ctx.clone());
            ClientHandler::spawn(handler);
        }
    }

    pub fn spawn_accept(listener: TcpListener, ctx: ServerContext) -> JoinHandle<io::Result<()>> {
        tokio::spawn(Self::run(listener, ctx))
    }
}
