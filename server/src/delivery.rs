use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use protocol::{FrameCodec, SYSTEM};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::outbound::{self, Outbound};
use crate::registry::Registry;
use crate::server_types::{ClientWriter, ConnId, Target};

const USER_LEFT: &str = "{} has left";

// handles msg delivery back to clients
#[derive(Clone)]
pub struct Delivery {
    registry: Registry,
    codec: FrameCodec,
}

impl Delivery {
    pub fn new(registry: &Registry, codec: FrameCodec) -> Self {
        Delivery {
            registry: registry.clone(),
            codec,
        }
    }

    /// Registers a freshly accepted connection and spawns the task that
    /// writes its queue to `writer`. A failed write counts as the client
    /// leaving.
    pub async fn attach(&self, conn: ConnId, addr: SocketAddr, writer: ClientWriter) -> JoinHandle<()> {
        let (outbound, rx) = Outbound::channel();
        self.registry.register(conn, addr, outbound).await;

        let delivery = self.clone();
        tokio::spawn(async move {
            if let Err(e) = outbound::drain(rx, writer).await {
                debug!("Unable to write to {}: {}", conn, e);
                if let Some(name) = delivery.depart(conn).await {
                    info!("User {} dropped after failed write", name);
                }
            }
        })
    }

    /// Queues `bytes` for every connection selected by `target`, returning
    /// how many were reached. Delivery order per recipient follows the order
    /// in which the registry lock was taken.
    pub async fn broadcast(&self, bytes: &[u8], origin: ConnId, target: Target) -> usize {
        let bytes = Bytes::copy_from_slice(bytes);
        let state = self.registry.lock().await;

        let mut delivered = 0;
        for conn in state.recipients(origin, target) {
            if let Some(out) = state.outbound(conn) {
                if out.push(bytes.clone(), None) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Queues raw stream bytes for the single connection `target` names,
    /// holding `credit` against its backlog until they are written.
    pub async fn forward(&self, bytes: Bytes, origin: ConnId, target: Target,
                         credit: Option<OwnedSemaphorePermit>) -> bool {
        let state = self.registry.lock().await;

        match state.recipients(origin, target).first() {
            Some(conn) => state.outbound(*conn).map_or(false, |out| out.push(bytes, credit)),
            None => false,
        }
    }

    /// Queues `bytes` for a single connection, named or still logging in.
    pub async fn send(&self, conn: ConnId, bytes: &[u8]) -> io::Result<()> {
        let state = self.registry.lock().await;

        match state.outbound(conn) {
            Some(out) if out.push(Bytes::copy_from_slice(bytes), None) => Ok(()),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "connection already removed")),
        }
    }

    /// Removes `conn` and, if it had a nickname, tells everyone left. Only
    /// the first caller for a connection gets the nickname back.
    pub async fn depart(&self, conn: ConnId) -> Option<String> {
        let mut state = self.registry.lock().await;
        let name = state.remove(conn)?;

        match self.codec.encode(SYSTEM, USER_LEFT.replace("{}", &name).as_bytes()) {
            Ok(notice) => {
                let notice = Bytes::from(notice);
                for other in state.recipients(conn, Target::Others) {
                    if let Some(out) = state.outbound(other) {
                        out.push(notice.clone(), None);
                    }
                }
            }
            Err(e) => debug!("Unable to announce {} leaving: {}", name, e),
        }

        Some(name)
    }
}
