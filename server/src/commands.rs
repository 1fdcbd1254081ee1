//! Control commands, the `/` frames a client sends to the server itself.
//!
//! Commands are looked up by keyword in a [`CommandTable`]; the table ships
//! with `status` and `users` and accepts further handlers at startup.

use std::collections::HashMap;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use protocol::{FrameCodec, SYSTEM};
use tracing::{debug, info};

use crate::delivery::Delivery;
use crate::error::ServerError;
use crate::registry::Registry;
use crate::server_types::{ConnId, Target};

const USERS_MSG: &str = "Users currently online: ";

// what a command may touch while it runs
pub struct CommandContext {
    pub conn: ConnId,
    pub registry: Registry,
    pub delivery: Delivery,
    pub codec: FrameCodec,
}

#[async_trait]
pub trait ControlCommand: Send + Sync {
    async fn run(&self, ctx: &CommandContext) -> Result<(), ServerError>;
}

/// Broadcasts the nickname to address table to everyone.
pub struct Status;

#[async_trait]
impl ControlCommand for Status {
    async fn run(&self, ctx: &CommandContext) -> Result<(), ServerError> {
        let snapshot = ctx.registry.status_snapshot().await;
        let status = render_status(&snapshot);
        info!("{}", status);

        let frame = ctx.codec.encode(SYSTEM, status.as_bytes())?;
        ctx.delivery.broadcast(&frame, ctx.conn, Target::All).await;
        Ok(())
    }
}

/// Tells only the requester who is online.
pub struct Users;

#[async_trait]
impl ControlCommand for Users {
    async fn run(&self, ctx: &CommandContext) -> Result<(), ServerError> {
        let names = ctx.registry.names().await;
        let list = format!("{}{}", USERS_MSG, names.join(" "));

        let frame = ctx.codec.encode(SYSTEM, list.as_bytes())?;
        ctx.delivery.send(ctx.conn, &frame).await?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct CommandTable {
    commands: HashMap<String, Arc<dyn ControlCommand>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.insert("status", Status);
        table.insert("users", Users);
        table
    }

    pub fn insert(&mut self, keyword: &str, command: impl ControlCommand + 'static) {
        self.commands.insert(keyword.to_owned(), Arc::new(command));
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.commands.contains_key(keyword)
    }

    /// Runs the command registered for `keyword`. Unknown keywords are
    /// swallowed; returns whether anything ran.
    pub async fn dispatch(&self, keyword: &str, ctx: &CommandContext) -> Result<bool, ServerError> {
        match self.commands.get(keyword) {
            Some(command) => {
                command.run(ctx).await?;
                Ok(true)
            }
            None => {
                debug!("{} sent unknown control command {:?}", ctx.conn, keyword);
                Ok(false)
            }
        }
    }
}

pub fn render_status(snapshot: &[(String, SocketAddr)]) -> String {
    let mut status = format!("-+- {} online", snapshot.len());
    for (name, addr) in snapshot {
        let _ = write!(status, "\n    {} @ {}", name, addr);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::AsyncReadExt;

    #[test]
    fn test_render_status() {
        let snapshot = vec![
            ("alice".to_owned(), SocketAddr::from(([127, 0, 0, 1], 4001))),
            ("bob".to_owned(), SocketAddr::from(([10, 0, 0, 2], 4002))),
        ];

        assert_eq!(
            render_status(&snapshot),
            "-+- 2 online\n    alice @ 127.0.0.1:4001\n    bob @ 10.0.0.2:4002"
        );
        assert_eq!(render_status(&[]), "-+- 0 online");
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl ControlCommand for Counter {
        async fn run(&self, _ctx: &CommandContext) -> Result<(), ServerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn context(registry: &Registry, conn: ConnId) -> CommandContext {
        let codec = FrameCodec::new(4).unwrap();
        CommandContext {
            conn,
            registry: registry.clone(),
            delivery: Delivery::new(registry, codec),
            codec,
        }
    }

    #[tokio::test]
    async fn test_dispatch_custom_and_unknown() {
        let registry = Registry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = CommandTable::with_builtins();
        table.insert("ping", Counter(Arc::clone(&hits)));

        let ctx = context(&registry, ConnId(1));
        assert!(table.dispatch("ping", &ctx).await.unwrap());
        assert!(!table.dispatch("weather", &ctx).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(table.contains("status"));
        assert!(table.contains("users"));
    }

    #[tokio::test]
    async fn test_users_replies_to_requester() {
        let registry = Registry::new();
        let (near, mut far) = tokio::io::duplex(256);
        let conn = ConnId(1);
        let ctx = context(&registry, conn);
        ctx.delivery.attach(conn, SocketAddr::from(([127, 0, 0, 1], 4001)), Box::new(near)).await;
        registry.set_nickname(conn, "alice").await;

        let table = CommandTable::with_builtins();
        table.dispatch("users", &ctx).await.unwrap();

        let expected = FrameCodec::new(4)
            .unwrap()
            .encode(SYSTEM, b"Users currently online: alice")
            .unwrap();
        let mut buf = vec![0; expected.len()];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }
}
