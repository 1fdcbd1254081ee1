use std::net::SocketAddr;

use protocol::{Frame, FrameCodec, CONTROL, FILE_ACCEPT, FILE_OFFER, FILE_START, MESSAGE, SYSTEM, USER_LOOKUP};
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::commands::CommandContext;
use crate::error::ServerError;
use crate::server::ServerContext;
use crate::server_types::{ConnId, ConnState, Target};

pub const PROMPT: &str = "-+- Enter nickname:";
pub const NAME_TAKEN: &str = "=!= They're already here! Pick something else:";
pub const CANCELLED: &str = "x-x Send file cancelled. Continue chatting.";
const USER_JOINED: &str = "{} is in the house!";
const CANCEL: &str = "cancel";

// Handles server communication from one client, from login until it leaves
// Essentially this models a client actor on the server side
pub struct ClientHandler<R> {
    conn: ConnId,
    addr: SocketAddr,
    reader: FramedRead<R, FrameCodec>,
    ctx: ServerContext,
    state: ConnState,
}

impl<R> ClientHandler<R>
where
    R: AsyncRead + Unpin + Send + Sync + 'static,
{
    pub fn new(conn: ConnId, addr: SocketAddr, read: R, ctx: ServerContext) -> Self {
        Self {
            conn,
            addr,
            reader: FramedRead::new(read, ctx.codec),
            ctx,
            state: ConnState::AwaitingNickname,
        }
    }

    // Spawn tokio task to handle socket reads from this client
    pub fn spawn(h: ClientHandler<R>) -> JoinHandle<()> {
        tokio::spawn(h.run())
    }

    /// Drives the connection to completion. The registry has forgotten the
    /// connection by the time this returns, and the read half is dropped here.
    pub async fn run(mut self) {
        let result = match self.register().await {
            Ok(true) => self.handle_read().await,
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };

        match result {
            Err(e) if !e.is_disconnect() => warn!("Closing {} ({}): {}", self.conn, self.addr, e),
            Err(e) => debug!("{} connection error: {}", self.conn, e),
            Ok(()) => (),
        }

        self.process_disconnect().await;
    }

    // Login: prompt until the client offers a free nickname. Returns false if
    // the client left first.
    //
    // The login frame's type byte is a marker with no meaning and is discarded;
    // only this read ignores it, every later frame is dispatched on it.
    async fn register(&mut self) -> Result<bool, ServerError> {
        self.reply(Frame::system(PROMPT)).await?;

        loop {
            let frame = match self.reader.next().await {
                Some(frame) => frame?,
                None => return Ok(false),
            };

            let name = frame.text().trim().to_owned();

            if self.ctx.registry.set_nickname(self.conn, &name).await {
                self.state = ConnState::Active;
                info!("{} ({}) joined as {}", self.conn, self.addr, name);

                let joined = USER_JOINED.replace("{}", &name);
                self.notify(&joined, Target::All).await?;
                return Ok(true);
            }

            info!("{} asked for unavailable name {:?}", self.conn, name);
            self.reply(Frame::system(NAME_TAKEN)).await?;
        }
    }

    // Loop to handle ongoing client msgs to server
    async fn handle_read(&mut self) -> Result<(), ServerError> {
        loop {
            let frame = match self.reader.next().await {
                Some(frame) => frame?,
                None => return Ok(()),
            };

            // a failed write elsewhere may already have dropped us
            if !self.ctx.registry.contains(self.conn).await {
                debug!("{} no longer registered", self.conn);
                return Ok(());
            }

            debug!("server received from {}: {:?}", self.conn, frame);
            self.dispatch(frame).await?;
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<(), ServerError> {
        match frame.tag {
            CONTROL => self.control(&frame).await,
            MESSAGE => self.relay(frame).await,
            USER_LOOKUP => self.user_lookup(&frame).await,
            FILE_OFFER => self.ctx.relay.offer(self.conn, &frame).await,
            FILE_ACCEPT => self.ctx.relay.accept(self.conn, &frame).await,
            FILE_START => {
                self.ctx.relay.stream(self.conn, &frame, &mut self.reader).await?;
                Ok(())
            }
            // unknown but well-formed types relay like chat
            tag => {
                debug!("{} relaying unrecognized type {:?}", self.conn, tag as char);
                self.relay(frame).await
            }
        }
    }

    async fn control(&self, frame: &Frame) -> Result<(), ServerError> {
        let keyword = frame.text();
        let ctx = CommandContext {
            conn: self.conn,
            registry: self.ctx.registry.clone(),
            delivery: self.ctx.delivery.clone(),
            codec: self.ctx.codec,
        };

        self.ctx.commands.dispatch(keyword.trim(), &ctx).await?;
        Ok(())
    }

    async fn relay(&self, frame: Frame) -> Result<(), ServerError> {
        let bytes = self.ctx.codec.encode(frame.tag, &frame.payload)?;
        self.ctx.delivery.broadcast(&bytes, self.conn, Target::Others).await;
        Ok(())
    }

    async fn user_lookup(&self, frame: &Frame) -> Result<(), ServerError> {
        let query = frame.text();

        if query == CANCEL {
            return self.reply(Frame::system(CANCELLED)).await;
        }

        let found = self.ctx.registry.lookup_user(self.conn, &query).await;
        info!("{} looked up {:?}: {}", self.conn, query, found);

        let answer = if found { "True" } else { "False" };
        self.reply(Frame::new(USER_LOOKUP, answer.as_bytes())).await
    }

    async fn reply(&self, frame: Frame) -> Result<(), ServerError> {
        let bytes = self.ctx.codec.encode(frame.tag, &frame.payload)?;
        self.ctx.delivery.send(self.conn, &bytes).await?;
        Ok(())
    }

    async fn notify(&self, text: &str, target: Target) -> Result<(), ServerError> {
        let bytes = self.ctx.codec.encode(SYSTEM, text.as_bytes())?;
        self.ctx.delivery.broadcast(&bytes, self.conn, target).await;
        Ok(())
    }

    // process client disconnection event, the departure notice goes out
    // once whichever side noticed first removes the connection
    async fn process_disconnect(&mut self) {
        let last = std::mem::replace(&mut self.state, ConnState::Closed);

        match self.ctx.delivery.depart(self.conn).await {
            Some(name) => info!("User {} has left ({})", name, self.addr),
            None if last == ConnState::AwaitingNickname => {
                info!("{} ({}) left before picking a nickname", self.conn, self.addr)
            }
            None => info!("Remote {:?} has closed connection", self.addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncWriteExt;

    use crate::config::ServerConfig;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_handler_logs_in_and_leaves() {
        let ctx = ServerContext::new(&ServerConfig::default()).unwrap();
        let codec = ctx.codec;
        let addr = SocketAddr::from(([127, 0, 0, 1], 9001));
        let conn = ConnId(1);

        let (to_client, mut from_server) = tokio::io::duplex(1024);
        let (mut to_server, from_client) = tokio::io::duplex(1024);
        ctx.delivery.attach(conn, addr, Box::new(to_client)).await;
        let task = ClientHandler::spawn(ClientHandler::new(conn, addr, from_client, ctx.clone()));

        let mut fr = FramedRead::new(&mut from_server, codec);
        assert_eq!(fr.next().await.unwrap().unwrap(), Frame::system(PROMPT));

        to_server.write_all(&codec.encode(MESSAGE, b"dana").unwrap()).await.unwrap();
        assert_eq!(fr.next().await.unwrap().unwrap().text(), "dana is in the house!");
        assert!(ctx.registry.contains(conn).await);

        drop(to_server);
        task.await.unwrap();
        assert!(!ctx.registry.contains(conn).await);
        assert!(fr.next().await.is_none());
    }
}
