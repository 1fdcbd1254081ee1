//! Terminal chat session against the relay server.
//!
//! Reads frames from the server and lines from stdin in one `select!` loop.
//! File transfers are driven from here too: a `/send` walks through lookup,
//! offer and start, and an incoming start frame is followed by the raw file
//! bytes, which are written straight into the download directory.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use futures::SinkExt; // provides combinator methods like send/send_all on top of FramedWrite buf write and Sink trait
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::oneshot;
use tokio_stream::StreamExt; // provides combinator methods like next on to of FramedRead buf read and Stream trait
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, info, warn};

use protocol::{
    Frame, FrameCodec, TransferDescriptor, CONTROL, FILE_ACCEPT, FILE_OFFER, FILE_START, MESSAGE, SYSTEM,
    USER_LOOKUP,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::input::{self, Command};

const LINES_MAX_LEN: usize = 1024;
const YES: &str = "y";
const NO: &str = "n";
const FALLBACK_NAME: &str = "download.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    LookingUp,
    Offered,
}

#[derive(Debug)]
struct Outgoing {
    path: PathBuf,
    descriptor: TransferDescriptor,
    stage: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Client<R, W> {
    fr: FramedRead<R, FrameCodec>,
    fw: FramedWrite<W, FrameCodec>,
    download_dir: PathBuf,
    outgoing: Option<Outgoing>,
    offer: Option<TransferDescriptor>,
    // frames that arrived while a file was uploading
    backlog: VecDeque<Frame>,
}

impl Client<OwnedReadHalf, OwnedWriteHalf> {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let codec = config.codec()?;
        let stream = TcpStream::connect(&config.server_addr).await
            .map_err(|e| { error!("Unable to connect to server"); e })?;

        // split tcpstream so we can hand off to r & w
        let (read, write) = stream.into_split();
        Ok(Self::new(read, write, codec, config.download_dir.clone()))
    }
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(read: R, write: W, codec: FrameCodec, download_dir: PathBuf) -> Self {
        Self {
            fr: FramedRead::new(read, codec),
            fw: FramedWrite::new(write, codec),
            download_dir,
            outgoing: None,
            offer: None,
            backlog: VecDeque::new(),
        }
    }

    pub async fn run(mut self) -> Result<(), ClientError> {
        let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new_with_max_length(LINES_MAX_LEN));

        loop {
            while let Some(frame) = self.backlog.pop_front() {
                self.handle_frame(frame).await?;
            }

            select! {
                value = self.fr.next() => match value {
                    Some(frame) => self.handle_frame(frame?).await?,
                    None => {
                        println!(">>> Server has closed the connection");
                        return Ok(());
                    }
                },
                line = lines.next() => match line {
                    Some(Ok(line)) => match self.handle_line(&line).await {
                        Ok(Flow::Quit) => return Ok(()),
                        Ok(Flow::Continue) => (),
                        Err(ClientError::Usage(usage)) => println!("$ usage: {}", usage),
                        Err(e) => return Err(e),
                    },
                    Some(Err(e)) => warn!("Skipping input line: {}", e),
                    None => {
                        info!("Input closed, leaving");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn send(&mut self, tag: u8, payload: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.fw.send(Frame::new(tag, payload)).await?;
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<Flow, ClientError> {
        let command = match input::parse_line(line)? {
            Some(command) => command,
            None => return Ok(Flow::Continue),
        };

        match command {
            // chat lines double as the nickname while logging in
            Command::Chat(text) => self.send(MESSAGE, text).await?,
            Command::Control(keyword) => self.send(CONTROL, keyword).await?,
            Command::Send { nickname, path } => self.start_send(nickname, path).await?,
            Command::Accept => self.answer_offer(true).await?,
            Command::Reject => self.answer_offer(false).await?,
            Command::Quit => {
                info!("Session terminated by user...");
                return Ok(Flow::Quit);
            }
        }

        Ok(Flow::Continue)
    }

    async fn start_send(&mut self, nickname: String, path: PathBuf) -> Result<(), ClientError> {
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                println!("$ no such file {}", path.display());
                return Ok(());
            }
        };

        let name = file_name(&path);
        self.outgoing = Some(Outgoing {
            path,
            descriptor: TransferDescriptor::new(size, name),
            stage: Stage::LookingUp,
        });

        self.send(USER_LOOKUP, nickname).await
    }

    async fn answer_offer(&mut self, accept: bool) -> Result<(), ClientError> {
        match self.offer.take() {
            Some(descriptor) => {
                debug!("answering offer {} with {}", descriptor, accept);
                self.send(FILE_ACCEPT, if accept { YES } else { NO }).await
            }
            None => {
                println!("$ no file offer to answer");
                Ok(())
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), ClientError> {
        debug!("received server frame {:?}", frame);

        match frame.tag {
            USER_LOOKUP => self.on_lookup(&frame).await?,
            FILE_OFFER => match TransferDescriptor::parse(&frame.payload) {
                Ok(descriptor) => {
                    println!(">>> File offered: {} ({} bytes). /accept or /reject", descriptor.name, descriptor.size);
                    self.offer = Some(descriptor);
                }
                Err(e) => warn!("Ignoring malformed offer: {}", e),
            },
            FILE_ACCEPT => self.on_answer(&frame).await?,
            FILE_START => {
                let descriptor = TransferDescriptor::parse(&frame.payload)?;
                let path = receive_file(&mut self.fr, &self.download_dir, &descriptor).await?;
                println!(">>> Received {} ({} bytes)", path.display(), descriptor.size);
            }
            SYSTEM => println!(">>> {}", frame.text()),
            _ => println!("> {}", frame.text()),
        }

        Ok(())
    }

    async fn on_lookup(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let found = frame.text() == "True";

        match self.outgoing.take() {
            Some(mut outgoing) if outgoing.stage == Stage::LookingUp => {
                if found {
                    self.send(FILE_OFFER, outgoing.descriptor.to_payload()).await?;
                    println!("$ offered {}, waiting for an answer", outgoing.descriptor.name);
                    outgoing.stage = Stage::Offered;
                    self.outgoing = Some(outgoing);
                } else {
                    println!("$ user not found, send cancelled");
                }
            }
            other => {
                self.outgoing = other;
                debug!("unsolicited lookup answer {}", found);
            }
        }

        Ok(())
    }

    async fn on_answer(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let outgoing = match self.outgoing.take() {
            Some(outgoing) if outgoing.stage == Stage::Offered => outgoing,
            other => {
                self.outgoing = other;
                debug!("unsolicited offer answer");
                return Ok(());
            }
        };

        if frame.text() != YES {
            println!("$ {} was declined", outgoing.descriptor.name);
            return Ok(());
        }

        let sent = self.send_file(&outgoing).await?;
        println!("$ sent {} ({} bytes)", outgoing.descriptor.name, sent);
        Ok(())
    }

    // start frame, then the file's bytes unframed. Incoming frames are still
    // read meanwhile, so two clients sending to each other both get through.
    async fn send_file(&mut self, outgoing: &Outgoing) -> Result<u64, ClientError> {
        let size = outgoing.descriptor.size;
        let file = File::open(&outgoing.path).await?;

        self.send(FILE_START, outgoing.descriptor.to_payload()).await?;

        let Self { fr, fw, download_dir, backlog, .. } = self;
        let (done_tx, done_rx) = oneshot::channel();

        let (sent, read) = tokio::join!(
            upload(fw.get_mut(), file, size, done_tx),
            read_while_uploading(fr, download_dir.as_path(), backlog, done_rx),
        );
        read?;
        let sent = sent?;

        if sent < size {
            // the server is still expecting bytes, nothing sane can follow
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while sending").into());
        }
        Ok(sent)
    }
}

async fn upload<W>(sink: &mut W, file: File, size: u64, done: oneshot::Sender<()>) -> Result<u64, ClientError>
where
    W: AsyncWrite + Unpin,
{
    let sent = tokio::io::copy(&mut file.take(size), sink).await;
    let _ = done.send(());

    let sent = sent?;
    sink.flush().await?;
    Ok(sent)
}

// files sent to us are received on the spot, anything else waits in the backlog
async fn read_while_uploading<R>(fr: &mut FramedRead<R, FrameCodec>, download_dir: &Path,
                                 backlog: &mut VecDeque<Frame>,
                                 mut done: oneshot::Receiver<()>) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    loop {
        // whatever has already arrived is taken before the upload counts as over
        select! {
            biased;
            value = fr.next() => match value {
                Some(frame) => {
                    let frame = frame?;
                    if frame.tag == FILE_START {
                        let descriptor = TransferDescriptor::parse(&frame.payload)?;
                        let path = receive_file(fr, download_dir, &descriptor).await?;
                        println!(">>> Received {} ({} bytes)", path.display(), descriptor.size);
                    } else {
                        backlog.push_back(frame);
                    }
                }
                None => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server closed mid-upload").into());
                }
            },
            _ = &mut done => return Ok(()),
        }
    }
}

async fn receive_file<R>(fr: &mut FramedRead<R, FrameCodec>, download_dir: &Path,
                         descriptor: &TransferDescriptor) -> Result<PathBuf, ClientError>
where
    R: AsyncRead + Unpin,
{
    let path = download_dir.join(file_name(Path::new(&descriptor.name)));
    let mut file = File::create(&path).await?;

    // bytes the frame decoder already pulled in belong to the file
    let buffered = fr.read_buffer_mut();
    let take = buffered_share(buffered.len(), descriptor.size);
    let head = buffered.split_to(take);
    file.write_all(&head).await?;

    let remaining = descriptor.size - take as u64;
    let copied = tokio::io::copy(&mut fr.get_mut().take(remaining), &mut file).await?;
    file.flush().await?;

    if copied < remaining {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server closed mid-transfer").into());
    }
    Ok(path)
}

// how much of a `size` byte stream is already buffered, without narrowing `size`
fn buffered_share(buffered: usize, size: u64) -> usize {
    usize::try_from(size).map_or(buffered, |size| buffered.min(size))
}

// only the final component, never a path chosen by the peer
fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_owned())
}
