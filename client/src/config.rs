use std::path::PathBuf;

use clap::Parser;
use protocol::{FrameCodec, DEFAULT_HEADER_LEN, DEFAULT_MAX_FRAME_LEN};
use tracing_subscriber::EnvFilter;

use crate::error::ClientError;

const SERVER: &str = "127.0.0.1:1515";
const LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, Parser)]
#[command(name = "relay-client")]
#[command(about = "Terminal client for the chat relay")]
pub struct ClientConfig {
    /// Server to connect to
    #[arg(env = "RELAY_ADDR", default_value = SERVER)]
    pub server_addr: String,

    #[arg(long, env = "RELAY_HEADER_LEN", default_value_t = DEFAULT_HEADER_LEN)]
    pub header_len: usize,

    #[arg(long, env = "RELAY_MAX_FRAME", default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,

    /// Where received files are written
    #[arg(long, env = "RELAY_DOWNLOAD_DIR", default_value = ".")]
    pub download_dir: PathBuf,

    #[arg(long, env = "RELAY_LOG", default_value = LOG_FILTER)]
    pub log: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SERVER.to_owned(),
            header_len: DEFAULT_HEADER_LEN,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            download_dir: PathBuf::from("."),
            log: LOG_FILTER.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn codec(&self) -> Result<FrameCodec, ClientError> {
        Ok(FrameCodec::new(self.header_len)?.with_max_frame_len(self.max_frame_len))
    }

    // a bad filter falls back to the default rather than refusing to start
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log).unwrap_or_else(|_| EnvFilter::new(LOG_FILTER))
    }
}
