//! Server configuration, from the command line with environment fallbacks

use clap::Parser;
use protocol::{FrameCodec, CHUNK_SIZE, DEFAULT_HEADER_LEN, DEFAULT_MAX_FRAME_LEN};
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;

const SERVER: &str = "127.0.0.1:1515";
const LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Parser)]
#[command(name = "relay-server")]
#[command(about = "Chat relay server with point to point file transfer")]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(long = "addr", env = "RELAY_ADDR", default_value = SERVER)]
    pub bind_addr: String,

    /// Width of every frame's length header, shared with all clients
    #[arg(long, env = "RELAY_HEADER_LEN", default_value_t = DEFAULT_HEADER_LEN)]
    pub header_len: usize,

    /// Raw read size while relaying a file stream
    #[arg(long, env = "RELAY_CHUNK_SIZE", default_value_t = CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Largest frame payload a client may announce
    #[arg(long, env = "RELAY_MAX_FRAME", default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,

    /// Log filter, e.g. `info` or `server=debug`
    #[arg(long, env = "RELAY_LOG", default_value = LOG_FILTER)]
    pub log: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SERVER.to_owned(),
            header_len: DEFAULT_HEADER_LEN,
            chunk_size: CHUNK_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            log: LOG_FILTER.to_owned(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn header_len(mut self, header_len: usize) -> Self {
        self.header_len = header_len;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn env_filter(&self) -> Result<EnvFilter, ServerError> {
        EnvFilter::try_new(&self.log)
            .map_err(|e| ServerError::Config(format!("bad log filter {:?}: {}", self.log, e)))
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        FrameCodec::new(self.header_len)?;

        if self.chunk_size == 0 {
            return Err(ServerError::Config("chunk size must be non-zero".to_owned()));
        }
        if self.max_frame_len == 0 {
            return Err(ServerError::Config("frame limit must be non-zero".to_owned()));
        }

        self.env_filter()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:1515");
        assert_eq!(config.header_len, 10);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_command_line() {
        let config = ServerConfig::try_parse_from([
            "relay-server",
            "--addr", "0.0.0.0:9000",
            "--header-len", "8",
            "--max-frame-len", "4096",
            "--log", "server=debug",
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.header_len, 8);
        assert_eq!(config.max_frame_len, 4096);
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ServerConfig::try_parse_from(["relay-server", "--header-len", "wide"]).is_err());

        assert!(matches!(
            ServerConfig::default().header_len(0).validate(),
            Err(ServerError::Protocol(_))
        ));
        assert!(matches!(ServerConfig::default().chunk_size(0).validate(), Err(ServerError::Config(_))));
        assert!(matches!(ServerConfig::default().max_frame_len(0).validate(), Err(ServerError::Config(_))));

        let chatty = ServerConfig { log: "server=chatty".to_owned(), ..ServerConfig::default() };
        assert!(matches!(chatty.validate(), Err(ServerError::Config(_))));
    }
}
