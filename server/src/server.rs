use std::sync::Arc;

use protocol::FrameCodec;

use crate::commands::CommandTable;
use crate::config::ServerConfig;
use crate::delivery::Delivery;
use crate::error::ServerError;
use crate::registry::Registry;
use crate::transfer::TransferRelay;

// everything a client task shares with the others
#[derive(Clone)]
pub struct ServerContext {
    pub registry: Registry,
    pub delivery: Delivery,
    pub relay: TransferRelay,
    pub commands: Arc<CommandTable>,
    pub codec: FrameCodec,
}

impl ServerContext {
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let codec = FrameCodec::new(config.header_len)?.with_max_frame_len(config.max_frame_len);
        let registry = Registry::new();
        let delivery = Delivery::new(&registry, codec);
        let relay = TransferRelay::new(&registry, &delivery, codec, config.chunk_size);

        Ok(Self {
            registry,
            delivery,
            relay,
            commands: Arc::new(CommandTable::with_builtins()),
            codec,
        })
    }

    pub fn with_commands(mut self, commands: CommandTable) -> Self {
        self.commands = Arc::new(commands);
        self
    }
}
