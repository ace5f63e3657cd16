//! Environment reached over TCP

use async_trait::async_trait;
use morlglue_common::{
    Action, MessageType, Observation, Result, RewardObservationTerminal, Role,
};
use morlglue_network::{decode_string, encode_str, Connection, RecordCodec};

use super::{EnvironmentPort, PeerChannel};

/// Proxy for an Environment process connected to the glue
#[derive(Debug)]
pub struct RemoteEnvironment {
    channel: PeerChannel,
}

impl RemoteEnvironment {
    pub fn new(connection: Connection, codec: RecordCodec) -> Result<Self> {
        Ok(Self {
            channel: PeerChannel::new(Role::Environment, connection, codec)?,
        })
    }

    /// String payload of the last response, `None` if the payload was empty
    fn response_string(&self) -> Result<Option<Vec<u8>>> {
        let response = self.channel.response();
        if response.is_empty() {
            return Ok(None);
        }
        let (text, _) = decode_string(response, 0)?;
        Ok(Some(text))
    }
}

#[async_trait]
impl EnvironmentPort for RemoteEnvironment {
    async fn init(&mut self) -> Result<Option<Vec<u8>>> {
        self.channel.request();
        self.channel.exchange(MessageType::EnvInit).await?;
        self.response_string()
    }

    async fn start(&mut self) -> Result<Observation> {
        self.channel.request();
        self.channel.exchange(MessageType::EnvStart).await?;
        let (observation, _) = self.channel.codec().decode_owned(self.channel.response(), 0)?;
        Ok(observation)
    }

    async fn step(&mut self, action: &Action) -> Result<RewardObservationTerminal> {
        let codec = self.channel.codec();
        codec.encode(Some(action), self.channel.request(), 0)?;
        self.channel.exchange(MessageType::EnvStep).await?;

        let response = self.channel.response();
        let (terminal, offset) = response.read::<i32>(0)?;
        let (reward, offset) = codec.decode_owned(response, offset)?;
        let (observation, _) = codec.decode_owned(response, offset)?;
        Ok(RewardObservationTerminal {
            reward,
            observation,
            terminal: terminal == 1,
        })
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.channel.request();
        self.channel.exchange(MessageType::EnvCleanup).await
    }

    async fn message(&mut self, message: &[u8]) -> Result<Option<Vec<u8>>> {
        encode_str(message, self.channel.request(), 0)?;
        self.channel.exchange(MessageType::EnvMessage).await?;
        self.response_string()
    }

    async fn disconnect(&mut self) {
        self.channel.disconnect().await;
    }
}
