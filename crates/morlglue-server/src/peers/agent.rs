//! Agent reached over TCP

use async_trait::async_trait;
use morlglue_common::{Action, MessageType, Observation, Result, Reward, Role};
use morlglue_network::{decode_string, encode_str, Connection, RecordCodec};

use super::{AgentPort, PeerChannel};

/// Proxy for an Agent process connected to the glue
#[derive(Debug)]
pub struct RemoteAgent {
    channel: PeerChannel,
}

impl RemoteAgent {
    pub fn new(connection: Connection, codec: RecordCodec) -> Result<Self> {
        Ok(Self {
            channel: PeerChannel::new(Role::Agent, connection, codec)?,
        })
    }

    fn decode_action(&self) -> Result<Action> {
        let (action, _) = self.channel.codec().decode_owned(self.channel.response(), 0)?;
        Ok(action)
    }
}

#[async_trait]
impl AgentPort for RemoteAgent {
    async fn init(&mut self, task_spec: &[u8]) -> Result<()> {
        encode_str(task_spec, self.channel.request(), 0)?;
        self.channel.exchange(MessageType::AgentInit).await
    }

    async fn start(&mut self, observation: &Observation) -> Result<Action> {
        let codec = self.channel.codec();
        codec.encode(Some(observation), self.channel.request(), 0)?;
        self.channel.exchange(MessageType::AgentStart).await?;
        self.decode_action()
    }

    async fn step(&mut self, reward: &Reward, observation: &Observation) -> Result<Action> {
        let codec = self.channel.codec();
        let buffer = self.channel.request();
        let offset = codec.encode(Some(reward), buffer, 0)?;
        codec.encode(Some(observation), buffer, offset)?;
        self.channel.exchange(MessageType::AgentStep).await?;
        self.decode_action()
    }

    async fn end(&mut self, reward: &Reward) -> Result<()> {
        let codec = self.channel.codec();
        codec.encode(Some(reward), self.channel.request(), 0)?;
        self.channel.exchange(MessageType::AgentEnd).await
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.channel.request();
        self.channel.exchange(MessageType::AgentCleanup).await
    }

    async fn message(&mut self, message: &[u8]) -> Result<Option<Vec<u8>>> {
        encode_str(message, self.channel.request(), 0)?;
        self.channel.exchange(MessageType::AgentMessage).await?;

        let response = self.channel.response();
        if response.is_empty() {
            return Ok(None);
        }
        let (text, _) = decode_string(response, 0)?;
        Ok(Some(text))
    }

    async fn disconnect(&mut self) {
        self.channel.disconnect().await;
    }
}
