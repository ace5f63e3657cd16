//! Agent and Environment ports
//!
//! The session drives its two peers through [`AgentPort`] and
//! [`EnvironmentPort`]. The remote implementations forward every call as one
//! tagged request over TCP and expect the answer under the same tag.

mod agent;
mod environment;

pub use agent::RemoteAgent;
pub use environment::RemoteEnvironment;

use async_trait::async_trait;
use morlglue_common::{
    Action, GlueError, MessageType, Observation, Result, Reward, RewardObservationTerminal, Role,
    DEFAULT_BUFFER_CAPACITY,
};
use morlglue_network::{Connection, RecordCodec, WireBuffer};
use tracing::{debug, error};

use crate::registry::close_connection;

/// Operations the glue invokes on an Agent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentPort: Send {
    /// Hand over the Environment's task specification
    async fn init(&mut self, task_spec: &[u8]) -> Result<()>;

    /// First action of an episode
    async fn start(&mut self, observation: &Observation) -> Result<Action>;

    /// Next action given the last reward and the new observation
    async fn step(&mut self, reward: &Reward, observation: &Observation) -> Result<Action>;

    /// Episode ended with `reward`
    async fn end(&mut self, reward: &Reward) -> Result<()>;

    async fn cleanup(&mut self) -> Result<()>;

    /// Opaque message exchange; `None` when the Agent sent no answer
    async fn message(&mut self, message: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Tell the Agent the run is over and drop the connection
    async fn disconnect(&mut self);
}

/// Operations the glue invokes on an Environment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvironmentPort: Send {
    /// Task specification, `None` when the Environment sent none
    async fn init(&mut self) -> Result<Option<Vec<u8>>>;

    /// First observation of an episode
    async fn start(&mut self) -> Result<Observation>;

    /// Apply `action`
    async fn step(&mut self, action: &Action) -> Result<RewardObservationTerminal>;

    async fn cleanup(&mut self) -> Result<()>;

    /// Opaque message exchange; `None` when the Environment sent no answer
    async fn message(&mut self, message: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Tell the Environment the run is over and drop the connection
    async fn disconnect(&mut self);
}

/// Request/response channel to one remote peer, with its own buffer
#[derive(Debug)]
pub(crate) struct PeerChannel {
    role: Role,
    connection: Option<Connection>,
    buffer: WireBuffer,
    codec: RecordCodec,
}

impl PeerChannel {
    pub(crate) fn new(role: Role, connection: Connection, codec: RecordCodec) -> Result<Self> {
        Ok(Self {
            role,
            connection: Some(connection),
            buffer: WireBuffer::with_capacity(DEFAULT_BUFFER_CAPACITY)?,
            codec,
        })
    }

    pub(crate) fn codec(&self) -> RecordCodec {
        self.codec
    }

    /// Cleared buffer for building the next request
    pub(crate) fn request(&mut self) -> &mut WireBuffer {
        self.buffer.clear();
        &mut self.buffer
    }

    /// Payload of the last response
    pub(crate) fn response(&self) -> &WireBuffer {
        &self.buffer
    }

    /// Send the request under `tag` and wait for the response under the same tag
    pub(crate) async fn exchange(&mut self, tag: MessageType) -> Result<()> {
        let role = self.role;
        let connection = self
            .connection
            .as_mut()
            .ok_or(GlueError::ConnectionClosed(role))?;

        connection.send_frame(&self.buffer, tag.code()).await?;
        let header = connection
            .recv_frame(&mut self.buffer)
            .await?
            .ok_or(GlueError::ConnectionClosed(role))?;

        if header.tag != tag.code() {
            error!(%role, sent = %tag, received = header.tag, "Peer answered under the wrong tag");
            return Err(GlueError::UnexpectedResponse {
                expected: tag.code(),
                actual: header.tag,
            });
        }

        debug!(%role, %tag, payload_len = header.payload_len, "Exchange complete");
        Ok(())
    }

    /// Send the termination frame, close the connection and release the buffer
    pub(crate) async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            close_connection(self.role, connection).await;
        }
        self.buffer.release();
    }
}
