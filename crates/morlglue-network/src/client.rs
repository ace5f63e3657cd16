//! Role-identified client connection to a glue server
//!
//! Agents, Environments and Experiments written in Rust connect through
//! [`GlueClient`]: it waits for the server, announces its [`Role`] with an
//! empty identification frame, then exchanges frames through one reusable
//! buffer.

use std::time::Duration;

use morlglue_common::{GlueError, MessageType, Result, Role, DEFAULT_BUFFER_CAPACITY};
use tracing::{debug, info};

use crate::buffer::WireBuffer;
use crate::codec::RecordCodec;
use crate::framing::FrameHeader;
use crate::transport::{connect, wait_for_connection, Connection};

/// Client side of one glue connection
#[derive(Debug)]
pub struct GlueClient {
    role: Role,
    connection: Connection,
    buffer: WireBuffer,
    codec: RecordCodec,
}

impl GlueClient {
    /// Connect once and identify as `role`
    pub async fn connect(role: Role, host: &str, port: u16) -> Result<Self> {
        let stream = connect(host, port).await?;
        let peer = stream.peer_addr()?;
        Self::identify(role, Connection::new(stream, peer)).await
    }

    /// Keep trying every `retry` until the glue accepts, then identify as `role`
    pub async fn wait_for(role: Role, host: &str, port: u16, retry: Duration) -> Result<Self> {
        let stream = wait_for_connection(host, port, retry).await;
        let peer = stream.peer_addr()?;
        Self::identify(role, Connection::new(stream, peer)).await
    }

    async fn identify(role: Role, mut connection: Connection) -> Result<Self> {
        let mut buffer = WireBuffer::with_capacity(DEFAULT_BUFFER_CAPACITY)?;
        buffer.clear();
        connection
            .send_frame(&buffer, role.connection_tag().code())
            .await?;

        info!(%role, glue = %connection.peer_addr(), "Connected to glue");
        Ok(Self {
            role,
            connection,
            buffer,
            codec: RecordCodec::default(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn codec(&self) -> RecordCodec {
        self.codec
    }

    /// Payload of the last received frame, or the one being built
    pub fn buffer(&self) -> &WireBuffer {
        &self.buffer
    }

    /// Cleared buffer, ready for building the next request
    pub fn begin(&mut self) -> &mut WireBuffer {
        self.buffer.clear();
        &mut self.buffer
    }

    /// Send the current buffer tagged `tag`
    pub async fn send(&mut self, tag: MessageType) -> Result<()> {
        self.connection.send_frame(&self.buffer, tag.code()).await?;
        Ok(())
    }

    /// Wait for the next frame; `None` when the glue closed the connection
    pub async fn recv(&mut self) -> Result<Option<FrameHeader>> {
        self.connection.recv_frame(&mut self.buffer).await
    }

    /// Send the current buffer and wait for the reply under the same tag
    pub async fn request(&mut self, tag: MessageType) -> Result<FrameHeader> {
        self.send(tag).await?;
        let header = self
            .recv()
            .await?
            .ok_or(GlueError::ConnectionClosed(self.role))?;

        if header.tag != tag.code() {
            return Err(GlueError::UnexpectedResponse {
                expected: tag.code(),
                actual: header.tag,
            });
        }
        debug!(role = %self.role, %tag, "Request answered");
        Ok(header)
    }

    /// Close the connection
    pub async fn close(mut self) {
        self.buffer.release();
        self.connection.close().await;
    }
}
