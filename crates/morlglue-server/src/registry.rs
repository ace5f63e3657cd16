//! Connection Registry
//!
//! Three slots, one per [`Role`], each empty or holding one live connection.
//! Bootstrap accepts peers until every slot is filled; each peer identifies
//! itself with the tag of its first frame.

use std::time::Duration;

use morlglue_common::{MessageType, Result, Role, DEFAULT_BUFFER_CAPACITY};
use morlglue_network::{transport, Connection, WireBuffer};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

/// Orderly close of one peer connection.
///
/// Agents and Environments first get an empty [`MessageType::Terminate`]
/// frame so their receive loop can exit; the Experiment does not.
pub async fn close_connection(role: Role, mut connection: Connection) {
    if role.expects_terminate() {
        if let Err(e) = connection
            .send_frame(&WireBuffer::new(), MessageType::Terminate.code())
            .await
        {
            debug!(%role, error = %e, "Could not deliver termination frame");
        }
    }
    connection.close().await;
    debug!(%role, "Connection closed");
}

/// The three live connections, once bootstrap completed
#[derive(Debug)]
pub struct ConnectedPeers {
    pub agent: Connection,
    pub environment: Connection,
    pub experiment: Connection,
}

/// Role-keyed connection slots
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    agent: Option<Connection>,
    environment: Option<Connection>,
    experiment: Option<Connection>,
    io_timeout: Option<Duration>,
}

impl ConnectionRegistry {
    pub fn new(io_timeout: Option<Duration>) -> Self {
        Self {
            io_timeout,
            ..Self::default()
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<Connection> {
        match role {
            Role::Agent => &mut self.agent,
            Role::Environment => &mut self.environment,
            Role::Experiment => &mut self.experiment,
        }
    }

    pub fn is_registered(&self, role: Role) -> bool {
        match role {
            Role::Agent => self.agent.is_some(),
            Role::Environment => self.environment.is_some(),
            Role::Experiment => self.experiment.is_some(),
        }
    }

    /// Whether all three roles are connected
    pub fn is_complete(&self) -> bool {
        self.agent.is_some() && self.environment.is_some() && self.experiment.is_some()
    }

    /// Put `connection` in the slot for `role`, closing any previous occupant first
    pub async fn set(&mut self, role: Role, connection: Connection) {
        if let Some(previous) = self.slot_mut(role).take() {
            info!(%role, old = %previous.peer_addr(), new = %connection.peer_addr(), "Replacing connection");
            close_connection(role, previous).await;
        }
        *self.slot_mut(role) = Some(connection);
    }

    /// Close the slot for `role`, if occupied
    pub async fn close(&mut self, role: Role) {
        if let Some(connection) = self.slot_mut(role).take() {
            close_connection(role, connection).await;
        }
    }

    pub async fn close_all(&mut self) {
        for role in [Role::Agent, Role::Environment, Role::Experiment] {
            self.close(role).await;
        }
    }

    /// Accept peers on `listener` until all three roles are registered.
    ///
    /// A peer that closes before identifying itself, or sends an unknown tag,
    /// is logged and dropped.
    #[instrument(skip_all)]
    pub async fn bootstrap(&mut self, listener: &TcpListener) -> Result<()> {
        let mut buffer = WireBuffer::with_capacity(DEFAULT_BUFFER_CAPACITY)?;

        while !self.is_complete() {
            let (stream, peer) = transport::accept(listener).await?;
            let mut connection = Connection::new(stream, peer).with_timeout(self.io_timeout);

            let header = match connection.recv_frame(&mut buffer).await {
                Ok(Some(header)) => header,
                Ok(None) => {
                    warn!(%peer, "Peer closed before identifying itself");
                    continue;
                }
                Err(e) => {
                    warn!(%peer, error = %e, "Could not read identification frame");
                    continue;
                }
            };

            match Role::from_connection_tag(header.tag) {
                Some(role) => {
                    info!(%role, %peer, "Peer connected");
                    self.set(role, connection).await;
                }
                None => {
                    warn!(%peer, tag = header.tag, "Unknown connection type, dropping peer");
                    connection.close().await;
                }
            }
        }

        Ok(())
    }

    /// Move the three connections out; `None` unless every slot is filled
    pub fn into_peers(mut self) -> Option<ConnectedPeers> {
        if !self.is_complete() {
            return None;
        }
        Some(ConnectedPeers {
            agent: self.agent.take()?,
            environment: self.environment.take()?,
            experiment: self.experiment.take()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morlglue_network::GlueClient;

    async fn loopback() -> (TcpListener, u16) {
        let listener = transport::listen("127.0.0.1", 0, 10).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_bootstrap_classifies_roles() {
        let (listener, port) = loopback().await;

        let clients = tokio::spawn(async move {
            let agent = GlueClient::connect(Role::Agent, "127.0.0.1", port).await.unwrap();
            let env = GlueClient::connect(Role::Environment, "127.0.0.1", port)
                .await
                .unwrap();
            let exp = GlueClient::connect(Role::Experiment, "127.0.0.1", port)
                .await
                .unwrap();
            (agent, env, exp)
        });

        let mut registry = ConnectionRegistry::new(None);
        registry.bootstrap(&listener).await.unwrap();
        assert!(registry.is_complete());
        let _clients = clients.await.unwrap();

        assert!(registry.into_peers().is_some());
    }

    #[tokio::test]
    async fn test_unknown_tag_is_dropped() {
        let (listener, port) = loopback().await;

        let clients = tokio::spawn(async move {
            // Identify with a tag no role uses
            let mut stray = transport::connect("127.0.0.1", port).await.unwrap();
            morlglue_network::send_framed(&mut stray, &WireBuffer::new(), 99)
                .await
                .unwrap();

            let mut stray_buf = WireBuffer::new();
            let closed = morlglue_network::recv_framed(&mut stray, &mut stray_buf)
                .await
                .unwrap();

            let agent = GlueClient::connect(Role::Agent, "127.0.0.1", port).await.unwrap();
            let env = GlueClient::connect(Role::Environment, "127.0.0.1", port)
                .await
                .unwrap();
            let exp = GlueClient::connect(Role::Experiment, "127.0.0.1", port)
                .await
                .unwrap();
            (closed, agent, env, exp)
        });

        let mut registry = ConnectionRegistry::new(None);
        registry.bootstrap(&listener).await.unwrap();
        let (closed, ..) = clients.await.unwrap();
        assert!(closed.is_none(), "stray peer should be dropped without a reply");
        assert!(registry.is_complete());
    }

    #[tokio::test]
    async fn test_replacing_agent_sends_terminate() {
        let (listener, port) = loopback().await;

        let first = tokio::spawn(async move {
            let mut agent = GlueClient::connect(Role::Agent, "127.0.0.1", port).await.unwrap();
            agent.recv().await.unwrap()
        });
        let (stream, peer) = transport::accept(&listener).await.unwrap();
        let mut registry = ConnectionRegistry::new(None);
        let mut first_conn = Connection::new(stream, peer);
        let mut scratch = WireBuffer::new();
        first_conn.recv_frame(&mut scratch).await.unwrap();
        registry.set(Role::Agent, first_conn).await;

        let second = tokio::spawn(async move {
            GlueClient::connect(Role::Agent, "127.0.0.1", port).await.unwrap()
        });
        let (stream, peer) = transport::accept(&listener).await.unwrap();
        registry.set(Role::Agent, Connection::new(stream, peer)).await;

        let header = first.await.unwrap().expect("terminate frame");
        assert_eq!(header.tag, MessageType::Terminate.code());
        assert_eq!(header.payload_len, 0);
        assert!(registry.is_registered(Role::Agent));
        let _second = second.await.unwrap();
    }

    #[tokio::test]
    async fn test_experiment_closed_without_terminate() {
        let (listener, port) = loopback().await;

        let client = tokio::spawn(async move {
            let mut exp = GlueClient::connect(Role::Experiment, "127.0.0.1", port)
                .await
                .unwrap();
            exp.recv().await.unwrap()
        });
        let (stream, peer) = transport::accept(&listener).await.unwrap();
        let mut registry = ConnectionRegistry::new(None);
        registry.set(Role::Experiment, Connection::new(stream, peer)).await;
        registry.close_all().await;

        assert!(client.await.unwrap().is_none());
        assert!(!registry.is_registered(Role::Experiment));
    }
}
