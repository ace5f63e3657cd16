//! Experiment dispatcher
//!
//! Reads one request frame at a time from the Experiment, runs the matching
//! session operation and answers under the request's tag, reusing one
//! buffer for both directions. Unknown tags get an empty answer so the
//! Experiment never stalls.

use std::sync::Arc;

use morlglue_common::{MessageType, Result};
use morlglue_network::{
    decode_string, encode_str, Connection, FrameHeader, RecordCodec, WireBuffer,
};
use tracing::{debug, instrument, warn};

use crate::metrics::DispatchMetrics;
use crate::peers::{AgentPort, EnvironmentPort};
use crate::session::GlueSession;

/// Why the dispatch loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The Experiment sent [`MessageType::Terminate`]
    Terminated,
    /// The Experiment closed its connection
    ConnectionClosed,
}

/// Request loop serving the Experiment connection
#[derive(Debug)]
pub struct Dispatcher {
    connection: Connection,
    buffer: WireBuffer,
    codec: RecordCodec,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(
        connection: Connection,
        codec: RecordCodec,
        metrics: Arc<DispatchMetrics>,
    ) -> Result<Self> {
        Ok(Self {
            connection,
            buffer: WireBuffer::with_capacity(morlglue_common::DEFAULT_BUFFER_CAPACITY)?,
            codec,
            metrics,
        })
    }

    /// Serve requests until Terminate or until the Experiment disconnects
    #[instrument(skip_all)]
    pub async fn run<A, E>(&mut self, session: &mut GlueSession<A, E>) -> Result<LoopExit>
    where
        A: AgentPort,
        E: EnvironmentPort,
    {
        loop {
            let header = match self.connection.recv_frame(&mut self.buffer).await? {
                Some(header) => header,
                None => {
                    debug!("Experiment closed the connection");
                    return Ok(LoopExit::ConnectionClosed);
                }
            };
            self.metrics.frames_total.inc();

            self.handle(session, header).await?;
            self.connection.send_frame(&self.buffer, header.tag).await?;
            self.metrics
                .observe_session(session.num_steps(), session.num_episodes());

            if header.tag == MessageType::Terminate.code() {
                debug!("Experiment requested termination");
                return Ok(LoopExit::Terminated);
            }
        }
    }

    /// Close the Experiment connection
    pub async fn close(mut self) {
        self.buffer.release();
        self.connection.close().await;
    }

    /// Cleared buffer for writing the response
    fn response(&mut self) -> &mut WireBuffer {
        self.buffer.clear();
        &mut self.buffer
    }

    /// String request payload; an empty payload is the empty string
    fn request_string(&self) -> Result<Vec<u8>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let (text, _) = decode_string(&self.buffer, 0)?;
        Ok(text)
    }

    async fn handle<A, E>(&mut self, session: &mut GlueSession<A, E>, header: FrameHeader) -> Result<()>
    where
        A: AgentPort,
        E: EnvironmentPort,
    {
        let codec = self.codec;
        let tag = MessageType::from_code(header.tag);
        debug!(tag = header.tag, payload_len = header.payload_len, "Dispatching");

        match tag {
            Some(MessageType::GlueInit) => {
                let task_spec = session.init().await?;
                encode_str(&task_spec, self.response(), 0)?;
            }
            Some(MessageType::GlueStart) => {
                let started = session.start().await?;
                let buffer = self.response();
                let offset = codec.encode(Some(&started.observation), buffer, 0)?;
                codec.encode(Some(&started.action), buffer, offset)?;
            }
            Some(MessageType::GlueStep) => {
                let stepped = session.step().await?;
                let buffer = self.response();
                let offset = buffer.write(0, stepped.terminal_flag())?;
                let offset = codec.encode(Some(&stepped.reward), buffer, offset)?;
                let offset = codec.encode(Some(&stepped.observation), buffer, offset)?;
                codec.encode(stepped.action.as_ref(), buffer, offset)?;
            }
            Some(MessageType::GlueCleanup) => {
                session.cleanup().await?;
                self.response();
            }
            Some(MessageType::GlueReturn) => {
                let buffer = self.response();
                codec.encode(Some(session.return_total_reward()), buffer, 0)?;
            }
            Some(MessageType::GlueNumSteps) => {
                let steps = session.num_steps() as i32;
                self.response().write(0, steps)?;
            }
            Some(MessageType::GlueNumEpisodes) => {
                let episodes = session.num_episodes() as i32;
                self.response().write(0, episodes)?;
            }
            Some(MessageType::GlueEpisode) => {
                let (max_steps, _) = self.buffer.read::<u32>(0)?;
                let terminal = session.episode(max_steps).await?;
                self.response().write(0, i32::from(terminal))?;
            }
            Some(MessageType::GlueAgentMessage) => {
                let message = self.request_string()?;
                let answer = session.agent_message(&message).await?;
                encode_str(&answer, self.response(), 0)?;
            }
            Some(MessageType::GlueEnvMessage) => {
                let message = self.request_string()?;
                let answer = session.env_message(&message).await?;
                encode_str(&answer, self.response(), 0)?;
            }
            Some(MessageType::GlueEnvStart) => {
                let observation = session.env_start().await?;
                codec.encode(Some(&observation), self.response(), 0)?;
            }
            Some(MessageType::GlueEnvStep) => {
                let (action, _) = codec.decode_owned(&self.buffer, 0)?;
                let result = session.env_step(&action).await?;
                let buffer = self.response();
                let offset = buffer.write(0, result.terminal_flag())?;
                let offset = codec.encode(Some(&result.reward), buffer, offset)?;
                codec.encode(Some(&result.observation), buffer, offset)?;
            }
            Some(MessageType::GlueAgentStart) => {
                let (observation, _) = codec.decode_owned(&self.buffer, 0)?;
                let action = session.agent_start(&observation).await?;
                codec.encode(Some(&action), self.response(), 0)?;
            }
            Some(MessageType::GlueAgentStep) => {
                let (reward, offset) = codec.decode_owned(&self.buffer, 0)?;
                let (observation, _) = codec.decode_owned(&self.buffer, offset)?;
                let action = session.agent_step(&reward, &observation).await?;
                codec.encode(Some(&action), self.response(), 0)?;
            }
            Some(MessageType::GlueAgentEnd) => {
                let (reward, _) = codec.decode_owned(&self.buffer, 0)?;
                session.agent_end(&reward).await?;
                self.response();
            }
            Some(MessageType::Terminate) => {
                self.response();
            }
            _ => {
                warn!(tag = header.tag, "Unknown message type, answering with an empty payload");
                self.metrics.unknown_tags_total.inc();
                self.response();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::{MockAgentPort, MockEnvironmentPort};
    use morlglue_common::{AbstractRecord, Role, RewardObservationTerminal};
    use morlglue_network::{decode_record, transport, GlueClient};

    /// Dispatcher on one end of a loopback connection, Experiment client on the other
    async fn connected() -> (Dispatcher, GlueClient) {
        let listener = transport::listen("127.0.0.1", 0, 10).unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = tokio::spawn(async move {
            GlueClient::connect(Role::Experiment, "127.0.0.1", port)
                .await
                .unwrap()
        });

        let (stream, peer) = transport::accept(&listener).await.unwrap();
        let mut connection = Connection::new(stream, peer);
        let mut identification = WireBuffer::new();
        connection.recv_frame(&mut identification).await.unwrap();

        let metrics = Arc::new(DispatchMetrics::new().unwrap());
        let dispatcher = Dispatcher::new(connection, RecordCodec::default(), metrics).unwrap();
        (dispatcher, client.await.unwrap())
    }

    #[tokio::test]
    async fn test_unknown_tag_echoed_with_empty_payload() {
        let (mut dispatcher, mut experiment) = connected().await;
        let mut session = GlueSession::new(MockAgentPort::new(), MockEnvironmentPort::new());

        let server = tokio::spawn(async move {
            let exit = dispatcher.run(&mut session).await.unwrap();
            (exit, dispatcher.metrics.unknown_tags_total.get())
        });

        experiment.begin().write(0, 123u32).unwrap();
        experiment.send(MessageType::AgentInit).await.unwrap();
        let header = experiment.recv().await.unwrap().unwrap();
        assert_eq!(header.tag, MessageType::AgentInit.code());
        assert_eq!(header.payload_len, 0);

        experiment.begin();
        experiment.request(MessageType::Terminate).await.unwrap();
        let (exit, unknown) = server.await.unwrap();
        assert_eq!(exit, LoopExit::Terminated);
        assert_eq!(unknown, 1);
    }

    #[tokio::test]
    async fn test_disconnect_ends_loop() {
        let (mut dispatcher, experiment) = connected().await;
        let mut session = GlueSession::new(MockAgentPort::new(), MockEnvironmentPort::new());

        experiment.close().await;
        let exit = dispatcher.run(&mut session).await.unwrap();
        assert_eq!(exit, LoopExit::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_step_response_layout() {
        let (mut dispatcher, mut experiment) = connected().await;

        let mut env = MockEnvironmentPort::new();
        env.expect_start()
            .returning(|| Ok(AbstractRecord::new(vec![1], vec![], vec![])));
        env.expect_step().returning(|_| {
            Ok(RewardObservationTerminal {
                reward: AbstractRecord::from_doubles(vec![1.5, -2.0]),
                observation: AbstractRecord::new(vec![2], vec![], vec![]),
                terminal: true,
            })
        });
        let mut agent = MockAgentPort::new();
        agent
            .expect_start()
            .returning(|_| Ok(AbstractRecord::new(vec![0], vec![], vec![])));
        agent.expect_end().times(1).returning(|_| Ok(()));
        let mut session = GlueSession::new(agent, env);

        let server = tokio::spawn(async move { dispatcher.run(&mut session).await.unwrap() });

        experiment.begin();
        experiment.request(MessageType::GlueStart).await.unwrap();
        experiment.begin();
        experiment.request(MessageType::GlueStep).await.unwrap();

        let payload = experiment.buffer();
        let (terminal, offset) = payload.read::<i32>(0).unwrap();
        assert_eq!(terminal, 1);
        let mut reward = AbstractRecord::default();
        let offset = decode_record(payload, offset, &mut reward).unwrap();
        assert_eq!(reward.doubles, vec![1.5, -2.0]);
        let mut observation = AbstractRecord::default();
        let offset = decode_record(payload, offset, &mut observation).unwrap();
        assert_eq!(observation.ints, vec![2]);
        let mut action = AbstractRecord::new(vec![5], vec![], vec![]);
        let end = decode_record(payload, offset, &mut action).unwrap();
        assert!(action.is_empty(), "terminal step carries the empty action");
        assert_eq!(end, payload.size());

        experiment.begin();
        experiment.request(MessageType::GlueReturn).await.unwrap();
        let mut total = AbstractRecord::default();
        decode_record(experiment.buffer(), 0, &mut total).unwrap();
        assert_eq!(total.doubles, vec![1.5, -2.0]);

        experiment.begin();
        experiment.request(MessageType::GlueNumEpisodes).await.unwrap();
        assert_eq!(experiment.buffer().read::<i32>(0).unwrap().0, 1);

        experiment.close().await;
        assert_eq!(server.await.unwrap(), LoopExit::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_empty_message_request() {
        let (mut dispatcher, mut experiment) = connected().await;

        let mut agent = MockAgentPort::new();
        agent
            .expect_message()
            .withf(|m| m.is_empty())
            .times(1)
            .returning(|_| Ok(None));
        let mut session = GlueSession::new(agent, MockEnvironmentPort::new());

        let server = tokio::spawn(async move { dispatcher.run(&mut session).await.unwrap() });

        // No string at all in the request
        experiment.begin();
        experiment.request(MessageType::GlueAgentMessage).await.unwrap();
        let (answer, _) = decode_string(experiment.buffer(), 0).unwrap();
        assert!(answer.is_empty());

        experiment.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_env_message_bytes_forwarded_unchanged() {
        let (mut dispatcher, mut experiment) = connected().await;

        let mut env = MockEnvironmentPort::new();
        env.expect_message()
            .withf(|m| m.to_vec() == [b'c', b'a', 0xE9])
            .times(1)
            .returning(|m| Ok(Some(m.iter().rev().copied().collect())));
        let mut session = GlueSession::new(MockAgentPort::new(), env);

        let server = tokio::spawn(async move { dispatcher.run(&mut session).await.unwrap() });

        experiment
            .begin()
            .write_slice(0, &[0u8, 0, 0, 3, b'c', b'a', 0xE9][..])
            .unwrap();
        experiment.request(MessageType::GlueEnvMessage).await.unwrap();
        assert_eq!(experiment.buffer().as_bytes(), &[0, 0, 0, 3, 0xE9, b'a', b'c']);

        experiment.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_error_stops_loop() {
        let (mut dispatcher, mut experiment) = connected().await;

        let mut env = MockEnvironmentPort::new();
        env.expect_init()
            .returning(|| Err(morlglue_common::GlueError::ConnectionClosed(Role::Environment)));
        let mut session = GlueSession::new(MockAgentPort::new(), env);

        let server = tokio::spawn(async move { dispatcher.run(&mut session).await });

        experiment.begin();
        experiment.send(MessageType::GlueInit).await.unwrap();
        let err = server.await.unwrap().unwrap_err();
        assert!(err.is_fatal());
    }
}
