//! Glue session - the RL-Glue state machine with multi-objective rewards
//!
//! One [`GlueSession`] owns both peers and all per-run state: the last
//! action, the per-episode total reward (one double per objective) and the
//! step/episode counters.
//!
//! ## Reward accumulation
//!
//! The total is allocated once per run and zeroed once per episode:
//!
//! ```text
//! Uninitialized ──first step──▶ AllocatedAwaitingFirstReset ──step (zero)──▶ Accumulating
//!                                          ▲                                      │
//!                                          └──────────────── start ───────────────┘
//! ```
//!
//! Every step adds the received reward element-wise after any transition.

use morlglue_common::{
    Action, GlueError, Observation, ObservationAction, Result, Reward,
    RewardObservationActionTerminal, RewardObservationTerminal,
};
use tracing::{debug, info, instrument};

use crate::peers::{AgentPort, EnvironmentPort};

/// Lifecycle of the total-reward accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewardAccumulatorState {
    /// No step yet in this run; the objective count is unknown
    #[default]
    Uninitialized,
    /// Allocated; the next step zeroes it before adding
    AllocatedAwaitingFirstReset,
    /// Summing rewards of the current episode
    Accumulating,
}

/// Single-run glue session
#[derive(Debug)]
pub struct GlueSession<A, E> {
    agent: A,
    environment: E,
    last_action: Action,
    total_reward: Reward,
    reward_state: RewardAccumulatorState,
    num_steps: u32,
    num_episodes: u32,
    /// `init` ran without a matching `cleanup`
    initialized: bool,
}

impl<A: AgentPort, E: EnvironmentPort> GlueSession<A, E> {
    pub fn new(agent: A, environment: E) -> Self {
        Self {
            agent,
            environment,
            last_action: Action::default(),
            total_reward: Reward::default(),
            reward_state: RewardAccumulatorState::Uninitialized,
            num_steps: 0,
            num_episodes: 0,
            initialized: false,
        }
    }

    /// Fetch the task spec from the Environment, pass it to the Agent and
    /// reset the run.
    #[instrument(skip(self))]
    pub async fn init(&mut self) -> Result<Vec<u8>> {
        let task_spec = self.environment.init().await?.unwrap_or_default();
        self.agent.init(&task_spec).await?;

        self.total_reward.clear();
        self.reward_state = RewardAccumulatorState::Uninitialized;
        self.num_steps = 0;
        self.num_episodes = 0;
        self.initialized = true;

        info!(task_spec_len = task_spec.len(), "Run initialised");
        Ok(task_spec)
    }

    /// Begin an episode: first observation and first action
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<ObservationAction> {
        // A finished episode's total stays readable until the next step zeroes it
        if self.reward_state == RewardAccumulatorState::Accumulating {
            self.reward_state = RewardAccumulatorState::AllocatedAwaitingFirstReset;
        }
        self.num_steps = 1;

        let observation = self.environment.start().await?;
        let action = self.agent.start(&observation).await?;
        self.last_action.replace(&action);

        Ok(ObservationAction {
            observation,
            action,
        })
    }

    /// Apply the last action, account the reward, then end the episode or
    /// ask the Agent for the next action.
    #[instrument(skip(self))]
    pub async fn step(&mut self) -> Result<RewardObservationActionTerminal> {
        let RewardObservationTerminal {
            reward,
            observation,
            terminal,
        } = self.environment.step(&self.last_action).await?;

        self.accumulate(&reward)?;

        let action = if terminal {
            self.num_episodes += 1;
            self.agent.end(&reward).await?;
            debug!(episode = self.num_episodes, steps = self.num_steps, "Episode ended");
            None
        } else {
            self.num_steps += 1;
            let action = self.agent.step(&reward, &observation).await?;
            self.last_action.replace(&action);
            Some(action)
        };

        Ok(RewardObservationActionTerminal {
            reward,
            observation,
            action,
            terminal,
        })
    }

    /// Run one episode of at most `max_steps` steps (`0` for no limit).
    ///
    /// Returns whether the episode reached a terminal state rather than
    /// being cut off.
    #[instrument(skip(self))]
    pub async fn episode(&mut self, max_steps: u32) -> Result<bool> {
        self.start().await?;

        let mut terminal = false;
        while !terminal && (max_steps == 0 || self.num_steps < max_steps) {
            terminal = self.step().await?.terminal;
        }
        Ok(terminal)
    }

    /// Total reward of the current or just-finished episode.
    ///
    /// Empty until the first step of the run.
    pub fn return_total_reward(&self) -> &Reward {
        &self.total_reward
    }

    pub fn num_steps(&self) -> u32 {
        self.num_steps
    }

    pub fn num_episodes(&self) -> u32 {
        self.num_episodes
    }

    pub fn reward_state(&self) -> RewardAccumulatorState {
        self.reward_state
    }

    /// Whether a run was initialised and not cleaned up yet
    pub fn needs_cleanup(&self) -> bool {
        self.initialized
    }

    /// Release the accumulator and tell the Environment, then the Agent, that
    /// the run is over.
    #[instrument(skip(self))]
    pub async fn cleanup(&mut self) -> Result<()> {
        self.total_reward.clear();
        self.reward_state = RewardAccumulatorState::Uninitialized;
        self.last_action.clear();
        self.initialized = false;

        self.environment.cleanup().await?;
        self.agent.cleanup().await?;
        info!(episodes = self.num_episodes, "Run cleaned up");
        Ok(())
    }

    /// Pass `message` to the Agent; an absent answer becomes empty
    #[instrument(skip(self))]
    pub async fn agent_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.agent.message(message).await?.unwrap_or_default())
    }

    /// Pass `message` to the Environment; an absent answer becomes empty
    #[instrument(skip(self))]
    pub async fn env_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.environment.message(message).await?.unwrap_or_default())
    }

    /// Environment start without involving the Agent
    #[instrument(skip(self))]
    pub async fn env_start(&mut self) -> Result<Observation> {
        self.num_steps = 1;
        self.environment.start().await
    }

    /// Environment step with an Experiment-chosen action.
    ///
    /// The reward is added to the total only once the accumulator exists;
    /// this path never moves the accumulator state.
    #[instrument(skip(self, action))]
    pub async fn env_step(&mut self, action: &Action) -> Result<RewardObservationTerminal> {
        let result = self.environment.step(action).await?;

        if self.reward_state != RewardAccumulatorState::Uninitialized {
            self.add_reward(&result.reward)?;
        }
        if result.terminal {
            self.num_episodes += 1;
        } else {
            self.num_steps += 1;
        }
        Ok(result)
    }

    #[instrument(skip(self, observation))]
    pub async fn agent_start(&mut self, observation: &Observation) -> Result<Action> {
        self.agent.start(observation).await
    }

    #[instrument(skip(self, reward, observation))]
    pub async fn agent_step(&mut self, reward: &Reward, observation: &Observation) -> Result<Action> {
        self.agent.step(reward, observation).await
    }

    #[instrument(skip(self, reward))]
    pub async fn agent_end(&mut self, reward: &Reward) -> Result<()> {
        self.agent.end(reward).await
    }

    /// Give the peers back, e.g. to disconnect them
    pub fn into_parts(self) -> (A, E) {
        (self.agent, self.environment)
    }

    fn accumulate(&mut self, reward: &Reward) -> Result<()> {
        if self.reward_state == RewardAccumulatorState::Uninitialized {
            self.total_reward = Reward::from_doubles(vec![0.0; reward.doubles.len()]);
            self.reward_state = RewardAccumulatorState::AllocatedAwaitingFirstReset;
        }
        if self.reward_state == RewardAccumulatorState::AllocatedAwaitingFirstReset {
            self.total_reward.doubles.iter_mut().for_each(|d| *d = 0.0);
            self.reward_state = RewardAccumulatorState::Accumulating;
        }
        self.add_reward(reward)
    }

    fn add_reward(&mut self, reward: &Reward) -> Result<()> {
        let expected = self.total_reward.doubles.len();
        if reward.doubles.len() != expected {
            return Err(GlueError::RewardDimension {
                expected,
                actual: reward.doubles.len(),
            });
        }
        for (total, r) in self.total_reward.doubles.iter_mut().zip(&reward.doubles) {
            *total += r;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::{MockAgentPort, MockEnvironmentPort};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use morlglue_common::AbstractRecord;
    use std::collections::VecDeque;

    const TASK_SPEC: &[u8] = b"VERSION RL-Glue-3.0 PROBLEMTYPE episodic";

    fn observation() -> Observation {
        AbstractRecord::new(vec![7], vec![0.5], vec![])
    }

    fn action() -> Action {
        AbstractRecord::new(vec![1], vec![], vec![])
    }

    /// Environment that replays `(reward, terminal)` pairs, one per step
    fn scripted_env(script: Vec<(Vec<f64>, bool)>) -> MockEnvironmentPort {
        let mut env = MockEnvironmentPort::new();
        env.expect_start().returning(|| Ok(observation()));

        let mut script: VecDeque<_> = script.into();
        env.expect_step().returning(move |_| {
            let (reward, terminal) = script.pop_front().expect("step script exhausted");
            Ok(RewardObservationTerminal {
                reward: AbstractRecord::from_doubles(reward),
                observation: observation(),
                terminal,
            })
        });
        env
    }

    fn cooperative_agent() -> MockAgentPort {
        let mut agent = MockAgentPort::new();
        agent.expect_start().returning(|_| Ok(action()));
        agent.expect_step().returning(|_, _| Ok(action()));
        agent.expect_end().returning(|_| Ok(()));
        agent
    }

    #[tokio::test]
    async fn test_two_objective_episodes() {
        let env = scripted_env(vec![
            (vec![1.0, 0.5], false),
            (vec![2.0, 0.5], false),
            (vec![0.0, 0.0], true),
            (vec![5.0, 5.0], false),
        ]);
        let mut session = GlueSession::new(cooperative_agent(), env);

        session.start().await.unwrap();
        session.step().await.unwrap();
        assert_eq!(session.return_total_reward().doubles, vec![1.0, 0.5]);
        session.step().await.unwrap();
        assert_eq!(session.return_total_reward().doubles, vec![3.0, 1.0]);

        let last = session.step().await.unwrap();
        assert!(last.terminal);
        assert!(last.action.is_none());
        assert_eq!(session.return_total_reward().doubles, vec![3.0, 1.0]);
        assert_eq!(session.num_episodes(), 1);

        session.start().await.unwrap();
        // Still readable between start and the first step
        assert_eq!(session.return_total_reward().doubles, vec![3.0, 1.0]);
        session.step().await.unwrap();
        assert_eq!(session.return_total_reward().doubles, vec![5.0, 5.0]);
    }

    #[tokio::test]
    async fn test_accumulator_states() {
        let env = scripted_env(vec![(vec![1.0], true), (vec![2.0], true)]);
        let mut session = GlueSession::new(cooperative_agent(), env);
        assert!(session.return_total_reward().is_empty());

        session.start().await.unwrap();
        assert_eq!(session.reward_state(), RewardAccumulatorState::Uninitialized);
        session.step().await.unwrap();
        assert_eq!(session.reward_state(), RewardAccumulatorState::Accumulating);

        session.start().await.unwrap();
        assert_eq!(
            session.reward_state(),
            RewardAccumulatorState::AllocatedAwaitingFirstReset
        );
        // Starting again without stepping leaves the state alone
        session.start().await.unwrap();
        assert_eq!(
            session.reward_state(),
            RewardAccumulatorState::AllocatedAwaitingFirstReset
        );

        session.step().await.unwrap();
        assert_eq!(session.return_total_reward().doubles, vec![2.0]);
    }

    #[tokio::test]
    async fn test_step_counting() {
        let env = scripted_env(vec![(vec![0.0], false), (vec![0.0], true)]);
        let mut session = GlueSession::new(cooperative_agent(), env);

        session.start().await.unwrap();
        assert_eq!(session.num_steps(), 1);
        session.step().await.unwrap();
        assert_eq!(session.num_steps(), 2);
        // Terminal steps do not count
        session.step().await.unwrap();
        assert_eq!(session.num_steps(), 2);
        assert_eq!(session.num_episodes(), 1);
    }

    #[tokio::test]
    async fn test_step_sends_last_action() {
        let mut env = MockEnvironmentPort::new();
        env.expect_start().returning(|| Ok(observation()));
        let mut seq = Sequence::new();
        env.expect_step()
            .with(eq(AbstractRecord::new(vec![1], vec![], vec![])))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(RewardObservationTerminal {
                    reward: AbstractRecord::from_doubles(vec![1.0]),
                    observation: observation(),
                    terminal: false,
                })
            });
        env.expect_step()
            .with(eq(AbstractRecord::new(vec![2], vec![], vec![])))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(RewardObservationTerminal {
                    reward: AbstractRecord::from_doubles(vec![1.0]),
                    observation: observation(),
                    terminal: true,
                })
            });

        let mut agent = MockAgentPort::new();
        agent
            .expect_start()
            .returning(|_| Ok(AbstractRecord::new(vec![1], vec![], vec![])));
        agent
            .expect_step()
            .times(1)
            .returning(|_, _| Ok(AbstractRecord::new(vec![2], vec![], vec![])));
        agent
            .expect_end()
            .withf(|reward| reward.doubles == vec![1.0])
            .times(1)
            .returning(|_| Ok(()));

        let mut session = GlueSession::new(agent, env);
        session.start().await.unwrap();
        let first = session.step().await.unwrap();
        assert_eq!(first.action, Some(AbstractRecord::new(vec![2], vec![], vec![])));
        session.step().await.unwrap();
    }

    #[tokio::test]
    async fn test_episode_cut_off() {
        let env = scripted_env(vec![(vec![1.0], false); 4]);
        let mut session = GlueSession::new(cooperative_agent(), env);

        assert!(!session.episode(5).await.unwrap());
        assert_eq!(session.num_steps(), 5);
        assert_eq!(session.num_episodes(), 0);
        assert_eq!(session.return_total_reward().doubles, vec![4.0]);
    }

    #[tokio::test]
    async fn test_episode_reaches_terminal() {
        let env = scripted_env(vec![
            (vec![1.0], false),
            (vec![1.0], false),
            (vec![1.0], true),
        ]);
        let mut session = GlueSession::new(cooperative_agent(), env);

        assert!(session.episode(5).await.unwrap());
        assert_eq!(session.num_steps(), 3);
        assert_eq!(session.num_episodes(), 1);
    }

    /// The step limit is checked before each step and `start` already counts
    /// as step 1, so a terminal on step N of an N-step episode is never reached.
    #[tokio::test]
    async fn test_episode_terminal_at_limit() {
        let env = scripted_env(vec![
            (vec![1.0], false),
            (vec![1.0], false),
            (vec![1.0], true),
        ]);
        let mut session = GlueSession::new(cooperative_agent(), env);

        assert!(!session.episode(3).await.unwrap());
        assert_eq!(session.num_steps(), 3);
        assert_eq!(session.num_episodes(), 0);
        assert_eq!(session.return_total_reward().doubles, vec![2.0]);
    }

    #[tokio::test]
    async fn test_unbounded_episode() {
        let mut script = vec![(vec![0.5], false); 20];
        script.push((vec![0.5], true));
        let mut session = GlueSession::new(cooperative_agent(), scripted_env(script));

        assert!(session.episode(0).await.unwrap());
        assert_eq!(session.num_steps(), 21);
        assert_eq!(session.return_total_reward().doubles, vec![10.5]);
    }

    #[tokio::test]
    async fn test_reward_dimension_change_is_error() {
        let env = scripted_env(vec![(vec![1.0, 1.0], false), (vec![1.0], false)]);
        let mut session = GlueSession::new(cooperative_agent(), env);

        session.start().await.unwrap();
        session.step().await.unwrap();
        let err = session.step().await.unwrap_err();
        assert!(matches!(
            err,
            GlueError::RewardDimension {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_init_forwards_task_spec() {
        let mut env = MockEnvironmentPort::new();
        env.expect_init()
            .times(1)
            .returning(|| Ok(Some(TASK_SPEC.to_vec())));
        let mut agent = MockAgentPort::new();
        agent
            .expect_init()
            .withf(|spec| spec.to_vec() == TASK_SPEC)
            .times(1)
            .returning(|_| Ok(()));

        let mut session = GlueSession::new(agent, env);
        assert!(!session.needs_cleanup());
        let spec = session.init().await.unwrap();
        assert_eq!(spec, TASK_SPEC);
        assert!(session.needs_cleanup());
        assert_eq!(session.num_steps(), 0);
    }

    #[tokio::test]
    async fn test_init_absent_task_spec_becomes_empty() {
        let mut env = MockEnvironmentPort::new();
        env.expect_init().returning(|| Ok(None));
        let mut agent = MockAgentPort::new();
        agent
            .expect_init()
            .withf(|spec| spec.is_empty())
            .times(1)
            .returning(|_| Ok(()));

        let mut session = GlueSession::new(agent, env);
        assert!(session.init().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_resets_run() {
        let mut env = scripted_env(vec![(vec![3.0], true)]);
        env.expect_init().returning(|| Ok(None));
        let mut agent = cooperative_agent();
        agent.expect_init().returning(|_| Ok(()));

        let mut session = GlueSession::new(agent, env);
        session.init().await.unwrap();
        session.episode(0).await.unwrap();
        assert_eq!(session.num_episodes(), 1);

        session.init().await.unwrap();
        assert_eq!(session.num_episodes(), 0);
        assert_eq!(session.reward_state(), RewardAccumulatorState::Uninitialized);
        assert!(session.return_total_reward().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_order_and_guard() {
        let mut seq = Sequence::new();
        let mut env = MockEnvironmentPort::new();
        env.expect_init().returning(|| Ok(None));
        env.expect_cleanup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let mut agent = MockAgentPort::new();
        agent.expect_init().returning(|_| Ok(()));
        agent
            .expect_cleanup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut session = GlueSession::new(agent, env);
        session.init().await.unwrap();
        session.cleanup().await.unwrap();
        assert!(!session.needs_cleanup());
        assert!(session.return_total_reward().is_empty());
    }

    #[tokio::test]
    async fn test_messages_normalised() {
        let mut agent = MockAgentPort::new();
        agent
            .expect_message()
            .withf(|m| m.is_empty())
            .returning(|_| Ok(None));
        let mut env = MockEnvironmentPort::new();
        env.expect_message()
            .withf(|m| m.to_vec() == b"seed 42")
            .returning(|_| Ok(Some(b"ok".to_vec())));

        let mut session = GlueSession::new(agent, env);
        assert!(session.agent_message(b"").await.unwrap().is_empty());
        assert_eq!(session.env_message(b"seed 42").await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_direct_env_ops() {
        let env = scripted_env(vec![(vec![1.0], false), (vec![2.0], true)]);
        let mut session = GlueSession::new(MockAgentPort::new(), env);

        session.env_start().await.unwrap();
        assert_eq!(session.num_steps(), 1);

        let first = session.env_step(&action()).await.unwrap();
        assert!(!first.terminal);
        assert_eq!(session.num_steps(), 2);
        // No glue step yet, nothing to accumulate into
        assert!(session.return_total_reward().is_empty());

        let second = session.env_step(&action()).await.unwrap();
        assert!(second.terminal);
        assert_eq!(session.num_episodes(), 1);
    }

    #[tokio::test]
    async fn test_direct_env_step_adds_to_existing_total() {
        let env = scripted_env(vec![(vec![1.0], false), (vec![2.0], false)]);
        let mut session = GlueSession::new(cooperative_agent(), env);

        session.start().await.unwrap();
        session.step().await.unwrap();
        session.env_step(&action()).await.unwrap();
        assert_eq!(session.return_total_reward().doubles, vec![3.0]);
    }

    #[tokio::test]
    async fn test_direct_agent_ops() {
        let mut agent = MockAgentPort::new();
        agent
            .expect_start()
            .with(eq(observation()))
            .returning(|_| Ok(action()));
        agent.expect_step().returning(|_, _| Ok(action()));
        agent
            .expect_end()
            .with(eq(AbstractRecord::from_doubles(vec![9.0])))
            .times(1)
            .returning(|_| Ok(()));

        let mut session = GlueSession::new(agent, MockEnvironmentPort::new());
        assert_eq!(session.agent_start(&observation()).await.unwrap(), action());
        assert_eq!(
            session
                .agent_step(&AbstractRecord::from_doubles(vec![1.0]), &observation())
                .await
                .unwrap(),
            action()
        );
        session
            .agent_end(&AbstractRecord::from_doubles(vec![9.0]))
            .await
            .unwrap();
        assert_eq!(session.num_steps(), 0);
    }
}
