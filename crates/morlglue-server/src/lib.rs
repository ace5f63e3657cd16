//! # MORL-Glue Server
//!
//! Coordination server for multi-objective reinforcement learning runs. It
//! mediates between three independent processes over TCP:
//!
//! - **Agent**: chooses actions from observations and rewards
//! - **Environment**: produces observations, reward vectors and terminal signals
//! - **Experiment**: drives the run (init, episode, return, cleanup, ...)
//!
//! ## Architecture
//!
//! ```text
//!                   ┌──────────────────────────────┐
//!   Experiment ────▶│ Dispatcher                   │
//!                   │   └─▶ GlueSession            │
//!                   │         ├─▶ RemoteAgent ─────┼────▶ Agent
//!                   │         └─▶ RemoteEnvironment┼────▶ Environment
//!                   └──────────────────────────────┘
//! ```
//!
//! [`ConnectionRegistry`] collects the three connections at startup,
//! [`GlueServer`] ties everything together.

pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod peers;
pub mod registry;
pub mod server;
pub mod session;

pub use config::GlueConfig;
pub use dispatch::{Dispatcher, LoopExit};
pub use metrics::DispatchMetrics;
pub use peers::{AgentPort, EnvironmentPort, RemoteAgent, RemoteEnvironment};
pub use registry::{ConnectedPeers, ConnectionRegistry};
pub use server::{GlueServer, RunOutcome};
pub use session::{GlueSession, RewardAccumulatorState};
