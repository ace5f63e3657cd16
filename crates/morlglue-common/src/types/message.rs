//! Wire type tags and peer roles
//!
//! Every frame on the wire starts with a `u32` type tag. Tags identify the
//! connecting role during bootstrap, the lifecycle call forwarded to an Agent
//! or Environment, and the request an Experiment makes of the glue. The
//! numeric values are shared with every client codec and must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Frame type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Role identification, sent once by each peer right after connecting
    ExperimentConnection,
    AgentConnection,
    EnvironmentConnection,

    // Glue -> Agent
    AgentInit,
    AgentStart,
    AgentStep,
    AgentEnd,
    AgentCleanup,
    AgentMessage,

    // Glue -> Environment
    EnvInit,
    EnvStart,
    EnvStep,
    EnvCleanup,
    EnvMessage,

    // Experiment -> Glue
    GlueInit,
    GlueStart,
    GlueStep,
    GlueCleanup,
    GlueReturn,
    GlueNumSteps,
    GlueNumEpisodes,
    GlueEpisode,
    GlueAgentMessage,
    GlueEnvMessage,
    GlueEnvStart,
    GlueEnvStep,
    GlueAgentStart,
    GlueAgentStep,
    GlueAgentEnd,

    /// Ends the Experiment loop, and tells Agent/Environment to exit theirs
    Terminate,
}

impl MessageType {
    /// Every tag, in wire order
    pub const ALL: [MessageType; 30] = [
        Self::ExperimentConnection,
        Self::AgentConnection,
        Self::EnvironmentConnection,
        Self::AgentInit,
        Self::AgentStart,
        Self::AgentStep,
        Self::AgentEnd,
        Self::AgentCleanup,
        Self::AgentMessage,
        Self::EnvInit,
        Self::EnvStart,
        Self::EnvStep,
        Self::EnvCleanup,
        Self::EnvMessage,
        Self::GlueInit,
        Self::GlueStart,
        Self::GlueStep,
        Self::GlueCleanup,
        Self::GlueReturn,
        Self::GlueNumSteps,
        Self::GlueNumEpisodes,
        Self::GlueEpisode,
        Self::GlueAgentMessage,
        Self::GlueEnvMessage,
        Self::Terminate,
        Self::GlueEnvStart,
        Self::GlueEnvStep,
        Self::GlueAgentStart,
        Self::GlueAgentStep,
        Self::GlueAgentEnd,
    ];

    /// Wire value of this tag
    pub const fn code(self) -> u32 {
        match self {
            Self::ExperimentConnection => 1,
            Self::AgentConnection => 2,
            Self::EnvironmentConnection => 3,
            Self::AgentInit => 4,
            Self::AgentStart => 5,
            Self::AgentStep => 6,
            Self::AgentEnd => 7,
            Self::AgentCleanup => 8,
            Self::AgentMessage => 10,
            Self::EnvInit => 11,
            Self::EnvStart => 12,
            Self::EnvStep => 13,
            Self::EnvCleanup => 14,
            Self::EnvMessage => 19,
            Self::GlueInit => 20,
            Self::GlueStart => 21,
            Self::GlueStep => 22,
            Self::GlueCleanup => 23,
            Self::GlueReturn => 24,
            Self::GlueNumSteps => 25,
            Self::GlueNumEpisodes => 26,
            Self::GlueEpisode => 27,
            Self::GlueAgentMessage => 33,
            Self::GlueEnvMessage => 34,
            Self::Terminate => 35,
            Self::GlueEnvStart => 36,
            Self::GlueEnvStep => 37,
            Self::GlueAgentStart => 38,
            Self::GlueAgentStep => 39,
            Self::GlueAgentEnd => 40,
        }
    }

    /// Parse a wire value; `None` for tags this server does not know
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::ExperimentConnection),
            2 => Some(Self::AgentConnection),
            3 => Some(Self::EnvironmentConnection),
            4 => Some(Self::AgentInit),
            5 => Some(Self::AgentStart),
            6 => Some(Self::AgentStep),
            7 => Some(Self::AgentEnd),
            8 => Some(Self::AgentCleanup),
            10 => Some(Self::AgentMessage),
            11 => Some(Self::EnvInit),
            12 => Some(Self::EnvStart),
            13 => Some(Self::EnvStep),
            14 => Some(Self::EnvCleanup),
            19 => Some(Self::EnvMessage),
            20 => Some(Self::GlueInit),
            21 => Some(Self::GlueStart),
            22 => Some(Self::GlueStep),
            23 => Some(Self::GlueCleanup),
            24 => Some(Self::GlueReturn),
            25 => Some(Self::GlueNumSteps),
            26 => Some(Self::GlueNumEpisodes),
            27 => Some(Self::GlueEpisode),
            33 => Some(Self::GlueAgentMessage),
            34 => Some(Self::GlueEnvMessage),
            35 => Some(Self::Terminate),
            36 => Some(Self::GlueEnvStart),
            37 => Some(Self::GlueEnvStep),
            38 => Some(Self::GlueAgentStart),
            39 => Some(Self::GlueAgentStep),
            40 => Some(Self::GlueAgentEnd),
            _ => None,
        }
    }
}

impl From<MessageType> for u32 {
    fn from(tag: MessageType) -> Self {
        tag.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// The three peers a glue mediates between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Agent,
    Environment,
    Experiment,
}

impl Role {
    /// Tag a peer of this role sends to identify itself
    pub const fn connection_tag(self) -> MessageType {
        match self {
            Role::Agent => MessageType::AgentConnection,
            Role::Environment => MessageType::EnvironmentConnection,
            Role::Experiment => MessageType::ExperimentConnection,
        }
    }

    /// Classify an identification tag received during bootstrap
    pub const fn from_connection_tag(code: u32) -> Option<Self> {
        match MessageType::from_code(code) {
            Some(MessageType::AgentConnection) => Some(Role::Agent),
            Some(MessageType::EnvironmentConnection) => Some(Role::Environment),
            Some(MessageType::ExperimentConnection) => Some(Role::Experiment),
            _ => None,
        }
    }

    /// Whether the peer runs a receive loop that understands [`MessageType::Terminate`]
    pub const fn expects_terminate(self) -> bool {
        !matches!(self, Role::Experiment)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Agent => "Agent",
            Role::Environment => "Environment",
            Role::Experiment => "Experiment",
        };
        f.write_str(label)
    }
}
