//! Composite results of a glue step

use serde::{Deserialize, Serialize};

use super::record::{Action, Observation, Reward};

/// First observation of an episode and the Agent's answer to it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationAction {
    pub observation: Observation,
    pub action: Action,
}

/// What an Environment reports for one step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardObservationTerminal {
    pub reward: Reward,
    pub observation: Observation,
    pub terminal: bool,
}

/// Outcome of one full glue step.
///
/// `action` is `None` when the step ended the episode, since the Agent is
/// then notified instead of asked for another action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardObservationActionTerminal {
    pub reward: Reward,
    pub observation: Observation,
    pub action: Option<Action>,
    pub terminal: bool,
}

impl RewardObservationTerminal {
    /// Terminal flag as carried on the wire
    pub fn terminal_flag(&self) -> i32 {
        i32::from(self.terminal)
    }
}

impl RewardObservationActionTerminal {
    /// Terminal flag as carried on the wire
    pub fn terminal_flag(&self) -> i32 {
        i32::from(self.terminal)
    }
}
