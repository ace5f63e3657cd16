//! # MORL-Glue Common
//!
//! Shared types, wire tags, and errors for the MORL-Glue coordination server.
//!
//! ## Core Types
//!
//! - [`AbstractRecord`]: the ints/doubles/chars payload exchanged by every peer
//!   ([`Observation`], [`Action`] and [`Reward`] are aliases of it)
//! - [`MessageType`]: the `u32` type tags carried by every frame
//! - [`Role`]: the three peers the glue mediates between
//! - [`GlueError`]: unified error type for the wire and session layers

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{GlueError, IntegrityError, Result};
pub use types::{
    message::{MessageType, Role},
    record::{AbstractRecord, Action, Observation, Reward},
    transition::{ObservationAction, RewardObservationActionTerminal, RewardObservationTerminal},
};

/// MORL-Glue version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Port the server listens on when `RLGLUE_PORT` is unset or invalid
pub const DEFAULT_PORT: u16 = 4096;

/// Address clients use to reach a glue on the same host
pub const LOCALHOST: &str = "127.0.0.1";

/// Seconds a client waits between connection attempts
pub const RETRY_TIMEOUT_SECS: u64 = 2;

/// Pending-connection backlog of the listening socket
pub const LISTEN_BACKLOG: u32 = 10;

/// Initial capacity of every reusable wire buffer (bytes)
pub const DEFAULT_BUFFER_CAPACITY: u32 = 65536;

/// Largest element count accepted for any array of a record.
///
/// Anything above this is treated as a corrupt datastream.
pub const MAX_RECORD_FIELD_LEN: u32 = 1_000_000;

/// Largest frame payload a peer may announce (bytes).
///
/// Comfortably above three records at the field ceiling plus a flag.
pub const MAX_FRAME_PAYLOAD: u32 = 64 * 1024 * 1024;
