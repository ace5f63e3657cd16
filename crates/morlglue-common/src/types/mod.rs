//! Core data types for MORL-Glue

pub mod message;
pub mod record;
pub mod transition;
