//! # MORL-Glue Network
//!
//! The wire layer shared by the glue server and its peers.
//!
//! - [`transport`]: TCP open/listen/accept/connect and full-length send/receive
//! - [`buffer`]: [`WireBuffer`], a reusable byte buffer in network byte order
//! - [`codec`]: [`AbstractRecord`](morlglue_common::AbstractRecord) and string encoding
//! - [`framing`]: tagged, length-prefixed frames
//! - [`client`]: [`GlueClient`], a role-identified connection to a glue

pub mod buffer;
pub mod client;
pub mod codec;
pub mod framing;
pub mod transport;

pub use buffer::{host_is_little_endian, swap_endian, WireBuffer, WireScalar};
pub use client::GlueClient;
pub use codec::{
    decode_record, decode_string, encode_record, encode_str, DecodeStrategy, RecordCodec,
    RECORD_HEADER_LEN,
};
pub use framing::{recv_framed, send_framed, FrameHeader, FRAME_HEADER_LEN};
pub use transport::Connection;
