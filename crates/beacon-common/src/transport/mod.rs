//! Framed transport for beacon-rpc messages.

pub mod codec;

pub use codec::{decode, encode, read_frame, read_message, write_message, MAX_FRAME_SIZE};
