//! Protocol module - delimiter framing and envelope decoding.
//!
//! This module implements the reply protocol between the supervisor and the
//! interpreter:
//! - per-child delimiter pair and scratch-file naming
//! - frame buffer extracting delimited payloads from pipe reads
//! - envelope model with per-format Success decoding

mod delimiter;
mod envelope;
mod frame_buffer;

pub use delimiter::{scratch_prefix, Delimiters, DELIMITER_LEN};
pub use envelope::{decode_envelope, OutputFormat, StreamsResult};
pub use frame_buffer::FrameBuffer;
