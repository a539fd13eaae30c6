//! Video transcoding over ffmpeg with hardware encoder probing.
//!
//! [`engine`] resolves an encoder for a [`engine::TranscodeRequest`], builds the ffmpeg
//! invocation and runs it, retrying once in software when a hardware backend fails.

pub mod config;
pub mod engine;
pub mod logging;
