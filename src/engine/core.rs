mod error;
pub mod ffmpeg_cmd;
mod ffmpeg_info;
pub mod preset;
mod transcode;
mod types;

pub use error::{
    ENCODER_UNUSABLE_MARKERS, ErrorKind, FailureClass, TranscodeError, classify_failure,
};
pub use ffmpeg_cmd::{
    BuiltCommand, RateControl, build_ffmpeg_cmd, build_software_fallback_cmd, crf_to_bitrate,
    format_command, normalize_output_path,
};
pub use ffmpeg_info::{DEFAULT_PROBE_TIMEOUT, FfmpegTool};
pub use preset::{EffectivePreset, adapt};
pub use transcode::{CancelToken, TranscodeEvent, Transcoded, Transcoder};
pub use types::{
    AccelPreference, Bitrate, CodecFamily, EncoderCandidate, EncoderFamily, JobState,
    ProbeResult, ProgressParser, Scale, TranscodeRequest, TranscodeRequestBuilder,
};
