use super::preset::{DEFAULT_SOFTWARE_PRESET, EffectivePreset};
use super::types::{Bitrate, EncoderCandidate, EncoderFamily, TranscodeRequest};
use crate::engine::hardware;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Output containers accepted as-is; anything else gets [`DEFAULT_CONTAINER`] appended
pub const ACCEPTED_CONTAINERS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi"];

pub const DEFAULT_CONTAINER: &str = "mp4";

/// Audio is always re-encoded with this codec in the final pass
pub const AUDIO_CODEC: &str = "aac";

pub const DENOISE_FILTER: &str = "hqdn3d";

/// Render node used for VA-API device init
pub const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

/// Software frames have to be uploaded to the VA-API surface before encoding
pub const VAAPI_UPLOAD_FILTER: &str = "format=nv12,hwupload";

/// Append the default container extension unless the path already ends in an accepted one.
///
/// `clip` becomes `clip.mp4`, `clip.xyz` becomes `clip.xyz.mp4`, `clip.MKV` is unchanged.
pub fn normalize_output_path(path: &Path) -> PathBuf {
    let accepted = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ACCEPTED_CONTAINERS.contains(&ext.to_ascii_lowercase().as_str()));

    if accepted {
        path.to_path_buf()
    } else {
        let mut raw: OsString = path.as_os_str().to_os_string();
        raw.push(".");
        raw.push(DEFAULT_CONTAINER);
        PathBuf::from(raw)
    }
}

/// Bitrate used when a CRF value has to drive a bitrate-only encoder
pub fn crf_to_bitrate(crf: u8) -> Bitrate {
    match crf {
        18 => Bitrate::kbps(6000),
        28 => Bitrate::kbps(1500),
        _ => Bitrate::kbps(3000),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RateControl {
    Crf(u8),
    /// Target bitrate; max rate equals the target and the buffer is twice the target
    Bitrate(Bitrate),
}

impl RateControl {
    fn args(&self) -> Vec<String> {
        match self {
            Self::Crf(crf) => vec!["-crf".to_string(), crf.to_string()],
            Self::Bitrate(bitrate) => vec![
                "-b:v".to_string(),
                bitrate.to_string(),
                "-maxrate".to_string(),
                bitrate.to_string(),
                "-bufsize".to_string(),
                bitrate.doubled().to_string(),
            ],
        }
    }
}

/// Rate control for a request on a given backend.
///
/// CRF only for single-pass software encodes without a bitrate override; everything
/// else (hardware, explicit bitrate, two-pass) runs in bitrate mode.
pub fn rate_control_for(
    request: &TranscodeRequest,
    candidate: &EncoderCandidate,
    two_pass: bool,
) -> RateControl {
    match request.bitrate() {
        Some(bitrate) => RateControl::Bitrate(bitrate.clone()),
        None if candidate.crf_capable && !two_pass => RateControl::Crf(request.crf()),
        None => RateControl::Bitrate(crf_to_bitrate(request.crf())),
    }
}

/// The full invocation for one job: one argument list per pass
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltCommand {
    pub encoder: EncoderCandidate,
    pub rate_control: RateControl,
    pub passes: Vec<Vec<String>>,
    /// Directory holding two-pass statistics, created before pass 1
    pub passlog_dir: Option<PathBuf>,
}

impl BuiltCommand {
    pub fn pass_count(&self) -> u8 {
        self.passes.len() as u8
    }

    pub fn is_two_pass(&self) -> bool {
        self.passes.len() == 2
    }

    /// One `Command` per pass, stdin closed, stdout discarded and stderr piped
    pub fn to_commands(&self, program: &Path) -> Vec<Command> {
        self.passes
            .iter()
            .map(|args| {
                let mut cmd = Command::new(program);
                cmd.args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped());
                cmd
            })
            .collect()
    }

    /// Shell-quoted preview of every pass, joined the way a shell script would chain them
    pub fn preview(&self, program: &Path) -> String {
        let program = program.to_string_lossy();
        self.passes
            .iter()
            .map(|args| format_command(&program, args))
            .collect::<Vec<_>>()
            .join("\n&& \\\n")
    }
}

/// Render a program + args as a copy-pasteable shell line
pub fn format_command(program: &str, args: &[String]) -> String {
    let words = std::iter::once(program).chain(args.iter().map(String::as_str));
    shlex::try_join(words.clone()).unwrap_or_else(|_| words.collect::<Vec<_>>().join(" "))
}

fn null_output_target() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

pub fn two_pass_log_prefix(request: &TranscodeRequest) -> PathBuf {
    std::env::temp_dir()
        .join("vidopt_2pass")
        .join(request.job_id().to_string())
        .join("ffmpeg2pass")
}

/// Denoise then scale, plus the VA-API upload stage for VA-API backends.
pub fn filter_chain(request: &TranscodeRequest, candidate: &EncoderCandidate) -> Option<String> {
    let mut filters: Vec<String> = Vec::new();
    if request.denoise() {
        filters.push(DENOISE_FILTER.to_string());
    }
    if let Some(scale) = request.scale() {
        filters.push(format!("scale={}:{}", scale.width, scale.height));
    }
    if candidate.family == EncoderFamily::Vaapi {
        filters.push(VAAPI_UPLOAD_FILTER.to_string());
    }

    if filters.is_empty() {
        None
    } else {
        Some(filters.join(","))
    }
}

/// Options placed before `-i`: logging setup and hardware device init
fn input_args(request: &TranscodeRequest, candidate: &EncoderCandidate) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y",
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        // key=value progress on stderr, alongside errors
        "-progress",
        "pipe:2",
        "-nostats",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if candidate.family == EncoderFamily::Vaapi {
        args.push("-vaapi_device".to_string());
        args.push(VAAPI_DEVICE.to_string());
    }

    args.push("-i".to_string());
    args.push(request.input_path().to_string_lossy().into_owned());
    args
}

/// Arguments shared by every pass: encoder, rate control, preset, filters
fn video_args(
    request: &TranscodeRequest,
    candidate: &EncoderCandidate,
    preset: &EffectivePreset,
    rate_control: &RateControl,
) -> Vec<String> {
    let mut args = vec!["-c:v".to_string(), candidate.name.to_string()];
    args.extend(rate_control.args());
    if let Some(name) = preset.as_deref() {
        args.push("-preset".to_string());
        args.push(name.to_string());
    }
    if let Some(vf) = filter_chain(request, candidate) {
        args.push("-vf".to_string());
        args.push(vf);
    }
    args
}

fn final_output_args(request: &TranscodeRequest) -> Vec<String> {
    vec![
        "-c:a".to_string(),
        AUDIO_CODEC.to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        request.output_path().to_string_lossy().into_owned(),
    ]
}

fn build_with_rate(
    request: &TranscodeRequest,
    candidate: &EncoderCandidate,
    preset: &EffectivePreset,
    rate_control: RateControl,
    two_pass: bool,
) -> BuiltCommand {
    let mut shared = input_args(request, candidate);
    shared.extend(video_args(request, candidate, preset, &rate_control));

    if !two_pass {
        let mut args = shared;
        args.extend(final_output_args(request));
        return BuiltCommand {
            encoder: *candidate,
            rate_control,
            passes: vec![args],
            passlog_dir: None,
        };
    }

    let passlog_prefix = two_pass_log_prefix(request);
    shared.push("-passlogfile".to_string());
    shared.push(passlog_prefix.to_string_lossy().into_owned());

    let mut pass1 = shared.clone();
    pass1.extend(
        ["-pass", "1", "-an", "-f", "null", null_output_target()]
            .iter()
            .map(|s| s.to_string()),
    );

    let mut pass2 = shared;
    pass2.extend(["-pass", "2"].iter().map(|s| s.to_string()));
    pass2.extend(final_output_args(request));

    BuiltCommand {
        encoder: *candidate,
        rate_control,
        passes: vec![pass1, pass2],
        passlog_dir: passlog_prefix.parent().map(Path::to_path_buf),
    }
}

/// Build the invocation for `request` on `candidate`. Pure: same inputs, same arguments.
///
/// Two-pass is honoured only for software backends; hardware requests silently run one pass.
pub fn build_ffmpeg_cmd(
    request: &TranscodeRequest,
    candidate: &EncoderCandidate,
    preset: &EffectivePreset,
) -> BuiltCommand {
    let two_pass = request.two_pass() && candidate.is_software();
    let rate_control = rate_control_for(request, candidate, two_pass);
    build_with_rate(request, candidate, preset, rate_control, two_pass)
}

/// Rebuild a failed hardware job for the software encoder: default preset, CRF, same filters.
pub fn build_software_fallback_cmd(request: &TranscodeRequest) -> BuiltCommand {
    let candidate = hardware::software_candidate(request.codec());
    build_with_rate(
        request,
        &candidate,
        &EffectivePreset::Named(DEFAULT_SOFTWARE_PRESET.to_string()),
        RateControl::Crf(request.crf()),
        false,
    )
}
