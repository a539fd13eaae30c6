use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use super::ffmpeg_cmd::normalize_output_path;

/// Target video codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFamily {
    #[default]
    H264,
    #[serde(alias = "h265")]
    Hevc,
    Av1,
}

impl CodecFamily {
    /// Lenient lookup: `hevc`/`h265` and `av1` are recognised, anything else is H.264.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "hevc" | "h265" => Self::Hevc,
            "av1" => Self::Av1,
            _ => Self::H264,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Av1 => "av1",
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which hardware backends the caller is willing to try
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelPreference {
    #[default]
    #[serde(alias = "cpu")]
    None,
    Auto,
    Nvidia,
    Amd,
    Vaapi,
}

impl AccelPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Auto => "auto",
            Self::Nvidia => "nvidia",
            Self::Amd => "amd",
            Self::Vaapi => "vaapi",
        }
    }
}

impl FromStr for AccelPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "cpu" | "" => Ok(Self::None),
            "auto" => Ok(Self::Auto),
            "nvidia" => Ok(Self::Nvidia),
            "amd" => Ok(Self::Amd),
            "vaapi" => Ok(Self::Vaapi),
            other => Err(format!(
                "unknown acceleration '{}' (expected none, auto, nvidia, amd or vaapi)",
                other
            )),
        }
    }
}

impl fmt::Display for AccelPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderFamily {
    Software,
    Nvidia,
    Amd,
    Vaapi,
}

impl EncoderFamily {
    pub fn is_hardware(&self) -> bool {
        !matches!(self, Self::Software)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Software => "Software",
            Self::Nvidia => "NVIDIA NVENC",
            Self::Amd => "AMD AMF",
            Self::Vaapi => "VA-API",
        }
    }
}

/// A concrete encoder backend, tagged with its family at resolution time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncoderCandidate {
    pub name: &'static str,
    pub family: EncoderFamily,
    pub crf_capable: bool,
}

impl EncoderCandidate {
    pub fn new(name: &'static str, family: EncoderFamily) -> Self {
        Self {
            name,
            family,
            crf_capable: family == EncoderFamily::Software,
        }
    }

    pub fn is_software(&self) -> bool {
        self.family == EncoderFamily::Software
    }
}

impl fmt::Display for EncoderCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.family.display_name())
    }
}

/// Outcome of probing one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProbeResult {
    /// ffmpeg lists the encoder in its registry
    pub present: bool,
    /// a one-frame synthetic encode succeeded
    pub functional: bool,
}

impl ProbeResult {
    pub fn selectable(&self) -> bool {
        self.present && self.functional
    }
}

/// Output frame size for the scale filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Scale {
    type Err = String;

    /// Accepts `1280x720` or `1280:720`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X', ':'])
            .ok_or_else(|| format!("invalid scale '{}' (expected WIDTHxHEIGHT)", s))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid scale width '{}'", w))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid scale height '{}'", h))?;
        if width == 0 || height == 0 {
            return Err(format!("scale dimensions must be positive: '{}'", s));
        }
        Ok(Self { width, height })
    }
}

/// A bitrate as ffmpeg understands it: an amount plus an optional unit suffix (`k`, `M`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bitrate {
    amount: f64,
    unit: String,
}

impl Bitrate {
    pub fn kbps(amount: u32) -> Self {
        Self {
            amount: f64::from(amount),
            unit: "k".to_string(),
        }
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Twice the amount, same unit. Used for the rate-control buffer size.
    pub fn doubled(&self) -> Self {
        Self {
            amount: self.amount * 2.0,
            unit: self.unit.clone(),
        }
    }
}

/// Suffixes ffmpeg accepts on `-b:v`: bits, kilo, mega, giga
const BITRATE_UNITS: [&str; 5] = ["", "k", "K", "M", "G"];

impl FromStr for Bitrate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        if !BITRATE_UNITS.contains(&unit) {
            return Err(format!("invalid bitrate '{}'", s));
        }
        let amount = number
            .parse::<f64>()
            .map_err(|_| format!("invalid bitrate '{}'", s))?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(format!("bitrate must be positive: '{}'", s));
        }
        Ok(Self {
            amount,
            unit: unit.to_string(),
        })
    }
}

impl TryFrom<String> for Bitrate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Bitrate> for String {
    fn from(value: Bitrate) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit)
    }
}

/// One transcode job. Immutable once built; the output path is already normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    job_id: Uuid,
    input_path: PathBuf,
    output_path: PathBuf,
    codec: CodecFamily,
    crf: u8,
    bitrate: Option<Bitrate>,
    accel: AccelPreference,
    scale: Option<Scale>,
    denoise: bool,
    two_pass: bool,
    preset: String,
}

impl TranscodeRequest {
    pub fn builder(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> TranscodeRequestBuilder {
        TranscodeRequestBuilder {
            job_id: Uuid::new_v4(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            codec: CodecFamily::default(),
            crf: 23,
            bitrate: None,
            accel: AccelPreference::default(),
            scale: None,
            denoise: false,
            two_pass: false,
            preset: "medium".to_string(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn codec(&self) -> CodecFamily {
        self.codec
    }

    pub fn crf(&self) -> u8 {
        self.crf
    }

    pub fn bitrate(&self) -> Option<&Bitrate> {
        self.bitrate.as_ref()
    }

    pub fn accel(&self) -> AccelPreference {
        self.accel
    }

    pub fn scale(&self) -> Option<Scale> {
        self.scale
    }

    pub fn denoise(&self) -> bool {
        self.denoise
    }

    pub fn two_pass(&self) -> bool {
        self.two_pass
    }

    pub fn preset(&self) -> &str {
        &self.preset
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeRequestBuilder {
    job_id: Uuid,
    input_path: PathBuf,
    output_path: PathBuf,
    codec: CodecFamily,
    crf: u8,
    bitrate: Option<Bitrate>,
    accel: AccelPreference,
    scale: Option<Scale>,
    denoise: bool,
    two_pass: bool,
    preset: String,
}

impl TranscodeRequestBuilder {
    pub fn job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn codec(mut self, codec: CodecFamily) -> Self {
        self.codec = codec;
        self
    }

    pub fn crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    pub fn bitrate(mut self, bitrate: Option<Bitrate>) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn accel(mut self, accel: AccelPreference) -> Self {
        self.accel = accel;
        self
    }

    pub fn scale(mut self, scale: Option<Scale>) -> Self {
        self.scale = scale;
        self
    }

    pub fn denoise(mut self, denoise: bool) -> Self {
        self.denoise = denoise;
        self
    }

    pub fn two_pass(mut self, two_pass: bool) -> Self {
        self.two_pass = two_pass;
        self
    }

    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn build(self) -> TranscodeRequest {
        TranscodeRequest {
            job_id: self.job_id,
            input_path: self.input_path,
            output_path: normalize_output_path(&self.output_path),
            codec: self.codec,
            crf: self.crf,
            bitrate: self.bitrate,
            accel: self.accel,
            scale: self.scale,
            denoise: self.denoise,
            two_pass: self.two_pass,
            preset: self.preset,
        }
    }
}

/// Executor state, reported to observers on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobState {
    Building,
    Running {
        encoder: String,
        pass: u8,
        total_passes: u8,
    },
    /// A hardware attempt failed with a retryable error
    FailedPrimary { encoder: String },
    RetryingSoftware { encoder: String },
    Verifying,
    Succeeded,
    Failed,
    Cancelled,
}

/// Parser for ffmpeg `-progress` output (key=value format)
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    pub out_time_us: u64,
    pub fps: Option<f64>,
    pub speed: Option<f64>,
    pub bitrate_kbps: Option<f64>,
    pub total_size: Option<u64>,
    pub is_complete: bool,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single line of ffmpeg progress output. Returns true if the line was a progress key.
    pub fn parse_line(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.split_once('=') else {
            return false;
        };
        let value = value.trim();
        match key.trim() {
            "out_time_us" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.out_time_us = us;
                }
            }
            "fps" => {
                if let Ok(f) = value.parse::<f64>() {
                    self.fps = Some(f);
                }
            }
            "speed" => {
                // "1.23x"
                if let Ok(s) = value.trim_end_matches('x').parse::<f64>() {
                    self.speed = Some(s);
                }
            }
            "bitrate" => {
                // "123.4kbits/s"
                if let Ok(b) = value.trim_end_matches("kbits/s").parse::<f64>() {
                    self.bitrate_kbps = Some(b);
                }
            }
            "total_size" => {
                if let Ok(size) = value.parse::<u64>() {
                    self.total_size = Some(size);
                }
            }
            "progress" => {
                self.is_complete = value == "end";
            }
            "frame" | "stream_0_0_q" | "out_time_ms" | "out_time" | "dup_frames"
            | "drop_frames" => {}
            _ => return false,
        }
        true
    }

    /// Get output time in seconds
    pub fn out_time_s(&self) -> f64 {
        self.out_time_us as f64 / 1_000_000.0
    }
}
