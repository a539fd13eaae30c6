// Preset normalization per encoder family

use super::types::{EncoderCandidate, EncoderFamily};

/// x264/x265 preset vocabulary, fastest to slowest
pub const SOFTWARE_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Preset used when the requested one is unknown, and for the software fallback
pub const DEFAULT_SOFTWARE_PRESET: &str = "medium";

/// NVENC's balanced speed/quality preset (p1 fastest .. p7 slowest)
pub const NVENC_BALANCED_PRESET: &str = "p4";

pub const AMF_BALANCED_PRESET: &str = "balanced";

/// The `-preset` value a backend will actually receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectivePreset {
    Named(String),
    /// Backend takes no preset; `-preset` is omitted
    Absent,
}

impl EffectivePreset {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Absent => None,
        }
    }
}

/// Map a requested preset onto what `candidate` accepts. Never fails.
pub fn adapt(candidate: &EncoderCandidate, requested: &str) -> EffectivePreset {
    match candidate.family {
        EncoderFamily::Nvidia => EffectivePreset::Named(NVENC_BALANCED_PRESET.to_string()),
        EncoderFamily::Amd => EffectivePreset::Named(AMF_BALANCED_PRESET.to_string()),
        EncoderFamily::Vaapi => EffectivePreset::Absent,
        EncoderFamily::Software => {
            let requested = requested.trim().to_ascii_lowercase();
            if SOFTWARE_PRESETS.contains(&requested.as_str()) {
                EffectivePreset::Named(requested)
            } else {
                EffectivePreset::Named(DEFAULT_SOFTWARE_PRESET.to_string())
            }
        }
    }
}
