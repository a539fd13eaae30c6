//! Encoder backend table and hardware encoder resolution

use serde::Serialize;

use crate::engine::core::{AccelPreference, CodecFamily, EncoderCandidate, EncoderFamily};
use crate::engine::probe::CapabilityProbe;

/// Hardware families tried by `auto`, highest priority first
pub const AUTO_PRIORITY: [EncoderFamily; 3] = [
    EncoderFamily::Nvidia,
    EncoderFamily::Amd,
    EncoderFamily::Vaapi,
];

// ============================================================================
// Backend table
// ============================================================================

/// ffmpeg encoder name for a codec on a backend family
pub fn backend_name(codec: CodecFamily, family: EncoderFamily) -> &'static str {
    match (codec, family) {
        (CodecFamily::H264, EncoderFamily::Software) => "libx264",
        (CodecFamily::H264, EncoderFamily::Nvidia) => "h264_nvenc",
        (CodecFamily::H264, EncoderFamily::Amd) => "h264_amf",
        (CodecFamily::H264, EncoderFamily::Vaapi) => "h264_vaapi",

        (CodecFamily::Hevc, EncoderFamily::Software) => "libx265",
        (CodecFamily::Hevc, EncoderFamily::Nvidia) => "hevc_nvenc",
        (CodecFamily::Hevc, EncoderFamily::Amd) => "hevc_amf",
        (CodecFamily::Hevc, EncoderFamily::Vaapi) => "hevc_vaapi",

        (CodecFamily::Av1, EncoderFamily::Software) => "libaom-av1",
        (CodecFamily::Av1, EncoderFamily::Nvidia) => "av1_nvenc",
        (CodecFamily::Av1, EncoderFamily::Amd) => "av1_amf",
        (CodecFamily::Av1, EncoderFamily::Vaapi) => "av1_vaapi",
    }
}

pub fn backend_for(codec: CodecFamily, family: EncoderFamily) -> EncoderCandidate {
    EncoderCandidate::new(backend_name(codec, family), family)
}

/// The always-available last resort for a codec
pub fn software_candidate(codec: CodecFamily) -> EncoderCandidate {
    backend_for(codec, EncoderFamily::Software)
}

// ============================================================================
// Resolution
// ============================================================================

/// Candidates to probe, in order, for a codec and acceleration preference
pub fn candidate_order(codec: CodecFamily, accel: AccelPreference) -> Vec<EncoderCandidate> {
    let families: &[EncoderFamily] = match accel {
        AccelPreference::None => &[EncoderFamily::Software],
        AccelPreference::Nvidia => &[EncoderFamily::Nvidia],
        AccelPreference::Amd => &[EncoderFamily::Amd],
        AccelPreference::Vaapi => &[EncoderFamily::Vaapi],
        AccelPreference::Auto => &AUTO_PRIORITY,
    };
    families.iter().map(|&f| backend_for(codec, f)).collect()
}

/// Pick the first present-and-functional candidate, or the software encoder.
///
/// Never fails. Probing stops at the first selectable candidate. The software
/// candidate is returned without probing when nothing else qualifies.
pub fn resolve(
    codec: CodecFamily,
    accel: AccelPreference,
    prober: &impl CapabilityProbe,
) -> EncoderCandidate {
    if accel == AccelPreference::None {
        return software_candidate(codec);
    }

    for candidate in candidate_order(codec, accel) {
        let result = prober.probe(&candidate);
        if result.selectable() {
            tracing::info!(encoder = candidate.name, %codec, %accel, "selected encoder");
            return candidate;
        }
        tracing::debug!(
            encoder = candidate.name,
            present = result.present,
            functional = result.functional,
            "encoder not selectable"
        );
    }

    let software = software_candidate(codec);
    tracing::info!(
        encoder = software.name,
        %codec,
        %accel,
        "no usable hardware encoder, using software"
    );
    software
}

/// Which hardware families can encode H.264 on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AccelAvailability {
    pub nvidia: bool,
    pub amd: bool,
    pub vaapi: bool,
}

impl AccelAvailability {
    pub fn get(&self, family: EncoderFamily) -> bool {
        match family {
            EncoderFamily::Software => true,
            EncoderFamily::Nvidia => self.nvidia,
            EncoderFamily::Amd => self.amd,
            EncoderFamily::Vaapi => self.vaapi,
        }
    }

    pub fn any(&self) -> bool {
        self.nvidia || self.amd || self.vaapi
    }
}

pub fn usable_families(prober: &impl CapabilityProbe) -> AccelAvailability {
    let usable = |family| {
        prober
            .probe(&backend_for(CodecFamily::H264, family))
            .selectable()
    };
    AccelAvailability {
        nvidia: usable(EncoderFamily::Nvidia),
        amd: usable(EncoderFamily::Amd),
        vaapi: usable(EncoderFamily::Vaapi),
    }
}
