// Encoder resolution against in-memory probes and the scripted ffmpeg

use crate::common::{FakeFfmpeg, StaticProbe};
use serial_test::serial;
use std::time::{Duration, Instant};
use vidopt::engine::hardware::{AUTO_PRIORITY, candidate_order};
use vidopt::engine::{
    AccelAvailability, AccelPreference, CapabilityProbe, CodecFamily, EncoderFamily,
    FfmpegProber, resolve, usable_families,
};

const ALL_CODECS: [CodecFamily; 3] = [CodecFamily::H264, CodecFamily::Hevc, CodecFamily::Av1];

const ALL_ACCELS: [AccelPreference; 5] = [
    AccelPreference::None,
    AccelPreference::Auto,
    AccelPreference::Nvidia,
    AccelPreference::Amd,
    AccelPreference::Vaapi,
];

#[test]
fn test_every_combination_resolves_to_software_without_hardware() {
    let probe = StaticProbe::none();
    for codec in ALL_CODECS {
        for accel in ALL_ACCELS {
            let chosen = resolve(codec, accel, &probe);
            assert_eq!(
                chosen.family,
                EncoderFamily::Software,
                "{codec}/{accel} should resolve to software"
            );
            assert!(chosen.crf_capable);
        }
    }
}

#[test]
fn test_present_but_not_functional_counts_as_unusable() {
    let probe = StaticProbe::present_only(&["hevc_nvenc", "hevc_amf", "hevc_vaapi"]);
    let chosen = resolve(CodecFamily::Hevc, AccelPreference::Auto, &probe);
    assert_eq!(chosen.name, "libx265");
    assert_eq!(probe.probed(), vec!["hevc_nvenc", "hevc_amf", "hevc_vaapi"]);
}

#[test]
fn test_auto_priority_nvidia_amd_vaapi() {
    assert_eq!(
        AUTO_PRIORITY,
        [EncoderFamily::Nvidia, EncoderFamily::Amd, EncoderFamily::Vaapi]
    );

    let all = StaticProbe::working(&["av1_nvenc", "av1_amf", "av1_vaapi"]);
    assert_eq!(resolve(CodecFamily::Av1, AccelPreference::Auto, &all).name, "av1_nvenc");
    assert_eq!(all.probed(), vec!["av1_nvenc"]);

    let amd_and_vaapi = StaticProbe::working(&["av1_amf", "av1_vaapi"]);
    assert_eq!(
        resolve(CodecFamily::Av1, AccelPreference::Auto, &amd_and_vaapi).name,
        "av1_amf"
    );
    assert_eq!(amd_and_vaapi.probed(), vec!["av1_nvenc", "av1_amf"]);
}

#[test]
fn test_explicit_family_is_not_substituted() {
    // AMD works, but the caller asked for NVIDIA only
    let probe = StaticProbe::working(&["h264_amf"]);
    let chosen = resolve(CodecFamily::H264, AccelPreference::Nvidia, &probe);
    assert_eq!(chosen.name, "libx264");
    assert_eq!(probe.probed(), vec!["h264_nvenc"]);
}

#[test]
fn test_candidate_order_matches_table() {
    for codec in ALL_CODECS {
        let names: Vec<_> = candidate_order(codec, AccelPreference::Auto)
            .into_iter()
            .map(|c| c.name)
            .collect();
        let prefix = match codec {
            CodecFamily::H264 => "h264",
            CodecFamily::Hevc => "hevc",
            CodecFamily::Av1 => "av1",
        };
        assert_eq!(
            names,
            vec![
                format!("{prefix}_nvenc"),
                format!("{prefix}_amf"),
                format!("{prefix}_vaapi"),
            ]
        );
    }
}

#[test]
fn test_resolve_twice_same_answer() {
    let probe = StaticProbe::working(&["hevc_vaapi"]);
    for accel in ALL_ACCELS {
        assert_eq!(
            resolve(CodecFamily::Hevc, accel, &probe),
            resolve(CodecFamily::Hevc, accel, &probe)
        );
    }
}

#[test]
#[serial]
fn test_ffmpeg_prober_reads_registry_and_runs_synthetic_encode() {
    let fake = FakeFfmpeg::builder()
        .listed(&["libx264", "h264_nvenc", "h264_amf"])
        .functional(&["libx264", "h264_amf"])
        .install();
    let prober = FfmpegProber::new(fake.tool());

    let availability = usable_families(&prober);
    assert_eq!(
        availability,
        AccelAvailability {
            nvidia: false,
            amd: true,
            vaapi: false,
        }
    );

    let calls = fake.calls();
    let lavfi: Vec<_> = calls.iter().filter(|c| c.contains("lavfi")).collect();
    // vaapi is not listed, so its synthetic encode never runs
    assert_eq!(lavfi.len(), 2);
    assert!(lavfi[0].contains("-c:v h264_nvenc -frames:v 1"));
    assert!(lavfi[1].contains("-c:v h264_amf -frames:v 1"));
    assert!(lavfi[0].ends_with("-f null -"));
}

#[test]
#[serial]
fn test_ffmpeg_prober_vaapi_probe_uploads_frames() {
    let fake = FakeFfmpeg::builder()
        .listed(&["h264_vaapi"])
        .functional(&["h264_vaapi"])
        .install();
    let prober = FfmpegProber::new(fake.tool());

    let chosen = resolve(CodecFamily::H264, AccelPreference::Auto, &prober);
    assert_eq!(chosen.name, "h264_vaapi");

    let lavfi: Vec<_> = fake
        .calls()
        .into_iter()
        .filter(|c| c.contains("lavfi"))
        .collect();
    assert_eq!(lavfi.len(), 1);
    assert!(lavfi[0].contains("-vaapi_device /dev/dri/renderD128"));
    assert!(lavfi[0].contains("-vf format=nv12,hwupload"));
}

#[test]
#[serial]
fn test_ffmpeg_prober_timeout_means_absent() {
    let fake = FakeFfmpeg::builder().registry_hangs().install();
    let prober = FfmpegProber::new(fake.tool().with_probe_timeout(Duration::from_millis(300)));

    let start = Instant::now();
    assert!(!prober.is_present("h264_nvenc"));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_ffmpeg_prober_missing_binary() {
    let prober = FfmpegProber::new(vidopt::engine::FfmpegTool::new("/nonexistent/ffmpeg"));
    assert_eq!(usable_families(&prober), AccelAvailability::default());
}
