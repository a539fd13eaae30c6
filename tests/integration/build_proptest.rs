// Property-based tests for command building
//
// These generate request permutations and check the builder's structural
// guarantees without running ffmpeg.

use proptest::prelude::*;
use std::path::PathBuf;
use vidopt::engine::ffmpeg_cmd::ACCEPTED_CONTAINERS;
use vidopt::engine::hardware::backend_for;
use vidopt::engine::{
    Bitrate, CodecFamily, EncoderFamily, Scale, TranscodeRequest, adapt, build_ffmpeg_cmd,
    normalize_output_path,
};

use crate::common::helpers::*;

// ============================================================================
// Strategies
// ============================================================================

fn codecs() -> impl Strategy<Value = CodecFamily> {
    prop_oneof![
        Just(CodecFamily::H264),
        Just(CodecFamily::Hevc),
        Just(CodecFamily::Av1),
    ]
}

fn families() -> impl Strategy<Value = EncoderFamily> {
    prop_oneof![
        Just(EncoderFamily::Software),
        Just(EncoderFamily::Nvidia),
        Just(EncoderFamily::Amd),
        Just(EncoderFamily::Vaapi),
    ]
}

fn bitrates() -> impl Strategy<Value = Option<Bitrate>> {
    prop::option::of(
        (1u32..=50_000, prop::sample::select(vec!["", "k", "M"]))
            .prop_map(|(amount, unit)| format!("{amount}{unit}").parse::<Bitrate>().unwrap()),
    )
}

fn scales() -> impl Strategy<Value = Option<Scale>> {
    prop::option::of((16u32..=7680, 16u32..=4320).prop_map(|(width, height)| Scale { width, height }))
}

prop_compose! {
    fn any_request()(
        codec in codecs(),
        crf in 0u8..=51,
        bitrate in bitrates(),
        scale in scales(),
        denoise in any::<bool>(),
        two_pass in any::<bool>(),
        preset in prop::sample::select(vec!["medium", "slow", "ultrafast", "p7", "bogus"]),
        output in "[a-z]{1,8}(\\.(mp4|mkv|webm|xyz))?",
    ) -> TranscodeRequest {
        request("/media/in.mov", &format!("/media/{output}"))
            .codec(codec)
            .crf(crf)
            .bitrate(bitrate)
            .scale(scale)
            .denoise(denoise)
            .two_pass(two_pass)
            .preset(preset)
            .build()
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Output always ends in an accepted container, and accepted ones are kept
    #[test]
    fn proptest_normalized_output_container(
        stem in "[a-zA-Z0-9_]{1,12}",
        ext in prop::option::of("[a-zA-Z0-9]{1,5}"),
    ) {
        let given = match &ext {
            Some(ext) => PathBuf::from(format!("{stem}.{ext}")),
            None => PathBuf::from(&stem),
        };
        let normalized = normalize_output_path(&given);

        let final_ext = normalized
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        prop_assert!(ACCEPTED_CONTAINERS.contains(&final_ext.as_str()));

        let kept = ext
            .as_ref()
            .is_some_and(|e| ACCEPTED_CONTAINERS.contains(&e.to_ascii_lowercase().as_str()));
        if kept {
            prop_assert_eq!(&normalized, &given);
        } else {
            prop_assert_eq!(normalized, PathBuf::from(format!("{}.mp4", given.display())));
        }
    }

    /// Same inputs, same argument lists
    #[test]
    fn proptest_build_is_pure(req in any_request(), family in families()) {
        let candidate = backend_for(req.codec(), family);
        let preset = adapt(&candidate, req.preset());
        prop_assert_eq!(
            build_ffmpeg_cmd(&req, &candidate, &preset),
            build_ffmpeg_cmd(&req, &candidate, &preset)
        );
    }

    /// Every pass reads the input and encodes with the chosen backend
    #[test]
    fn proptest_every_pass_names_encoder(req in any_request(), family in families()) {
        let candidate = backend_for(req.codec(), family);
        let built = build_ffmpeg_cmd(&req, &candidate, &adapt(&candidate, req.preset()));

        let expected_passes = if req.two_pass() && family == EncoderFamily::Software { 2 } else { 1 };
        prop_assert_eq!(built.passes.len(), expected_passes);
        for pass in &built.passes {
            prop_assert_eq!(arg_value(pass, "-i"), Some("/media/in.mov"));
            prop_assert_eq!(arg_value(pass, "-c:v"), Some(candidate.name));
        }

        let last = built.passes.last().unwrap();
        prop_assert_eq!(
            last.last().map(String::as_str),
            req.output_path().to_str()
        );
        prop_assert_eq!(arg_value(last, "-c:a"), Some("aac"));
    }

    /// CRF only reaches single-pass software encodes without a bitrate override
    #[test]
    fn proptest_crf_only_for_software(req in any_request(), family in families()) {
        let candidate = backend_for(req.codec(), family);
        let built = build_ffmpeg_cmd(&req, &candidate, &adapt(&candidate, req.preset()));
        let args = &built.passes[0];

        let crf_mode = family == EncoderFamily::Software
            && !req.two_pass()
            && req.bitrate().is_none();
        prop_assert_eq!(has_flag(args, "-crf"), crf_mode);
        prop_assert_eq!(has_flag(args, "-b:v"), !crf_mode);
        if crf_mode {
            let crf = req.crf().to_string();
            prop_assert_eq!(arg_value(args, "-crf"), Some(crf.as_str()));
        }
    }

    /// Both passes share everything up to `-pass`; only pass 2 writes audio and the output
    #[test]
    fn proptest_two_pass_symmetry(req in any_request()) {
        let candidate = backend_for(req.codec(), EncoderFamily::Software);
        let req = TranscodeRequest::builder(req.input_path(), req.output_path())
            .job_id(req.job_id())
            .codec(req.codec())
            .crf(req.crf())
            .bitrate(req.bitrate().cloned())
            .scale(req.scale())
            .denoise(req.denoise())
            .two_pass(true)
            .preset(req.preset())
            .build();
        let built = build_ffmpeg_cmd(&req, &candidate, &adapt(&candidate, req.preset()));

        prop_assert!(built.is_two_pass());
        let (pass1, pass2) = (&built.passes[0], &built.passes[1]);
        let split1 = pass1.iter().position(|a| a == "-pass").unwrap();
        let split2 = pass2.iter().position(|a| a == "-pass").unwrap();
        prop_assert_eq!(&pass1[..split1], &pass2[..split2]);

        prop_assert_eq!(arg_value(pass1, "-pass"), Some("1"));
        prop_assert_eq!(arg_value(pass2, "-pass"), Some("2"));
        prop_assert!(has_flag(pass1, "-an"));
        prop_assert!(!has_flag(pass1, "-c:a"));
        prop_assert_eq!(pass1.last().map(String::as_str), Some("/dev/null"));
        prop_assert!(!has_flag(pass2, "-an"));
        prop_assert!(has_flag(pass2, "-movflags"));
    }

    /// Buffer size is twice the target in the target's own unit
    #[test]
    fn proptest_bufsize_doubles_target(
        amount in 1u32..=50_000,
        unit in prop::sample::select(vec!["", "k", "M"]),
        family in families(),
    ) {
        let req = request("/media/in.mov", "/media/out.mp4")
            .bitrate(Some(format!("{amount}{unit}").parse().unwrap()))
            .build();
        let candidate = backend_for(CodecFamily::H264, family);
        let built = build_ffmpeg_cmd(&req, &candidate, &adapt(&candidate, req.preset()));
        let args = &built.passes[0];

        let target = format!("{amount}{unit}");
        let doubled = format!("{}{unit}", u64::from(amount) * 2);
        prop_assert_eq!(arg_value(args, "-b:v"), Some(target.as_str()));
        prop_assert_eq!(arg_value(args, "-maxrate"), Some(target.as_str()));
        prop_assert_eq!(arg_value(args, "-bufsize"), Some(doubled.as_str()));
    }
}
