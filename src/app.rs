use crate::cli::{Cli, Commands, TranscodeArgs};
use std::io::Write;
use std::process;
use vidopt::config::Config;
use vidopt::engine::{
    self, CodecFamily, FfmpegProber, FfmpegTool, JobState, ProgressParser, TranscodeEvent,
    TranscodeRequest, Transcoder,
};

pub fn run(cli: Cli) {
    match cli.command {
        Commands::Transcode(args) => handle_transcode(args),
        Commands::Encoders { json } => handle_encoders(json),
        Commands::CheckFfmpeg => handle_check_ffmpeg(),
        Commands::InitConfig => handle_init_config(),
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: {:#}", e);
        Config::default()
    })
}

/// Flags win over `[defaults]` from the config file
fn build_request(args: &TranscodeArgs, config: &Config) -> TranscodeRequest {
    let codec = args
        .codec
        .as_deref()
        .map(CodecFamily::from_name)
        .unwrap_or(config.defaults.codec);

    TranscodeRequest::builder(&args.input, &args.output)
        .codec(codec)
        .crf(args.crf.unwrap_or(config.defaults.crf))
        .bitrate(args.bitrate.clone())
        .accel(args.accel.unwrap_or(config.defaults.accel))
        .scale(args.scale)
        .denoise(args.denoise)
        .two_pass(args.two_pass)
        .preset(
            args.preset
                .clone()
                .unwrap_or_else(|| config.defaults.preset.clone()),
        )
        .build()
}

fn handle_transcode(args: TranscodeArgs) {
    let config = load_config();
    let tool = FfmpegTool::from_config(&config);
    let transcoder = Transcoder::new(tool.clone());
    let request = build_request(&args, &config);

    if args.dry_run {
        let built = transcoder.plan(&request);
        println!("Encoder: {}", built.encoder);
        println!("{}", built.preview(tool.program()));
        return;
    }

    if !args.quiet {
        println!(
            "Transcoding: {} → {}",
            request.input_path().display(),
            request.output_path().display()
        );
    }

    let quiet = args.quiet;
    let mut parser = ProgressParser::new();
    let result = transcoder.transcode(&request, |event| match event {
        TranscodeEvent::StateChanged(state) => {
            if quiet {
                return;
            }
            match state {
                JobState::Running {
                    encoder,
                    pass,
                    total_passes,
                } => {
                    parser = ProgressParser::new();
                    if *total_passes > 1 {
                        println!("Encoding with {} (pass {}/{})", encoder, pass, total_passes);
                    } else {
                        println!("Encoding with {}", encoder);
                    }
                }
                JobState::FailedPrimary { encoder } => {
                    println!();
                    println!("{} failed; retrying with software encoder", encoder);
                }
                _ => {}
            }
        }
        TranscodeEvent::LogLine(line) => {
            if quiet {
                return;
            }
            if parser.parse_line(line) {
                if parser.out_time_us > 0 {
                    print!("\rTime: {:.1}s", parser.out_time_s());
                    if let Some(fps) = parser.fps {
                        print!(" | FPS: {:.1}", fps);
                    }
                    if let Some(speed) = parser.speed {
                        print!(" | Speed: {:.2}x", speed);
                    }
                    std::io::stdout().flush().ok();
                }
                if parser.is_complete {
                    println!();
                }
            } else {
                eprintln!("{}", line);
            }
        }
    });

    match result {
        Ok(done) => {
            if !quiet {
                let note = if done.fell_back {
                    " (software fallback)"
                } else {
                    ""
                };
                println!(
                    "✓ Completed: {} [{}]{}",
                    done.output_path.display(),
                    done.encoder.name,
                    note
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(diagnostics) = e.diagnostics().filter(|d| !d.trim().is_empty()) {
                // ffmpeg's own messages are at the end
                let lines: Vec<&str> = diagnostics.lines().collect();
                let tail = &lines[lines.len().saturating_sub(10)..];
                eprintln!("\nFFmpeg error:\n{}", tail.join("\n"));
            }
            process::exit(1);
        }
    }
}

fn handle_encoders(json: bool) {
    let config = load_config();
    let prober = FfmpegProber::new(FfmpegTool::from_config(&config));
    let availability = engine::usable_families(&prober);

    if json {
        match serde_json::to_string_pretty(&availability) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let yes_no = |ok: bool| if ok { "available" } else { "not available" };
    println!("NVIDIA NVENC: {}", yes_no(availability.nvidia));
    println!("AMD AMF:      {}", yes_no(availability.amd));
    println!("VA-API:       {}", yes_no(availability.vaapi));
    if !availability.any() {
        println!("Software encoding will be used.");
    }
}

fn handle_check_ffmpeg() {
    let config = load_config();
    match FfmpegTool::from_config(&config).version() {
        Ok(version) => {
            println!("ffmpeg found: {}", version);
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn handle_init_config() {
    let existed = Config::exists();
    if let Err(e) = Config::ensure_default() {
        eprintln!("Failed to save default config: {:#}", e);
        process::exit(1);
    }
    let path = match Config::config_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    if !existed {
        println!("Default config saved to {}", path.display());
        return;
    }

    match Config::load_from(&path) {
        Ok(cfg) => {
            println!("Config loaded successfully from {}", path.display());
            println!("{:#?}", cfg);
        }
        Err(e) => {
            eprintln!("Config invalid: {:#}", e);
            process::exit(1);
        }
    }
}
