// Encoder capability probing using ffmpeg

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::core::ffmpeg_cmd::{VAAPI_DEVICE, VAAPI_UPLOAD_FILTER};
use crate::engine::core::{EncoderCandidate, EncoderFamily, FfmpegTool, ProbeResult};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Answers "is this encoder installed" and "does it actually work here"
pub trait CapabilityProbe {
    fn is_present(&self, name: &str) -> bool;

    fn is_functional(&self, candidate: &EncoderCandidate) -> bool;

    /// Functional is only checked when present
    fn probe(&self, candidate: &EncoderCandidate) -> ProbeResult {
        let present = self.is_present(candidate.name);
        let functional = present && self.is_functional(candidate);
        ProbeResult {
            present,
            functional,
        }
    }
}

impl<T: CapabilityProbe + ?Sized> CapabilityProbe for &T {
    fn is_present(&self, name: &str) -> bool {
        (**self).is_present(name)
    }

    fn is_functional(&self, candidate: &EncoderCandidate) -> bool {
        (**self).is_functional(candidate)
    }
}

/// Probes by running the configured ffmpeg binary
#[derive(Debug, Clone, Default)]
pub struct FfmpegProber {
    tool: FfmpegTool,
}

impl FfmpegProber {
    pub fn new(tool: FfmpegTool) -> Self {
        Self { tool }
    }

    pub fn tool(&self) -> &FfmpegTool {
        &self.tool
    }

    fn run(&self, cmd: Command) -> Option<ProbeOutput> {
        match run_with_timeout(cmd, self.tool.probe_timeout) {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::debug!(program = %self.tool.program.display(), "probe failed: {}", e);
                None
            }
        }
    }
}

impl CapabilityProbe for FfmpegProber {
    fn is_present(&self, name: &str) -> bool {
        let mut cmd = self.tool.command();
        cmd.args(["-hide_banner", "-encoders"]);

        let present = self
            .run(cmd)
            .filter(|out| out.status.success())
            .is_some_and(|out| encoder_listed(&out.stdout, name));
        tracing::debug!(encoder = name, present, "encoder registry probe");
        present
    }

    fn is_functional(&self, candidate: &EncoderCandidate) -> bool {
        let mut cmd = self.tool.command();
        cmd.args(functional_test_args(candidate));

        let functional = self.run(cmd).is_some_and(|out| out.status.success());
        tracing::debug!(encoder = candidate.name, functional, "synthetic encode probe");
        functional
    }
}

/// One-frame synthetic encode through `candidate`, discarded by the null muxer
pub fn functional_test_args(candidate: &EncoderCandidate) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-hide_banner", "-nostdin", "-loglevel", "panic"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if candidate.family == EncoderFamily::Vaapi {
        args.extend(["-vaapi_device".to_string(), VAAPI_DEVICE.to_string()]);
    }

    args.extend(
        [
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=1:size=320x240:rate=1",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    if candidate.family == EncoderFamily::Vaapi {
        args.extend(["-vf".to_string(), VAAPI_UPLOAD_FILTER.to_string()]);
    }

    args.extend(
        ["-c:v", candidate.name, "-frames:v", "1", "-an", "-f", "null", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Whether `ffmpeg -encoders` output lists `name` in its encoder-name column.
///
/// Registry lines look like ` V....D libx264              libx264 H.264 ...`.
pub fn encoder_listed(listing: &str, name: &str) -> bool {
    listing.lines().any(|line| {
        let mut cols = line.split_whitespace();
        match (cols.next(), cols.next()) {
            (Some(flags), Some(encoder)) => {
                flags.len() == 6 && !flags.contains('=') && encoder == name
            }
            _ => false,
        }
    })
}

#[derive(Debug)]
pub struct ProbeOutput {
    pub status: ExitStatus,
    pub stdout: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("error waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("timed out after {:.1}s", .0.as_secs_f64())]
    TimedOut(Duration),
}

/// Run `cmd` with stdout captured, killing it if it outlives `timeout`
pub fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ProbeOutput, ProbeError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(ProbeError::Spawn)?;

    let (tx, rx) = mpsc::channel();
    if let Some(mut stdout) = child.stdout.take() {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
    }

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if start.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::TimedOut(timeout));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(ProbeError::Wait(e));
            }
        }
    };

    // A grandchild may still hold the pipe open; don't wait on it forever
    let stdout = rx.recv_timeout(Duration::from_secs(1)).unwrap_or_default();
    Ok(ProbeOutput { status, stdout })
}
