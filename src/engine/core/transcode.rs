// Transcode executor: run the built command, stream stderr, fall back to software

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::error::{FailureClass, TranscodeError, classify_failure};
use super::ffmpeg_cmd::{BuiltCommand, build_ffmpeg_cmd, build_software_fallback_cmd};
use super::ffmpeg_info::FfmpegTool;
use super::preset::{self, DEFAULT_SOFTWARE_PRESET};
use super::types::{CodecFamily, EncoderCandidate, EncoderFamily, JobState, TranscodeRequest};
use crate::engine::hardware;
use crate::engine::probe::{CapabilityProbe, FfmpegProber};

/// What the executor reports while a job runs
#[derive(Debug, Clone, Copy)]
pub enum TranscodeEvent<'a> {
    StateChanged(&'a JobState),
    /// One line of ffmpeg's diagnostic stream, without the line terminator
    LogLine(&'a str),
}

/// Cloneable handle that stops a running transcode
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    running_pid: Mutex<Option<u32>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and signal the ffmpeg process currently running, if any
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(pid) = *self.pid_slot() {
            terminate(pid);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn pid_slot(&self) -> std::sync::MutexGuard<'_, Option<u32>> {
        self.inner
            .running_pid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, pid: u32) {
        let mut slot = self.pid_slot();
        *slot = Some(pid);
        // cancel() may have run between the pre-spawn check and now
        if self.is_cancelled() {
            terminate(pid);
        }
    }

    fn clear(&self) {
        *self.pid_slot() = None;
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    // SAFETY: plain signal delivery; the pid belongs to a child we spawned and have not reaped
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(pid, "SIGTERM failed: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) {
    tracing::debug!(pid, "process termination unsupported on this platform");
}

/// A finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcoded {
    pub output_path: PathBuf,
    /// Encoder that produced the file
    pub encoder: EncoderCandidate,
    pub fell_back: bool,
    pub passes: u8,
}

enum PassOutcome {
    /// Carries the last pass's stderr for the output check
    Succeeded { diagnostics: String },
    Failed {
        pass: u8,
        status: ExitStatus,
        diagnostics: String,
    },
    Cancelled,
}

/// Size and mtime of a file, to tell whether ffmpeg wrote to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        fs::metadata(path).ok().map(|meta| Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// What sat at the output path before the job spawned anything
#[derive(Debug, Clone, Copy)]
struct OutputBaseline(Option<FileStamp>);

impl OutputBaseline {
    fn capture(path: &Path) -> Self {
        Self(FileStamp::of(path))
    }

    /// A file is at `path` and this job created or rewrote it
    fn written_since(&self, path: &Path) -> bool {
        match FileStamp::of(path) {
            Some(now) => self.0 != Some(now),
            None => false,
        }
    }
}

/// Two-pass statistics directory, removed when the job ends however it ends
struct PasslogDir(Option<PathBuf>);

impl PasslogDir {
    fn create(dir: Option<&Path>) -> io::Result<Self> {
        if let Some(dir) = dir {
            fs::create_dir_all(dir)?;
        }
        Ok(Self(dir.map(Path::to_path_buf)))
    }
}

impl Drop for PasslogDir {
    fn drop(&mut self) {
        if let Some(dir) = &self.0 {
            if let Err(e) = fs::remove_dir_all(dir) {
                tracing::debug!(dir = %dir.display(), "failed to remove passlog dir: {}", e);
            }
        }
    }
}

type EventSink<'a> = dyn FnMut(TranscodeEvent<'_>) + 'a;

pub struct Transcoder<P = FfmpegProber> {
    tool: FfmpegTool,
    prober: P,
}

impl Transcoder<FfmpegProber> {
    pub fn new(tool: FfmpegTool) -> Self {
        let prober = FfmpegProber::new(tool.clone());
        Self { tool, prober }
    }
}

impl Default for Transcoder<FfmpegProber> {
    fn default() -> Self {
        Self::new(FfmpegTool::default())
    }
}

impl<P: CapabilityProbe> Transcoder<P> {
    pub fn with_prober(tool: FfmpegTool, prober: P) -> Self {
        Self { tool, prober }
    }

    pub fn tool(&self) -> &FfmpegTool {
        &self.tool
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Resolve, adapt and build without running anything.
    ///
    /// A single-pass job whose software encoder is missing from this ffmpeg build
    /// (no libx265 or libaom) is planned on libx264 with the default preset instead.
    pub fn plan(&self, request: &TranscodeRequest) -> BuiltCommand {
        let mut candidate = hardware::resolve(request.codec(), request.accel(), &self.prober);
        let mut requested_preset = request.preset();
        if candidate.family == EncoderFamily::Software
            && request.codec() != CodecFamily::H264
            && !request.two_pass()
            && !self.prober.is_present(candidate.name)
        {
            let substitute = hardware::software_candidate(CodecFamily::H264);
            tracing::warn!(
                missing = candidate.name,
                encoder = substitute.name,
                "software encoder not built into ffmpeg"
            );
            candidate = substitute;
            requested_preset = DEFAULT_SOFTWARE_PRESET;
        }
        let effective = preset::adapt(&candidate, requested_preset);
        build_ffmpeg_cmd(request, &candidate, &effective)
    }

    pub fn transcode<F>(
        &self,
        request: &TranscodeRequest,
        on_event: F,
    ) -> Result<Transcoded, TranscodeError>
    where
        F: FnMut(TranscodeEvent<'_>),
    {
        self.transcode_with_cancel(request, &CancelToken::new(), on_event)
    }

    pub fn transcode_with_cancel<F>(
        &self,
        request: &TranscodeRequest,
        cancel: &CancelToken,
        mut on_event: F,
    ) -> Result<Transcoded, TranscodeError>
    where
        F: FnMut(TranscodeEvent<'_>),
    {
        let span = tracing::info_span!("transcode", job_id = %request.job_id());
        let _entered = span.enter();

        let result = self.execute(request, cancel, &mut on_event);
        let terminal = match &result {
            Ok(_) => JobState::Succeeded,
            Err(TranscodeError::Cancelled) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        match &result {
            Ok(done) => tracing::info!(
                encoder = done.encoder.name,
                fell_back = done.fell_back,
                output = %done.output_path.display(),
                "transcode succeeded"
            ),
            Err(TranscodeError::Cancelled) => tracing::info!("transcode cancelled"),
            Err(e) => tracing::error!(kind = ?e.kind(), "transcode failed: {}", e),
        }
        set_state(&mut on_event, terminal);
        result
    }

    fn execute(
        &self,
        request: &TranscodeRequest,
        cancel: &CancelToken,
        on_event: &mut EventSink<'_>,
    ) -> Result<Transcoded, TranscodeError> {
        set_state(on_event, JobState::Building);

        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        if !request.input_path().exists() {
            return Err(TranscodeError::InputNotFound(
                request.input_path().to_path_buf(),
            ));
        }
        if same_file(request.input_path(), request.output_path()) {
            return Err(TranscodeError::SameInputOutput(
                request.output_path().to_path_buf(),
            ));
        }
        if let Some(parent) = request.output_path().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let built = self.plan(request);
        tracing::debug!(
            encoder = built.encoder.name,
            passes = built.pass_count(),
            "command: {}",
            built.preview(self.tool.program())
        );
        let _passlog = PasslogDir::create(built.passlog_dir.as_deref())?;
        let baseline = OutputBaseline::capture(request.output_path());

        let (pass, status, diagnostics) = match self.run_passes(&built, cancel, on_event)? {
            PassOutcome::Succeeded { diagnostics } => {
                return self.verify(request, &built, false, diagnostics, on_event);
            }
            PassOutcome::Cancelled => {
                remove_partial_output(request.output_path(), &baseline);
                return Err(TranscodeError::Cancelled);
            }
            PassOutcome::Failed {
                pass,
                status,
                diagnostics,
            } => (pass, status, diagnostics),
        };

        let primary = built.encoder;
        let retry = primary.family.is_hardware()
            && !built.is_two_pass()
            && classify_failure(&diagnostics) == FailureClass::Retryable;

        if !retry {
            remove_partial_output(request.output_path(), &baseline);
            return Err(process_failed(&built, pass, status, false, diagnostics));
        }

        tracing::warn!(
            encoder = primary.name,
            status = %status,
            "hardware encoder failed, retrying with software"
        );
        set_state(
            on_event,
            JobState::FailedPrimary {
                encoder: primary.name.to_string(),
            },
        );
        remove_partial_output(request.output_path(), &baseline);

        let fallback = build_software_fallback_cmd(request);
        tracing::debug!(
            encoder = fallback.encoder.name,
            "fallback command: {}",
            fallback.preview(self.tool.program())
        );
        set_state(
            on_event,
            JobState::RetryingSoftware {
                encoder: fallback.encoder.name.to_string(),
            },
        );

        match self.run_passes(&fallback, cancel, on_event)? {
            PassOutcome::Succeeded { diagnostics } => {
                self.verify(request, &fallback, true, diagnostics, on_event)
            }
            PassOutcome::Cancelled => {
                remove_partial_output(request.output_path(), &baseline);
                Err(TranscodeError::Cancelled)
            }
            PassOutcome::Failed {
                pass,
                status,
                diagnostics,
            } => {
                remove_partial_output(request.output_path(), &baseline);
                Err(process_failed(&fallback, pass, status, true, diagnostics))
            }
        }
    }

    fn run_passes(
        &self,
        built: &BuiltCommand,
        cancel: &CancelToken,
        on_event: &mut EventSink<'_>,
    ) -> Result<PassOutcome, TranscodeError> {
        let total_passes = built.pass_count();
        let mut last_diagnostics = String::new();

        for (idx, cmd) in built.to_commands(self.tool.program()).into_iter().enumerate() {
            let pass = idx as u8 + 1;
            if cancel.is_cancelled() {
                return Ok(PassOutcome::Cancelled);
            }
            set_state(
                on_event,
                JobState::Running {
                    encoder: built.encoder.name.to_string(),
                    pass,
                    total_passes,
                },
            );

            let (status, diagnostics) = self.run_pass(cmd, cancel, on_event)?;
            // A signalled ffmpeg may still exit 0 with a truncated file
            if cancel.is_cancelled() {
                return Ok(PassOutcome::Cancelled);
            }
            if !status.success() {
                return Ok(PassOutcome::Failed {
                    pass,
                    status,
                    diagnostics,
                });
            }
            last_diagnostics = diagnostics;
        }

        Ok(PassOutcome::Succeeded {
            diagnostics: last_diagnostics,
        })
    }

    /// Spawn one ffmpeg pass and forward its stderr line by line until it exits
    fn run_pass(
        &self,
        mut cmd: Command,
        cancel: &CancelToken,
        on_event: &mut EventSink<'_>,
    ) -> Result<(ExitStatus, String), TranscodeError> {
        let mut child = cmd.spawn().map_err(|source| TranscodeError::ToolUnavailable {
            program: self.tool.program.clone(),
            source,
        })?;
        cancel.register(child.id());

        let mut raw = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        raw.extend_from_slice(&buf);
                        let text = String::from_utf8_lossy(&buf);
                        on_event(TranscodeEvent::LogLine(text.trim_end_matches(['\n', '\r'])));
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::debug!("stopped reading ffmpeg stderr: {}", e);
                        break;
                    }
                }
            }
        }

        let status = child.wait();
        cancel.clear();
        Ok((status?, String::from_utf8_lossy(&raw).into_owned()))
    }

    fn verify(
        &self,
        request: &TranscodeRequest,
        built: &BuiltCommand,
        fell_back: bool,
        diagnostics: String,
        on_event: &mut EventSink<'_>,
    ) -> Result<Transcoded, TranscodeError> {
        set_state(on_event, JobState::Verifying);

        let output_path = request.output_path();
        if !output_path.exists() {
            return Err(TranscodeError::OutputMissing {
                path: output_path.to_path_buf(),
                diagnostics,
            });
        }

        Ok(Transcoded {
            output_path: output_path.to_path_buf(),
            encoder: built.encoder,
            fell_back,
            passes: built.pass_count(),
        })
    }
}

fn set_state(on_event: &mut EventSink<'_>, state: JobState) {
    tracing::info!(state = ?state, "state change");
    on_event(TranscodeEvent::StateChanged(&state));
}

fn process_failed(
    built: &BuiltCommand,
    pass: u8,
    status: ExitStatus,
    after_fallback: bool,
    diagnostics: String,
) -> TranscodeError {
    TranscodeError::ProcessFailed {
        encoder: built.encoder.name.to_string(),
        pass: built.is_two_pass().then_some(pass),
        status: status.to_string(),
        after_fallback,
        diagnostics,
    }
}

/// `output` exists and resolves to the same file as `input`
fn same_file(input: &Path, output: &Path) -> bool {
    match (fs::canonicalize(input), fs::canonicalize(output)) {
        (Ok(input), Ok(output)) => input == output,
        _ => false,
    }
}

/// Delete the output only if this job wrote it; a file the user already had stays
fn remove_partial_output(path: &Path, baseline: &OutputBaseline) {
    if !baseline.written_since(path) {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial output"),
        Err(e) => tracing::warn!(path = %path.display(), "failed to remove partial output: {}", e),
    }
}
