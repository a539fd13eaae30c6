use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse category of a [`TranscodeError`], for callers that branch on the failure type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputNotFound,
    SameInputOutput,
    ProcessFailed,
    OutputMissing,
    Cancelled,
    ToolUnavailable,
    WorkerPanicked,
    Io,
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// ffmpeg would overwrite its own source
    #[error("output {} is the input file", .0.display())]
    SameInputOutput(PathBuf),

    #[error(
        "{encoder} failed{} with {status}{}",
        pass_suffix(*pass),
        fallback_suffix(*after_fallback)
    )]
    ProcessFailed {
        encoder: String,
        pass: Option<u8>,
        status: String,
        after_fallback: bool,
        diagnostics: String,
    },

    #[error("ffmpeg reported success but {} was not created", path.display())]
    OutputMissing { path: PathBuf, diagnostics: String },

    #[error("transcode cancelled")]
    Cancelled,

    #[error("failed to launch {}: {source}", program.display())]
    ToolUnavailable {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transcode worker panicked: {0}")]
    WorkerPanicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn pass_suffix(pass: Option<u8>) -> String {
    pass.map(|p| format!(" (pass {})", p)).unwrap_or_default()
}

fn fallback_suffix(after_fallback: bool) -> &'static str {
    if after_fallback {
        " after software fallback"
    } else {
        ""
    }
}

impl TranscodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputNotFound(_) => ErrorKind::InputNotFound,
            Self::SameInputOutput(_) => ErrorKind::SameInputOutput,
            Self::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            Self::OutputMissing { .. } => ErrorKind::OutputMissing,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            Self::WorkerPanicked(_) => ErrorKind::WorkerPanicked,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Captured ffmpeg diagnostic text, when the failure came from a process run
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::ProcessFailed { diagnostics, .. } | Self::OutputMissing { diagnostics, .. } => {
                Some(diagnostics)
            }
            _ => None,
        }
    }
}

/// Verdict of [`classify_failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The encoder itself is unusable here; a software retry may succeed
    Retryable,
    Fatal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retryable => f.write_str("retryable"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// Lower-case fragments of ffmpeg output that mean "this encoder cannot run on this machine".
pub const ENCODER_UNUSABLE_MARKERS: &[&str] = &[
    "not available",
    "unknown encoder",
    "no such file",
    "cannot load",
];

/// Decide whether a failed hardware encode should be retried in software.
///
/// This is a text heuristic over ffmpeg's stderr and is kept in one place so the
/// rules can be tested and swapped without touching the executor.
pub fn classify_failure(diagnostics: &str) -> FailureClass {
    let lower = diagnostics.to_lowercase();
    if ENCODER_UNUSABLE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
    {
        FailureClass::Retryable
    } else {
        FailureClass::Fatal
    }
}
