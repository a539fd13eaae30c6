use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::config::Config;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where to find ffmpeg and how long capability probes may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTool {
    pub program: PathBuf,
    pub probe_timeout: Duration,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl FfmpegTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.ffmpeg.binary.clone(),
            probe_timeout: Duration::from_secs(config.ffmpeg.probe_timeout_secs),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn command(&self) -> Command {
        Command::new(&self.program)
    }

    /// First line of `ffmpeg -version`
    pub fn version(&self) -> Result<String> {
        let output = self.command().arg("-version").output().with_context(|| {
            format!(
                "Failed to execute {}. Is ffmpeg installed and in PATH?",
                self.program.display()
            )
        })?;

        if !output.status.success() {
            anyhow::bail!("ffmpeg command failed with status: {}", output.status);
        }

        let version_output = String::from_utf8_lossy(&output.stdout);
        Ok(parse_version_line(&version_output))
    }
}

fn parse_version_line(version_output: &str) -> String {
    version_output
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .unwrap_or("Unknown version")
        .to_string()
}
