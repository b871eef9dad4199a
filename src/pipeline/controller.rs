use crate::error::{ProcessingError, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;
use tracing::{info, warn};

/// Stages run by `run`, in order.
pub const STAGES: [&str; 2] = ["ingest", "load"];

/// Runs each stage as a child process of an executable and stops at the
/// first one that exits non-zero.
#[derive(Debug, Clone)]
pub struct PipelineController {
    program: PathBuf,
    shared_args: Vec<OsString>,
}

impl PipelineController {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            shared_args: Vec::new(),
        }
    }

    /// Controller re-invoking the running binary.
    pub fn current() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Arguments appended after the stage name of every child, such as
    /// `--config` or `--date`.
    pub fn with_shared_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.shared_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub async fn run(&self) -> Result<()> {
        for stage in STAGES {
            self.run_stage(stage, &[OsString::from(stage)]).await?;
        }
        info!("Pipeline finished");
        Ok(())
    }

    /// Run `program <args> <shared args>` and log what it printed.
    pub async fn run_stage(&self, stage: &str, args: &[OsString]) -> Result<()> {
        info!(stage, program = %self.program.display(), "Starting stage");

        let output = Command::new(&self.program)
            .args(args)
            .args(&self.shared_args)
            .output()
            .await?;

        log_output(stage, &output);

        if output.status.success() {
            info!(stage, "Stage finished");
            Ok(())
        } else {
            Err(ProcessingError::StageFailed {
                stage: stage.to_string(),
                code: output.status.code(),
            })
        }
    }
}

fn log_output(stage: &str, output: &Output) {
    for line in decode_output(&output.stdout).lines().filter(|l| !l.trim().is_empty()) {
        info!("[{}] {}", stage, line);
    }
    for line in decode_output(&output.stderr).lines().filter(|l| !l.trim().is_empty()) {
        if output.status.success() {
            info!("[{}] {}", stage, line);
        } else {
            warn!("[{}] {}", stage, line);
        }
    }
}

/// UTF-8 if valid, otherwise IBM866 (Windows console code page) with
/// replacement characters for anything unmappable.
pub fn decode_output(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::IBM866.decode(bytes);
            text.into_owned()
        }
    }
}
