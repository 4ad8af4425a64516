//! Segmenter subprocess.
//!
//! Runs ffmpeg (or any program following the same argument template) to read
//! the source stream and write `segment_%05d.wav` files into the job's
//! working directory. The child is killed when the job is cancelled or the
//! handle is dropped.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::IngestError;
use crate::domain::segment::{INDEX_WIDTH, SEGMENT_EXTENSION, SEGMENT_PREFIX};

/// How long to keep forwarding stderr after the process exits
const STDERR_DRAIN: Duration = Duration::from_millis(500);

/// Default ffmpeg arguments: mono 16 kHz PCM in fixed-length segments
pub const DEFAULT_ARGS: &[&str] = &[
    "-hide_banner",
    "-loglevel",
    "error",
    "-i",
    "{input}",
    "-vn",
    "-ac",
    "1",
    "-ar",
    "16000",
    "-c:a",
    "pcm_s16le",
    "-f",
    "segment",
    "-segment_time",
    "{seconds}",
    "-reset_timestamps",
    "1",
    "{output}",
];

/// How the segmenter process ended
#[derive(Debug)]
pub enum SegmenterExit {
    /// Exited with status 0
    Finished,
    /// Exited unsuccessfully, with the exit status description
    Failed(String),
    /// Killed because the job was cancelled
    Cancelled,
}

/// Segmenter command template
#[derive(Debug, Clone)]
pub struct Segmenter {
    program: String,
    args: Vec<String>,
    segment_seconds: u32,
}

impl Segmenter {
    /// Create a segmenter using the default ffmpeg arguments
    pub fn new(program: impl Into<String>, segment_seconds: u32) -> Self {
        Self {
            program: program.into(),
            args: DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            segment_seconds,
        }
    }

    /// Replace the argument template.
    ///
    /// Placeholders: `{input}`, `{output}`, `{dir}`, `{seconds}`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Expand the argument template for one job
    pub fn render_args(&self, input: &str, dir: &Path) -> Vec<String> {
        let output = dir.join(format!(
            "{}%0{}d.{}",
            SEGMENT_PREFIX, INDEX_WIDTH, SEGMENT_EXTENSION
        ));
        let output = output.to_string_lossy();
        let dir = dir.to_string_lossy();
        let seconds = self.segment_seconds.to_string();

        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", input)
                    .replace("{output}", &output)
                    .replace("{dir}", &dir)
                    .replace("{seconds}", &seconds)
            })
            .collect()
    }

    /// Start the process writing into `dir`
    pub fn spawn(&self, job_id: &str, input: &str, dir: &Path) -> Result<SegmenterProcess, IngestError> {
        let args = self.render_args(input, dir);
        debug!(job_id, program = %self.program, ?args, "spawning segmenter");

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(IngestError::SegmenterSpawn)?;

        // Forward stderr into the log
        let stderr_task = child.stderr.take().map(|stderr| {
            let job_id = job_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(job_id = %job_id, "segmenter: {}", line);
                }
            })
        });

        Ok(SegmenterProcess { child, stderr_task })
    }
}

/// A running segmenter
pub struct SegmenterProcess {
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

impl SegmenterProcess {
    /// Wait for the process to exit, killing it if `cancel` fires first
    pub async fn wait(&mut self, cancel: &CancellationToken) -> SegmenterExit {
        let exit = tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) if status.success() => SegmenterExit::Finished,
                Ok(status) => SegmenterExit::Failed(status.to_string()),
                Err(e) => SegmenterExit::Failed(format!("wait error: {}", e)),
            },
            _ = cancel.cancelled() => {
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "failed to kill segmenter");
                }
                SegmenterExit::Cancelled
            }
        };

        // Grandchildren may keep stderr open after the child is gone
        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN, &mut task).await.is_err() {
                task.abort();
            }
        }
        exit
    }
}
