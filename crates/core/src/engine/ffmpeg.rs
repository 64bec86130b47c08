//! Local ffmpeg subprocess executor.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::context::{cancelled, ExecutionContext};
use super::error::ExecutionError;
use super::traits::{EngineExecutor, ExecutionOutput};
use crate::options::ConversionOptions;
use crate::registry::{EngineCapabilities, EngineId, MediaFormat};
use crate::task::{ConversionTask, InputSource};

/// ffmpeg reports out_time_ms in microseconds despite the name.
static OUT_TIME_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"out_time_ms=(\d+)").ok());

const STDERR_TAIL_LINES: usize = 40;

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./converted")
}

fn default_log_level() -> String {
    "error".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Where converted files are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            output_dir: default_output_dir(),
            log_level: default_log_level(),
        }
    }
}

/// What ffprobe reported about an input.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub format_name: String,
    pub duration_secs: Option<f64>,
    pub size_bytes: Option<u64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
}

/// Executor that shells out to ffmpeg on this host.
pub struct FfmpegExecutor {
    id: EngineId,
    config: FfmpegConfig,
}

impl FfmpegExecutor {
    pub fn new(id: EngineId, config: FfmpegConfig) -> Self {
        Self { id, config }
    }

    /// Probe an input with ffprobe. Used for duration (progress
    /// percentages) and the detected container format.
    pub async fn probe(&self, input: &str) -> Result<MediaProbe, ExecutionError> {
        let output = Command::new(&self.config.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(ExecutionError::CorruptInput(format!(
                "ffprobe could not read '{input}'"
            )));
        }
        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExecutionError::Internal(format!("unreadable ffprobe output: {e}")))?;
        Ok(MediaProbe {
            format_name: parsed.format.format_name,
            duration_secs: parsed.format.duration.and_then(|d| d.parse().ok()),
            size_bytes: parsed.format.size.and_then(|s| s.parse().ok()),
        })
    }

    /// Command line for one conversion, minus the binary name.
    fn build_args(&self, task: &ConversionTask, output_path: &PathBuf) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-nostdin".into(),
            "-loglevel".into(),
            self.config.log_level.clone(),
            "-progress".into(),
            "pipe:2".into(),
            "-i".into(),
            task.input.location().to_string(),
        ];

        if task.output_format.is_video() {
            let (vcodec, acodec) = video_codecs(task.output_format);
            args.extend(["-c:v".into(), vcodec.into(), "-c:a".into(), acodec.into()]);
            if let Some(quality) = task.options.quality() {
                args.extend(["-crf".into(), quality.crf().to_string()]);
                if task.output_format == MediaFormat::Webm {
                    // vp9 treats -crf as constant quality only with -b:v 0
                    args.extend(["-b:v".into(), "0".into()]);
                }
            }
            if let Some(resolution) = task.options.resolution() {
                args.extend(["-vf".into(), resolution.scale_filter()]);
            }
            if let Some(framerate) = task.options.framerate() {
                args.extend(["-r".into(), framerate.to_string()]);
            }
        } else {
            args.extend(["-vn".into(), "-c:a".into(), audio_codec(task.output_format).into()]);
            if let Some(quality) = task.options.quality() {
                if matches!(task.output_format, MediaFormat::Mp3 | MediaFormat::Ogg | MediaFormat::M4a) {
                    args.extend(["-b:a".into(), format!("{}k", quality.audio_bitrate_kbps())]);
                }
            }
            if let ConversionOptions::Audio(audio) = &task.options {
                if let Some(rate) = audio.sample_rate_hz {
                    args.extend(["-ar".into(), rate.to_string()]);
                }
            }
        }

        args.push(output_path.to_string_lossy().into_owned());
        args
    }

    fn output_path(&self, task: &ConversionTask) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}.{}", task.id, task.output_format.extension()))
    }

    async fn input_size(&self, task: &ConversionTask) -> Option<u64> {
        match &task.input {
            InputSource::Upload { location } => {
                tokio::fs::metadata(location).await.ok().map(|m| m.len())
            }
            InputSource::RemoteUrl { .. } => None,
        }
    }
}

fn video_codecs(format: MediaFormat) -> (&'static str, &'static str) {
    match format {
        MediaFormat::Webm => ("libvpx-vp9", "libopus"),
        MediaFormat::Avi => ("mpeg4", "libmp3lame"),
        _ => ("libx264", "aac"),
    }
}

fn audio_codec(format: MediaFormat) -> &'static str {
    match format {
        MediaFormat::Mp3 => "libmp3lame",
        MediaFormat::Flac => "flac",
        MediaFormat::Wav => "pcm_s16le",
        MediaFormat::Ogg => "libvorbis",
        _ => "aac",
    }
}

/// Progress percentage from one `-progress pipe:2` line, when the
/// total duration is known.
fn parse_progress(line: &str, total_duration_secs: Option<f64>) -> Option<f32> {
    let total = total_duration_secs?;
    if total <= 0.0 {
        return None;
    }
    let captures = OUT_TIME_RE.as_ref()?.captures(line)?;
    let micros: f64 = captures.get(1)?.as_str().parse().ok()?;
    Some(((micros / 1_000_000.0 / total) * 100.0).clamp(0.0, 100.0) as f32)
}

/// Map a failed ffmpeg exit to an error class from the stderr tail.
fn classify_stderr(tail: &str, exit_code: Option<i32>) -> ExecutionError {
    let lower = tail.to_lowercase();
    if lower.contains("invalid data found when processing input")
        || lower.contains("moov atom not found")
        || lower.contains("could not find codec parameters")
        || lower.contains("header missing")
        || lower.contains("end of file")
    {
        return ExecutionError::CorruptInput(last_line(tail));
    }
    if lower.contains("unknown encoder")
        || lower.contains("encoder not found")
        || lower.contains("unsupported codec")
        || lower.contains("not currently supported in container")
    {
        return ExecutionError::UnsupportedCodec(last_line(tail));
    }
    if lower.contains("no space left on device")
        || lower.contains("cannot allocate memory")
        || lower.contains("out of memory")
    {
        return ExecutionError::ResourceExhausted(last_line(tail));
    }
    ExecutionError::Internal(format!(
        "ffmpeg exited with status {}: {}",
        exit_code.map_or("unknown".to_string(), |c| c.to_string()),
        last_line(tail)
    ))
}

fn last_line(tail: &str) -> String {
    tail.lines()
        .rev()
        .find(|l| !l.trim().is_empty() && !l.contains('='))
        .unwrap_or("no stderr output")
        .to_string()
}

enum AttemptEnd {
    Exited(std::process::ExitStatus, String),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl EngineExecutor for FfmpegExecutor {
    fn id(&self) -> &EngineId {
        &self.id
    }

    async fn availability(&self) -> Result<(), ExecutionError> {
        let probe = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match tokio::time::timeout(Duration::from_secs(5), probe).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(ExecutionError::Unavailable(format!(
                "{} -version exited with {status}",
                self.config.ffmpeg_path
            ))),
            Ok(Err(e)) => Err(ExecutionError::Unavailable(format!(
                "cannot run {}: {e}",
                self.config.ffmpeg_path
            ))),
            Err(_) => Err(ExecutionError::Unavailable(format!(
                "{} -version did not respond",
                self.config.ffmpeg_path
            ))),
        }
    }

    async fn execute(
        &self,
        task: &ConversionTask,
        capabilities: &EngineCapabilities,
        ctx: ExecutionContext,
    ) -> Result<ExecutionOutput, ExecutionError> {
        if let Some(size_bytes) = self.input_size(task).await {
            if size_bytes > capabilities.max_file_size_bytes {
                return Err(ExecutionError::InputTooLarge {
                    size_bytes,
                    max_bytes: capabilities.max_file_size_bytes,
                });
            }
        }

        // Duration is only needed for progress percentages; a failed
        // probe is not fatal here, ffmpeg itself will report corrupt
        // input.
        let duration_secs = match self.probe(task.input.location()).await {
            Ok(probe) => probe.duration_secs,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "ffprobe failed, progress disabled");
                None
            }
        };

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let output_path = self.output_path(task);
        let args = self.build_args(task, &output_path);
        debug!(task_id = %task.id, ?args, "starting ffmpeg");

        let started = Instant::now();
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::Unavailable(format!(
                    "failed to spawn {}: {e}",
                    self.config.ffmpeg_path
                ))
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::Internal("ffmpeg stderr not captured".to_string()))?;
        let mut cancel = ctx.cancel_signal();

        let end = {
            let run = async {
                let mut lines = BufReader::new(stderr).lines();
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                while let Some(line) = lines.next_line().await? {
                    if let Some(pct) = parse_progress(&line, duration_secs) {
                        ctx.report_progress(pct);
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                let status = child.wait().await?;
                let tail = tail.into_iter().collect::<Vec<_>>().join("\n");
                Ok::<_, std::io::Error>((status, tail))
            };
            tokio::pin!(run);
            tokio::select! {
                res = &mut run => match res {
                    Ok((status, tail)) => AttemptEnd::Exited(status, tail),
                    Err(e) => return Err(ExecutionError::Io(e)),
                },
                _ = tokio::time::sleep(ctx.deadline) => AttemptEnd::TimedOut,
                _ = cancelled(&mut cancel) => AttemptEnd::Cancelled,
            }
        };

        match end {
            AttemptEnd::TimedOut => {
                let _ = child.kill().await;
                let _ = tokio::fs::remove_file(&output_path).await;
                Err(ExecutionError::Timeout {
                    timeout_secs: ctx.deadline.as_secs(),
                })
            }
            AttemptEnd::Cancelled => {
                let _ = child.kill().await;
                let _ = tokio::fs::remove_file(&output_path).await;
                Err(ExecutionError::Cancelled)
            }
            AttemptEnd::Exited(status, tail) => {
                if !status.success() {
                    let _ = tokio::fs::remove_file(&output_path).await;
                    return Err(classify_stderr(&tail, status.code()));
                }
                let size_bytes = tokio::fs::metadata(&output_path).await?.len();
                Ok(ExecutionOutput {
                    location: output_path.to_string_lossy().into_owned(),
                    size_bytes,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }
}
