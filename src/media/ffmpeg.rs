//! ffmpeg-backed encoder and recorder
//!
//! Child processes use `kill_on_drop(true)`: when the timeout fires the
//! future is dropped and the child gets SIGKILL, so unresponsive cameras do
//! not leave ffmpeg processes behind.

use super::{MediaError, RecordedClip, VideoEncoder, VideoRecorder};
use crate::camera_directory::CameraRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// Playback timestamp format substituted into `{start}` / `{end}`
const PLAYBACK_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Run a tool to completion under a timeout, capturing stdout/stderr
async fn run_tool(program: &str, args: &[&str], timeout_secs: u64) -> Result<Output, MediaError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MediaError::Spawn {
            program: program.to_string(),
            message: e.to_string(),
        })?;

    match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                return Err(MediaError::Failed {
                    program: program.to_string(),
                    code: output.status.code(),
                    stderr,
                });
            }
            Ok(output)
        }
        Ok(Err(e)) => Err(MediaError::Io(e)),
        Err(_) => {
            tracing::warn!(
                program = %program,
                timeout_sec = timeout_secs,
                "Process timeout, killed via kill_on_drop"
            );
            Err(MediaError::Timeout {
                program: program.to_string(),
                secs: timeout_secs,
            })
        }
    }
}

// ============================================================
// Encoder
// ============================================================

/// Concat-script encoder
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    timeout_secs: u64,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout_secs,
        }
    }

    fn args<'a>(script: &'a str, output: &'a str) -> Vec<&'a str> {
        vec![
            "-y",
            "-f", "concat",
            "-safe", "0",
            "-i", script,
            "-vsync", "vfr",
            // yuv420p needs even dimensions
            "-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            "-pix_fmt", "yuv420p",
            "-c:v", "libx264",
            "-movflags", "+faststart",
            "-loglevel", "error",
            output,
        ]
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn run(&self, script_path: &Path, output_path: &Path) -> Result<(), MediaError> {
        let script = script_path.to_string_lossy();
        let output = output_path.to_string_lossy();

        let result = run_tool(
            &self.ffmpeg_path,
            &Self::args(&script, &output),
            self.timeout_secs,
        )
        .await?;

        tracing::debug!(
            output = %output,
            stdout = %String::from_utf8_lossy(&result.stdout).trim(),
            "Clip encoded"
        );
        Ok(())
    }
}

// ============================================================
// Recorder
// ============================================================

/// Device-side export through an RTSP playback URL
///
/// The camera's `playback_url` carries `{start}` / `{end}` placeholders that
/// are replaced with UTC timestamps (`20230418T073528Z`).
pub struct FfmpegRecorder {
    ffmpeg_path: String,
    ffprobe_path: String,
    output_dir: PathBuf,
    /// Slack on top of the clip length before the export is killed
    timeout_slack_secs: u64,
}

impl FfmpegRecorder {
    pub async fn new(ffmpeg_path: impl Into<String>, output_dir: PathBuf) -> Result<Self, MediaError> {
        fs::create_dir_all(&output_dir).await?;
        let ffmpeg_path = ffmpeg_path.into();
        let ffprobe_path = ffmpeg_path.replace("ffmpeg", "ffprobe");

        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
            output_dir,
            timeout_slack_secs: 30,
        })
    }

    fn playback_url(template: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        template
            .replace("{start}", &start.format(PLAYBACK_TIME_FORMAT).to_string())
            .replace("{end}", &end.format(PLAYBACK_TIME_FORMAT).to_string())
    }

    /// Parse ffprobe `WIDTHxHEIGHT` output
    fn parse_dimensions(stdout: &str) -> Option<(u32, u32)> {
        let line = stdout.lines().find(|l| !l.trim().is_empty())?;
        let (w, h) = line.trim().split_once('x')?;
        Some((w.parse().ok()?, h.parse().ok()?))
    }

    async fn probe_dimensions(&self, path: &Path) -> Result<(u32, u32), MediaError> {
        let path = path.to_string_lossy();
        let output = run_tool(
            &self.ffprobe_path,
            &[
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=width,height",
                "-of", "csv=s=x:p=0",
                &path,
            ],
            15,
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_dimensions(&stdout)
            .ok_or_else(|| MediaError::Decode(format!("ffprobe output unreadable: {}", stdout.trim())))
    }
}

#[async_trait]
impl VideoRecorder for FfmpegRecorder {
    async fn record(
        &self,
        camera: &CameraRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        output_name: &str,
    ) -> Result<RecordedClip, MediaError> {
        let template = camera.playback_url.as_deref().ok_or_else(|| MediaError::Spawn {
            program: self.ffmpeg_path.clone(),
            message: format!("camera {} has no playback url", camera.id),
        })?;

        let url = Self::playback_url(template, start, end);
        let duration = (end - start).num_seconds().max(1);
        let duration_arg = duration.to_string();
        let path = self.output_dir.join(output_name);
        let path_arg = path.to_string_lossy().to_string();

        let result = run_tool(
            &self.ffmpeg_path,
            &[
                "-rtsp_transport", "tcp",
                "-i", &url,
                "-t", &duration_arg,
                "-c", "copy",
                "-movflags", "+faststart",
                "-loglevel", "error",
                "-y",
                &path_arg,
            ],
            duration as u64 + self.timeout_slack_secs,
        )
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }

        let (width, height) = match self.probe_dimensions(&path).await {
            Ok(dims) => dims,
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                return Err(e);
            }
        };

        tracing::debug!(
            camera_id = camera.id,
            path = %path.display(),
            width = width,
            height = height,
            "Clip exported from device"
        );

        Ok(RecordedClip { path, width, height })
    }
}
