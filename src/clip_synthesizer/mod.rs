//! ClipSynthesizer - Motion Episode Video Synthesis
//!
//! ## Responsibilities
//!
//! - Turn an ordered still-frame sequence into one playable video
//! - Skip frames that do not decode; refuse to encode zero images
//! - Remove every per-frame temp image and the concat script on all paths
//!
//! The output video belongs to the caller, who deletes it once consumed.

use crate::frame_buffer::MotionFrame;
use crate::media::{ImageInfo, MediaError, RecordedClip, VideoEncoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Synthesis errors
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// Empty sequence, or no frame decoded
    #[error("no decodable images in episode")]
    NoImages,

    #[error("encoding failed: {stderr}")]
    Encoding { stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Synthesizer configuration
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Scratch directory for temp images, scripts and output clips
    pub work_dir: PathBuf,
    /// Whole-episode playback length in seconds, spread over the frames
    pub fixed_episode_duration: f64,
    /// Floor for a single frame's display time in seconds
    pub min_frame_duration: f64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("motion-gateway"),
            fixed_episode_duration: 2.0,
            min_frame_duration: 0.3,
        }
    }
}

impl SynthesizerConfig {
    /// Per-frame display duration for `frame_count` images
    pub fn frame_duration(&self, frame_count: usize) -> f64 {
        if frame_count == 0 {
            return self.min_frame_duration;
        }
        (self.fixed_episode_duration / frame_count as f64).max(self.min_frame_duration)
    }
}

/// Files removed when the synthesis call returns, whatever the outcome
struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn track(&mut self, path: PathBuf) -> &Path {
        self.paths.push(path);
        &self.paths[self.paths.len() - 1]
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
                }
            }
        }
    }
}

/// Quote a path for a concat-demuxer `file` directive
fn concat_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// ClipSynthesizer instance
pub struct ClipSynthesizer {
    encoder: Arc<dyn VideoEncoder>,
    config: SynthesizerConfig,
}

impl ClipSynthesizer {
    pub async fn new(encoder: Arc<dyn VideoEncoder>, config: SynthesizerConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.work_dir).await?;
        Ok(Self { encoder, config })
    }

    /// Encode `frames` (already in display order) into one video file
    ///
    /// The clip takes the first decoded frame's size, truncated to even
    /// dimensions like the encoder's scale filter.
    pub async fn synthesize(&self, frames: &[MotionFrame]) -> Result<RecordedClip, SynthesisError> {
        let Some(first) = frames.first() else {
            return Err(SynthesisError::NoImages);
        };

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let output = self.config.work_dir.join(format!(
            "motion_{}_{}.mp4",
            first.camera_id,
            first.event_time.timestamp()
        ));
        let mut scratch = ScratchFiles::new();

        let mut images = Vec::with_capacity(frames.len());
        let mut size = None;
        for (idx, frame) in frames.iter().enumerate() {
            let info = match ImageInfo::probe(&frame.image) {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(
                        camera_id = frame.camera_id,
                        event_time = %frame.event_time,
                        index = idx,
                        error = %e,
                        "Skipping undecodable motion frame"
                    );
                    continue;
                }
            };

            let path = self
                .config
                .work_dir
                .join(format!("{}_{:04}.{}", run_id, idx, info.format));
            let path = scratch.track(path).to_path_buf();
            fs::write(&path, &frame.image).await?;
            images.push(path);
            size.get_or_insert((info.width & !1, info.height & !1));
        }

        let (Some(last), Some((width, height))) = (images.last(), size) else {
            return Err(SynthesisError::NoImages);
        };

        let duration = self.config.frame_duration(images.len());
        let mut script = String::new();
        for image in &images {
            script.push_str(&format!("file {}\nduration {:.3}\n", concat_quote(image), duration));
        }
        // demuxer needs the last file repeated to flush it
        script.push_str(&format!("file {}\n", concat_quote(last)));

        let script_path = scratch
            .track(self.config.work_dir.join(format!("{}_list.txt", run_id)))
            .to_path_buf();
        fs::write(&script_path, script).await?;

        if let Err(e) = self.encoder.run(&script_path, &output).await {
            let _ = fs::remove_file(&output).await;
            let stderr = match e {
                MediaError::Failed { stderr, .. } => stderr,
                other => other.to_string(),
            };
            tracing::error!(
                camera_id = first.camera_id,
                frames = images.len(),
                stderr = %stderr,
                "Clip encoding failed"
            );
            return Err(SynthesisError::Encoding { stderr });
        }

        tracing::info!(
            camera_id = first.camera_id,
            frames = images.len(),
            skipped = frames.len() - images.len(),
            frame_duration = duration,
            width = width,
            height = height,
            output = %output.display(),
            "Motion clip synthesized"
        );

        Ok(RecordedClip {
            path: output,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Encoder double: checks the script's files exist, then writes a dummy clip
    #[derive(Default)]
    struct RecordingEncoder {
        calls: AtomicUsize,
        scripts: Mutex<Vec<String>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl VideoEncoder for RecordingEncoder {
        async fn run(&self, script_path: &Path, output_path: &Path) -> Result<(), MediaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = std::fs::read_to_string(script_path)?;
            for line in script.lines().filter(|l| l.starts_with("file ")) {
                let path = line.trim_start_matches("file ").trim_matches('\'');
                assert!(Path::new(path).exists(), "script references missing {}", path);
            }
            self.scripts.lock().unwrap().push(script);

            if let Some(stderr) = &self.fail_with {
                std::fs::write(output_path, b"partial")?;
                return Err(MediaError::Failed {
                    program: "ffmpeg".to_string(),
                    code: Some(1),
                    stderr: stderr.clone(),
                });
            }
            std::fs::write(output_path, b"mp4")?;
            Ok(())
        }
    }

    fn png_frame(secs: i64) -> MotionFrame {
        let img = image::RgbImage::from_pixel(7, 5, image::Rgb([200, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        MotionFrame::new(5, Utc.timestamp_opt(secs, 0).unwrap(), out.into_inner())
    }

    fn garbage_frame(secs: i64) -> MotionFrame {
        MotionFrame::new(5, Utc.timestamp_opt(secs, 0).unwrap(), b"not-an-image".to_vec())
    }

    async fn synthesizer(
        dir: &tempfile::TempDir,
        encoder: Arc<RecordingEncoder>,
    ) -> ClipSynthesizer {
        let config = SynthesizerConfig {
            work_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        ClipSynthesizer::new(encoder, config).await.unwrap()
    }

    fn dir_entries(dir: &tempfile::TempDir) -> Vec<PathBuf> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[test]
    fn test_frame_duration_floor() {
        let config = SynthesizerConfig::default();
        assert!((config.frame_duration(100) - 0.3).abs() < 1e-9);
        assert!((config.frame_duration(4) - 0.5).abs() < 1e-9);
        assert!((config.frame_duration(1) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_concat_quote_escapes() {
        assert_eq!(concat_quote(Path::new("/tmp/a'b.png")), r"'/tmp/a'\''b.png'");
    }

    #[tokio::test]
    async fn test_empty_sequence_never_invokes_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::default());
        let synth = synthesizer(&dir, encoder.clone()).await;

        let result = synth.synthesize(&[]).await;
        assert!(matches!(result, Err(SynthesisError::NoImages)));
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_frames_undecodable_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::default());
        let synth = synthesizer(&dir, encoder.clone()).await;

        let result = synth.synthesize(&[garbage_frame(1), garbage_frame(2)]).await;
        assert!(matches!(result, Err(SynthesisError::NoImages)));
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
        assert!(dir_entries(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_success_keeps_only_output() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder::default());
        let synth = synthesizer(&dir, encoder.clone()).await;

        let frames = [garbage_frame(9), png_frame(10), png_frame(12), png_frame(13)];
        let clip = synth.synthesize(&frames).await.unwrap();

        assert_eq!(dir_entries(&dir), vec![clip.path.clone()]);
        assert!(clip.path.ends_with("motion_5_9.mp4"));
        // size of the first decodable frame, not the garbage one
        assert_eq!((clip.width, clip.height), (6, 4));

        let scripts = encoder.scripts.lock().unwrap();
        let lines: Vec<&str> = scripts[0].lines().collect();
        // 3 decoded images: (file, duration) x3 + repeated last file
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[1], "duration 0.667");
        assert_eq!(lines[6], lines[4]);
    }

    #[tokio::test]
    async fn test_encoder_failure_reports_stderr_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(RecordingEncoder {
            fail_with: Some("Invalid data found".to_string()),
            ..Default::default()
        });
        let synth = synthesizer(&dir, encoder.clone()).await;

        let result = synth.synthesize(&[png_frame(1), png_frame(2)]).await;
        match result {
            Err(SynthesisError::Encoding { stderr }) => assert_eq!(stderr, "Invalid data found"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(dir_entries(&dir).is_empty());
    }
}
