//! FrameBuffer - Per-Camera Motion Frame Aggregation
//!
//! ## Responsibilities
//!
//! - Buffer still frames between a motion start and a motion end signal
//! - At most one live group per camera; a drain ends the group's lifetime
//! - Merge drained frames into one episode (sorted by event time)
//!
//! All operations take one exclusive lock over the camera index. Critical
//! sections never do I/O or encoding.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One buffered still
#[derive(Debug, Clone)]
pub struct MotionFrame {
    pub camera_id: i64,
    pub event_time: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Opaque encoded image bytes as pushed by the device
    pub image: Vec<u8>,
    remote_event_id: Option<String>,
}

impl MotionFrame {
    pub fn new(camera_id: i64, event_time: DateTime<Utc>, image: Vec<u8>) -> Self {
        Self {
            camera_id,
            event_time,
            received_at: Utc::now(),
            image,
            remote_event_id: None,
        }
    }

    pub fn remote_event_id(&self) -> Option<&str> {
        self.remote_event_id.as_deref()
    }

    /// Fill the remote id slot; only the first delivery sticks
    pub fn set_remote_event_id(&mut self, remote_id: impl Into<String>) {
        if self.remote_event_id.is_none() {
            self.remote_event_id = Some(remote_id.into());
        }
    }
}

/// Live group for one camera
#[derive(Debug)]
struct MotionGroup {
    opened_at: DateTime<Utc>,
    frames: Vec<MotionFrame>,
}

/// FrameBuffer instance
#[derive(Default)]
pub struct FrameBuffer {
    groups: Mutex<HashMap<i64, MotionGroup>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no live group exists for the camera (next push is a start)
    pub async fn is_group_empty(&self, camera_id: i64) -> bool {
        let groups = self.groups.lock().await;
        groups
            .get(&camera_id)
            .map(|g| g.frames.is_empty())
            .unwrap_or(true)
    }

    /// Append a frame, opening the group if absent. Returns the group length.
    pub async fn push(&self, frame: MotionFrame) -> usize {
        match self.push_or_open(frame, || Ok::<(), Infallible>(())).await {
            Ok(len) => len,
            Err(never) => match never {},
        }
    }

    /// Append a frame; when it would open a new group, `open` decides first.
    ///
    /// `open` runs under the index lock, so two frames racing on an empty
    /// group see exactly one start. A rejected start buffers nothing.
    pub async fn push_or_open<E>(
        &self,
        frame: MotionFrame,
        open: impl FnOnce() -> Result<(), E>,
    ) -> Result<usize, E> {
        let camera_id = frame.camera_id;
        let mut groups = self.groups.lock().await;
        let len = match groups.get_mut(&camera_id) {
            Some(group) if !group.frames.is_empty() => {
                group.frames.push(frame);
                group.frames.len()
            }
            _ => {
                open()?;
                groups.insert(
                    camera_id,
                    MotionGroup {
                        opened_at: Utc::now(),
                        frames: vec![frame],
                    },
                );
                1
            }
        };
        drop(groups);

        tracing::trace!(camera_id = camera_id, frames = len, "Motion frame buffered");
        Ok(len)
    }

    /// Remove and return every buffered frame for the camera
    ///
    /// Frames come back in push order; empty if no group existed.
    pub async fn drain(&self, camera_id: i64) -> Vec<MotionFrame> {
        let group = self.groups.lock().await.remove(&camera_id);
        group.map(|g| g.frames).unwrap_or_default()
    }

    /// Drain every group opened more than `max_age` ago (lost end signals)
    pub async fn drain_stale(&self, max_age: Duration) -> Vec<(i64, Vec<MotionFrame>)> {
        let cutoff = Utc::now() - max_age;
        let mut groups = self.groups.lock().await;

        let stale: Vec<i64> = groups
            .iter()
            .filter(|(_, g)| g.opened_at < cutoff)
            .map(|(id, _)| *id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| groups.remove(&id).map(|g| (id, g.frames)))
            .collect()
    }

    /// Number of cameras with a live group
    pub async fn live_groups(&self) -> usize {
        self.groups.lock().await.len()
    }
}

// ============================================================
// Merged Episode
// ============================================================

/// Closed motion group, ready for synthesis and a single delivery
///
/// Only built by [`MergedEpisode::merge`], so it always holds a frame.
#[derive(Debug, Clone)]
pub struct MergedEpisode {
    /// Sorted by event time
    frames: Vec<MotionFrame>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    video_path: Option<PathBuf>,
}

impl MergedEpisode {
    /// Sort drained frames by event time and derive the episode window.
    /// `None` for an empty drain.
    pub fn merge(mut frames: Vec<MotionFrame>) -> Option<Self> {
        // push order is arrival order, not event order
        frames.sort_by(|a, b| {
            a.event_time
                .cmp(&b.event_time)
                .then(a.received_at.cmp(&b.received_at))
        });

        let start = frames.first()?.event_time;
        let end = frames.last()?.event_time;

        Some(Self {
            frames,
            start,
            end,
            video_path: None,
        })
    }

    pub fn frames(&self) -> &[MotionFrame] {
        &self.frames
    }

    /// Earliest frame
    pub fn representative(&self) -> &MotionFrame {
        &self.frames[0]
    }

    pub fn video_path(&self) -> Option<&Path> {
        self.video_path.as_deref()
    }

    pub fn with_video(mut self, path: PathBuf) -> Self {
        self.video_path = Some(path);
        self
    }

    /// Consume the episode, keeping the earliest frame with `remote_id`
    /// stamped into its slot
    pub fn into_representative(self, remote_id: Option<&str>) -> MotionFrame {
        let mut frames = self.frames;
        let mut representative = frames.swap_remove(0);
        if let Some(remote_id) = remote_id {
            representative.set_remote_event_id(remote_id);
        }
        representative
    }
}
