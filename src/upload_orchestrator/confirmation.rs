//! Background "video upload failed" confirmation loop

use crate::cloud_notifier::CloudNotifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Confirmation loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(300),
        }
    }
}

/// How a confirmation loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationResult {
    Confirmed { attempts: u32 },
    TimedOut,
    Cancelled,
}

/// Spawn the loop: notify every `interval` until acknowledged, the
/// deadline passes, or `cancel` fires. Never blocks the caller.
pub fn spawn_video_failure_confirmation(
    notifier: Arc<dyn CloudNotifier>,
    remote_id: String,
    policy: ConfirmationPolicy,
    cancel: CancellationToken,
) -> JoinHandle<ConfirmationResult> {
    tokio::spawn(async move {
        let confirm = async {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match notifier.notify_video_upload_failed(&remote_id).await {
                    Ok(()) => return attempts,
                    Err(e) => {
                        tracing::debug!(
                            remote_id = %remote_id,
                            attempt = attempts,
                            error = %e,
                            "Video failure notice not acknowledged"
                        );
                    }
                }
                tokio::time::sleep(policy.interval).await;
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => ConfirmationResult::Cancelled,
            outcome = tokio::time::timeout(policy.deadline, confirm) => match outcome {
                Ok(attempts) => ConfirmationResult::Confirmed { attempts },
                Err(_) => ConfirmationResult::TimedOut,
            },
        };

        match result {
            ConfirmationResult::Confirmed { attempts } => {
                tracing::info!(remote_id = %remote_id, attempts = attempts, "Video failure confirmed");
            }
            ConfirmationResult::TimedOut => {
                tracing::warn!(
                    remote_id = %remote_id,
                    deadline_secs = policy.deadline.as_secs(),
                    "Video failure confirmation gave up"
                );
            }
            ConfirmationResult::Cancelled => {
                tracing::debug!(remote_id = %remote_id, "Video failure confirmation cancelled");
            }
        }
        result
    })
}
