//! Cloud backup dispatch with exponential backoff.
//!
//! Providers are injected by the host application; the core only owns the
//! retry policy: transient failures back off exponentially up to a bounded
//! attempt count, permanent failures stop immediately. Either way a terminal
//! failure is surfaced instead of retrying forever.

use std::path::Path;
use std::time::Duration;

use crate::errors::BackupError;

/// A cloud storage destination for finished recordings.
pub trait BackupProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Upload the final video and, when present, its thumbnail.
    fn upload(&self, video: &Path, thumbnail: Option<&Path>) -> Result<(), BackupError>;
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Runs the upload with retries. Delay doubles per attempt starting from
/// `base_delay`.
pub async fn dispatch(
    provider: &dyn BackupProvider,
    video: &Path,
    thumbnail: Option<&Path>,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<(), BackupError> {
    let mut delay = base_delay;
    let mut last_error = BackupError::Transient("no attempts made".to_string());

    for attempt in 1..=max_attempts.max(1) {
        match provider.upload(video, thumbnail) {
            Ok(()) => {
                tracing::info!(
                    target: "pipeline",
                    "backup to {} succeeded on attempt {}",
                    provider.name(),
                    attempt
                );
                return Ok(());
            }
            Err(BackupError::Permanent(reason)) => {
                tracing::error!(
                    target: "pipeline",
                    "backup to {} failed permanently: {}",
                    provider.name(),
                    reason
                );
                return Err(BackupError::Permanent(reason));
            }
            Err(BackupError::Transient(reason)) => {
                tracing::warn!(
                    target: "pipeline",
                    "backup to {} attempt {}/{} failed: {}",
                    provider.name(),
                    attempt,
                    max_attempts,
                    reason
                );
                last_error = BackupError::Transient(reason);
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
    Err(last_error)
}
