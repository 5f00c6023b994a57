//! Deadline constants and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, ServerError};

/// Idle time after which a silent connection is dropped.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Deadline for a single packet write.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a dialog script waits for the player's answer.
pub const DIALOG_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifetime of a migration record.
pub const MIGRATION_TTL: Duration = Duration::from_secs(30);

/// Interval of the expired-migration sweep.
pub const MIGRATION_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Field tick period.
pub const FIELD_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between server pings on an established session.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period for sessions to wind down after a shutdown signal.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a future with a deadline, mapping expiry to [`ServerError::Timeout`].
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ServerError::Timeout)
}

/// Like [`with_timeout`] for futures that already return a [`Result`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(future, duration).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expiry_maps_to_timeout() {
        let result = with_timeout(
            tokio::time::sleep(Duration::from_secs(5)),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ServerError::Timeout)));
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let result: Result<()> = with_timeout_error(
            async { Err(ServerError::ConnectionClosed) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ServerError::ConnectionClosed)));
    }
}
