//! Cancellable waits shared by the long-lived workers.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless `token` is cancelled first.
///
/// Returns `true` when the wait was cut short by cancellation.
pub async fn sleep_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => token.is_cancelled(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_full_sleep() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(!sleep_or_cancelled(&token, Duration::from_secs(60)).await);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(sleep_or_cancelled(&token, Duration::from_secs(3600)).await);
        assert!(start.elapsed() < Duration::from_secs(3600));
    }
}
