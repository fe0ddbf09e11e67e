//! Single-slot handoff of submission acknowledgements.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// How long a submission waits for the pool's verdict.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// One pending acknowledgement, handed from the receive path to the
/// submitting task.
///
/// Responses carry no correlation with the submission they answer, so at
/// most one submission may be in flight: [`clear`](Self::clear), send, then
/// [`wait`](Self::wait). A second concurrent submitter would consume the
/// first one's verdict.
#[derive(Debug, Default)]
pub struct AckSlot {
    value: Mutex<Option<bool>>,
    notify: Notify,
}

impl AckSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any verdict left over from earlier traffic.
    pub fn clear(&self) {
        *self.value.lock() = None;
    }

    /// Deliver a verdict. The first verdict after a `clear` wins.
    pub fn offer(&self, accepted: bool) {
        {
            let mut value = self.value.lock();
            if value.is_some() {
                return;
            }
            *value = Some(accepted);
        }
        self.notify.notify_one();
    }

    /// Wait up to `timeout` for a verdict, consuming it.
    pub async fn wait(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(accepted) = self.value.lock().take() {
                return Some(accepted);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.value.lock().take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let slot = AckSlot::new();
        let start = Instant::now();
        assert_eq!(slot.wait(ACK_TIMEOUT).await, None);
        assert!(start.elapsed() >= ACK_TIMEOUT);
    }

    #[tokio::test]
    async fn test_offer_before_wait() {
        let slot = AckSlot::new();
        slot.offer(false);
        assert_eq!(slot.wait(ACK_TIMEOUT).await, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_wakes_waiter() {
        let slot = Arc::new(AckSlot::new());
        let waiter = tokio::spawn({
            let slot = slot.clone();
            async move { slot.wait(ACK_TIMEOUT).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        slot.offer(true);
        assert_eq!(waiter.await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_first_offer_wins() {
        let slot = AckSlot::new();
        slot.offer(true);
        slot.offer(false);
        assert_eq!(slot.wait(ACK_TIMEOUT).await, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards_stale_verdict() {
        let slot = AckSlot::new();
        slot.offer(true);
        slot.clear();
        assert_eq!(slot.wait(Duration::from_secs(1)).await, None);
    }
}
