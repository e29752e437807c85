use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

/// A ticker whose publisher could not connect, due for another attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRetry {
    pub id: String,
    /// Generation of the pending slot; a retry for a superseded slot is dropped
    pub generation: u64,
    pub delay: Duration,
}

/// Hold retries until their delay elapses, then hand each to `on_due`.
///
/// Runs until `shutdown` fires or every sender is gone. Retries still queued
/// when the senders go are dropped.
pub async fn run_retry_queue<F>(
    mut requests: mpsc::UnboundedReceiver<StartRetry>,
    shutdown: CancellationToken,
    mut on_due: F,
) where
    F: FnMut(StartRetry) + Send,
{
    let mut queue: DelayQueue<StartRetry> = DelayQueue::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(retry) => {
                    tracing::debug!(id = %retry.id, delay = ?retry.delay, "Queued start retry");
                    let delay = retry.delay;
                    queue.insert(retry, delay);
                }
                None => break,
            },
            // an empty DelayQueue stays pending instead of ending
            Some(expired) = queue.next(), if !queue.is_empty() => {
                on_due(expired.into_inner());
            }
        }
    }

    if !queue.is_empty() {
        tracing::debug!(pending = queue.len(), "Retry queue stopped with pending starts");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn retry(id: &str, ms: u64) -> StartRetry {
        StartRetry {
            id: id.to_string(),
            generation: 1,
            delay: Duration::from_millis(ms),
        }
    }

    #[tokio::test]
    async fn test_retries_fire_in_delay_order() {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let fired = Arc::new(Mutex::new(Vec::new()));

        let sink = fired.clone();
        let task = tokio::spawn(run_retry_queue(rx, shutdown.clone(), move |r| {
            sink.lock().push(r.id)
        }));

        tx.send(retry("slow", 60)).unwrap();
        tx.send(retry("fast", 10)).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*fired.lock(), vec!["fast"]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*fired.lock(), vec!["fast", "slow"]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_senders_drop() {
        let (tx, rx) = mpsc::unbounded_channel::<StartRetry>();
        let task = tokio::spawn(run_retry_queue(rx, CancellationToken::new(), |_| {}));
        drop(tx);
        tokio::time::timeout(Duration::from_millis(200), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_senders_drop_with_retries_queued() {
        let (tx, rx) = mpsc::unbounded_channel::<StartRetry>();
        let task = tokio::spawn(run_retry_queue(rx, CancellationToken::new(), |_| {}));
        tx.send(retry("never", 60_000)).unwrap();
        drop(tx);
        tokio::time::timeout(Duration::from_millis(200), task)
            .await
            .unwrap()
            .unwrap();
    }
}
