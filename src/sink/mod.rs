pub mod http;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::config::Config;

/// Terminal outcome for an observed identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Joined,
    Orphaned,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Joined => f.write_str("joined"),
            Kind::Orphaned => f.write_str("orphaned"),
        }
    }
}

/// The unit handed to the sink: one identity and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub id: String,
    pub kind: Kind,
}

impl Classification {
    pub fn joined(id: String) -> Self {
        Self {
            id,
            kind: Kind::Joined,
        }
    }

    pub fn orphaned(id: String) -> Self {
        Self {
            id,
            kind: Kind::Orphaned,
        }
    }
}

/// How the sink answered one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 2xx; the classification is recorded.
    Accepted,
    /// The sink asked the caller to back off and retry (the 406-style
    /// response).
    Backpressure,
    /// Any other non-2xx status.
    Rejected(u16),
}

/// Sink endpoint as seen by the submitter.
pub trait SinkClient: Send + Sync + 'static {
    /// Perform one delivery attempt. `Err` means the request itself failed
    /// at the transport level.
    fn deliver(
        &self,
        classification: &Classification,
    ) -> impl Future<Output = Result<Delivery>> + Send;
}

/// Counters published by the submitter workers.
#[derive(Debug, Default)]
pub struct SubmitStats {
    joined: AtomicU64,
    orphaned: AtomicU64,
    dropped: AtomicU64,
}

impl SubmitStats {
    fn record_delivered(&self, kind: Kind) {
        match kind {
            Kind::Joined => self.joined.fetch_add(1, Ordering::Relaxed),
            Kind::Orphaned => self.orphaned.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }

    pub fn orphaned(&self) -> u64 {
        self.orphaned.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer handle for enqueuing classifications.
///
/// The queue is bounded, so a slow sink exerts backpressure on whoever is
/// emitting. Once every clone is dropped the dispatch task finishes its
/// in-flight work and exits.
#[derive(Clone)]
pub struct Submitter {
    tx: mpsc::Sender<Classification>,
}

impl Submitter {
    /// Enqueue one classification for delivery.
    pub async fn submit(&self, classification: Classification) {
        if self.tx.send(classification).await.is_err() {
            warn!("sink submitter stopped, classification discarded");
        }
    }
}

/// Spawns the submitter dispatch task.
///
/// Returns the producer handle, the delivery counters, and the join handle
/// the coordinator awaits during the terminal drain. Each queued
/// classification is delivered on its own worker, capped by a semaphore of
/// `sink_concurrency` permits.
pub fn spawn<C: SinkClient>(
    client: Arc<C>,
    cfg: &Config,
) -> (Submitter, Arc<SubmitStats>, JoinHandle<()>) {
    let queue_depth = cfg.sink_concurrency.max(1) * 2;
    let (tx, mut rx) = mpsc::channel::<Classification>(queue_depth);

    let stats = Arc::new(SubmitStats::default());
    let semaphore = Arc::new(Semaphore::new(cfg.sink_concurrency.max(1)));
    let retry_delay = cfg.post_retry_delay;
    let max_retries = cfg.max_retries;

    let worker_stats = Arc::clone(&stats);
    let handle = tokio::spawn(async move {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(classification) => {
                        // Take the permit before spawning: when every worker
                        // slot is busy the dispatch loop blocks here, the
                        // queue fills, and producers feel the backpressure.
                        let permit = match Arc::clone(&semaphore).acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let client = Arc::clone(&client);
                        let stats = Arc::clone(&worker_stats);
                        in_flight.spawn(async move {
                            let _permit = permit;
                            deliver_with_retry(
                                &*client,
                                &classification,
                                retry_delay,
                                max_retries,
                                &stats,
                            )
                            .await;
                        });
                    }
                    None => break,
                },
                joined = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Some(Err(e)) = joined {
                        debug!(error = %e, "submit worker join failed");
                    }
                }
            }
        }

        // Producers are gone; finish whatever is still in flight.
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                debug!(error = %e, "submit worker join failed");
            }
        }
    });

    (Submitter { tx }, stats, handle)
}

/// Delivers one classification with exponential backoff, `max_retries`
/// attempts in total. Exhaustion drops the classification: losing one
/// report is preferred over stalling the pipeline on a stuck identity.
async fn deliver_with_retry<C: SinkClient>(
    client: &C,
    classification: &Classification,
    initial_delay: Duration,
    max_retries: u32,
    stats: &SubmitStats,
) {
    let mut delay = initial_delay;
    for attempt in 1..=max_retries {
        match client.deliver(classification).await {
            Ok(Delivery::Accepted) => {
                stats.record_delivered(classification.kind);
                debug!(
                    id = %classification.id,
                    kind = %classification.kind,
                    attempt,
                    "classification delivered",
                );
                return;
            }
            Ok(Delivery::Backpressure) => {
                debug!(id = %classification.id, attempt, "sink asked to back off");
            }
            Ok(Delivery::Rejected(status)) => {
                debug!(id = %classification.id, attempt, status, "sink rejected classification");
            }
            Err(e) => {
                debug!(id = %classification.id, attempt, error = %e, "sink request failed");
            }
        }

        if attempt < max_retries {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }

    stats.record_dropped();
    warn!(
        id = %classification.id,
        kind = %classification.kind,
        attempts = max_retries,
        "dropping classification, retries exhausted",
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;

    /// Fake sink scripted with one response per attempt; repeats the last
    /// response once the script runs out.
    struct ScriptedSink {
        script: Mutex<Vec<Result<Delivery>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedSink {
        fn new(script: Vec<Result<Delivery>>) -> Self {
            Self {
                script: Mutex::new(script),
                attempts: AtomicUsize::new(0),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::Relaxed)
        }
    }

    impl SinkClient for ScriptedSink {
        async fn deliver(&self, _classification: &Classification) -> Result<Delivery> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let mut script = self.script.lock().expect("script lock");
            if script.len() > 1 {
                script.remove(0)
            } else {
                match script.first() {
                    Some(Ok(delivery)) => Ok(*delivery),
                    Some(Err(e)) => Err(anyhow::anyhow!("{e}")),
                    None => Ok(Delivery::Accepted),
                }
            }
        }
    }

    fn test_config() -> Config {
        Config {
            post_retry_delay: Duration::from_millis(200),
            max_retries: 3,
            sink_concurrency: 4,
            ..Config::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_then_success_is_one_logical_delivery() {
        let sink = Arc::new(ScriptedSink::new(vec![
            Ok(Delivery::Backpressure),
            Ok(Delivery::Backpressure),
            Ok(Delivery::Accepted),
        ]));
        let stats = SubmitStats::default();

        deliver_with_retry(
            &*sink,
            &Classification::joined("x".to_string()),
            Duration::from_millis(200),
            3,
            &stats,
        )
        .await;

        assert_eq!(sink.attempts(), 3);
        assert_eq!(stats.joined(), 1);
        assert_eq!(stats.dropped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_capped_and_exhaustion_drops() {
        let sink = Arc::new(ScriptedSink::new(vec![Ok(Delivery::Backpressure)]));
        let stats = SubmitStats::default();

        deliver_with_retry(
            &*sink,
            &Classification::orphaned("x".to_string()),
            Duration::from_millis(200),
            3,
            &stats,
        )
        .await;

        assert_eq!(sink.attempts(), 3);
        assert_eq!(stats.orphaned(), 0);
        assert_eq!(stats.dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_follow_the_same_policy() {
        let sink = Arc::new(ScriptedSink::new(vec![
            Err(anyhow::anyhow!("connection reset")),
            Ok(Delivery::Accepted),
        ]));
        let stats = SubmitStats::default();

        deliver_with_retry(
            &*sink,
            &Classification::joined("x".to_string()),
            Duration::from_millis(200),
            3,
            &stats,
        )
        .await;

        assert_eq!(sink.attempts(), 2);
        assert_eq!(stats.joined(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_submitter_drains_queue_on_close() {
        let sink = Arc::new(ScriptedSink::new(vec![Ok(Delivery::Accepted)]));
        let (submitter, stats, handle) = spawn(Arc::clone(&sink), &test_config());

        for i in 0..10 {
            submitter
                .submit(Classification::joined(format!("id-{i}")))
                .await;
        }
        drop(submitter);
        handle.await.expect("submitter task");

        assert_eq!(stats.joined(), 10);
        assert_eq!(sink.attempts(), 10);
    }

    #[test]
    fn test_classification_wire_shape() {
        let body = serde_json::to_string(&Classification::joined("abc".to_string()))
            .expect("serialize classification");
        assert_eq!(body, r#"{"id":"abc","kind":"joined"}"#);

        let body = serde_json::to_string(&Classification::orphaned("abc".to_string()))
            .expect("serialize classification");
        assert_eq!(body, r#"{"id":"abc","kind":"orphaned"}"#);
    }
}
