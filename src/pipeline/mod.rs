use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::correlate;
use crate::flush;
use crate::pending::{PendingTable, Side};
use crate::sink::{self, Classification, SinkClient};
use crate::source::{self, HttpSource, SourceClient};

/// Capacity of each side's identity channel; bounded so a stalled
/// correlator pushes back on its reader.
const IDENTITY_QUEUE_DEPTH: usize = 1024;

/// What a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    pub joined: u64,
    pub orphaned: u64,
    pub dropped: u64,
    /// False when the terminal drain hit its deadline with submissions
    /// still outstanding.
    pub drained: bool,
}

/// Builds the production HTTP adapters and runs the pipeline to completion.
pub async fn run(cfg: Config, shutdown: CancellationToken) -> Result<RunReport> {
    let http = reqwest::Client::builder()
        .timeout(cfg.request_timeout)
        .build()
        .context("building HTTP client")?;

    let base = cfg.base_url();
    let source_a = HttpSource::new(http.clone(), &base, "/source/a");
    let source_b = HttpSource::new(http.clone(), &base, "/source/b");
    let sink = Arc::new(crate::sink::http::HttpSink::new(http, &base));

    run_with(cfg, source_a, source_b, sink, shutdown).await
}

/// Runs the pipeline over explicit source and sink endpoints.
///
/// Lifecycle: readers and correlators run until both upstreams signal end
/// of stream (or `shutdown` fires and the readers are cancelled); the
/// flusher is then stopped at a tick boundary and every identity still
/// pending is drained as an orphan, bounded by the shutdown deadline.
pub async fn run_with<SA, SB, K>(
    cfg: Config,
    source_a: SA,
    source_b: SB,
    sink: Arc<K>,
    shutdown: CancellationToken,
) -> Result<RunReport>
where
    SA: SourceClient,
    SB: SourceClient,
    K: SinkClient,
{
    let table = Arc::new(PendingTable::new());
    let (submitter, stats, sink_task) = sink::spawn(sink, &cfg);
    let sink_abort = sink_task.abort_handle();

    // Readers stop when the external shutdown token fires; the correlators
    // then run dry on their closed channels.
    let readers_cancel = shutdown.child_token();

    let (tx_a, rx_a) = mpsc::channel(IDENTITY_QUEUE_DEPTH);
    let (tx_b, rx_b) = mpsc::channel(IDENTITY_QUEUE_DEPTH);

    let reader_a = tokio::spawn(source::run_reader(
        Side::A,
        source_a,
        tx_a,
        cfg.poll_interval,
        readers_cancel.clone(),
    ));
    let reader_b = tokio::spawn(source::run_reader(
        Side::B,
        source_b,
        tx_b,
        cfg.poll_interval,
        readers_cancel,
    ));

    let correlator_a = tokio::spawn(correlate::run_correlator(
        Side::A,
        rx_a,
        Arc::clone(&table),
        submitter.clone(),
    ));
    let correlator_b = tokio::spawn(correlate::run_correlator(
        Side::B,
        rx_b,
        Arc::clone(&table),
        submitter.clone(),
    ));

    let flusher_cancel = CancellationToken::new();
    let flusher = tokio::spawn(flush::run_flusher(
        Arc::clone(&table),
        submitter.clone(),
        cfg.clone(),
        flusher_cancel.clone(),
    ));

    info!(base_url = %cfg.base_url(), "correlation pipeline started");

    let (ra, rb, ca, cb) = tokio::join!(reader_a, reader_b, correlator_a, correlator_b);
    for joined in [ra, rb, ca, cb] {
        if let Err(e) = joined {
            warn!(error = %e, "pipeline task join failed");
        }
    }

    // Streams are done; stop periodic expiry before the terminal drain so
    // the two never race over the same entries.
    flusher_cancel.cancel();
    if let Err(e) = flusher.await {
        warn!(error = %e, "flusher join failed");
    }

    let remaining = table.drain();
    if !remaining.is_empty() {
        info!(count = remaining.len(), "draining pending identities as orphans");
    }

    let drain = async {
        for id in remaining {
            submitter.submit(Classification::orphaned(id)).await;
        }
        // Closing the last producer lets the submitter finish in-flight
        // work and exit.
        drop(submitter);
        if let Err(e) = sink_task.await {
            debug!(error = %e, "sink task join failed");
        }
    };

    let drained = match tokio::time::timeout(cfg.shutdown_deadline, drain).await {
        Ok(()) => true,
        Err(_) => {
            sink_abort.abort();
            warn!(
                deadline = ?cfg.shutdown_deadline,
                "terminal drain deadline expired, abandoning in-flight submissions",
            );
            false
        }
    };

    debug_assert!(table.is_empty());

    let report = RunReport {
        joined: stats.joined(),
        orphaned: stats.orphaned(),
        dropped: stats.dropped(),
        drained,
    };

    info!(
        joined = report.joined,
        orphaned = report.orphaned,
        dropped = report.dropped,
        drained = report.drained,
        "streaming finished",
    );

    Ok(report)
}
