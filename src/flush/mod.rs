use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::pending::PendingTable;
use crate::sink::{Classification, Submitter};

/// Periodically expires pending entries past the orphan deadline and hands
/// them to the sink as orphans.
///
/// Each tick also enforces the pending-table soft cap: when a one-sided
/// flood pushes the table above `max_pending_size`, the oldest excess
/// entries are evicted as orphans rather than silently discarded.
/// Cancellation lands at tick boundaries.
pub async fn run_flusher(
    table: Arc<PendingTable>,
    submitter: Submitter,
    cfg: Config,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(cfg.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("orphan flusher stopped");
                return;
            }
            _ = ticker.tick() => {
                let now = Instant::now();

                let expired = table.expire(now, cfg.orphan_timeout);
                if !expired.is_empty() {
                    debug!(count = expired.len(), "expiring pending entries as orphans");
                }
                for id in expired {
                    submitter.submit(Classification::orphaned(id)).await;
                }

                let evicted = table.trim_oldest(cfg.max_pending_size);
                if !evicted.is_empty() {
                    warn!(
                        count = evicted.len(),
                        cap = cfg.max_pending_size,
                        "pending table over cap, evicting oldest entries as orphans",
                    );
                }
                for id in evicted {
                    submitter.submit(Classification::orphaned(id)).await;
                }
            }
        }
    }
}
