use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::pending::{Outcome, PendingTable, Side};
use crate::sink::{Classification, Submitter};

/// Consumes one side's identity stream and applies the match/store decision
/// to each observation.
///
/// The correlator holds no state of its own: the table's atomicity is what
/// makes it safe to run both side-specific correlators concurrently. Runs
/// until the identity channel closes.
pub async fn run_correlator(
    side: Side,
    mut ids: mpsc::Receiver<String>,
    table: Arc<PendingTable>,
    submitter: Submitter,
) {
    while let Some(id) = ids.recv().await {
        match table.decide(&id, side, Instant::now()) {
            Outcome::Stored => {}
            Outcome::Matched => {
                submitter.submit(Classification::joined(id)).await;
            }
            Outcome::IgnoredDuplicate => {
                debug!(%side, id, "same-side repeat ignored");
            }
        }
    }
    debug!(%side, "correlator finished");
}
