pub mod extract;

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pending::Side;

use self::extract::Extraction;

/// One upstream endpoint as seen by a reader: each call produces the next
/// raw payload.
pub trait SourceClient: Send + Sync + 'static {
    /// Fetch the next raw payload from the upstream.
    fn fetch(&self) -> impl Future<Output = Result<String>> + Send;
}

/// HTTP upstream client polling a fixed path.
pub struct HttpSource {
    http: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(http: reqwest::Client, base_url: &str, path: &str) -> Self {
        Self {
            http,
            url: format!("{base_url}{path}"),
        }
    }
}

impl SourceClient for HttpSource {
    async fn fetch(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("requesting {}", self.url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("reading body from {}", self.url))?;

        if !status.is_success() {
            bail!("unexpected status {status} from {}", self.url);
        }
        Ok(body)
    }
}

/// Polls one upstream and feeds extracted identities into `tx`.
///
/// Runs until the upstream's end sentinel, cancellation, or a closed
/// channel. Malformed payloads are dropped with a warning; transport errors
/// are swallowed and polling resumes after the regular pacing delay, so the
/// stream survives intermittent upstream failures.
pub async fn run_reader<C: SourceClient>(
    side: Side,
    client: C,
    tx: mpsc::Sender<String>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%side, "reader cancelled");
                return;
            }
            fetched = client.fetch() => fetched,
        };

        match fetched {
            Ok(body) => {
                let extraction = match side {
                    Side::A => extract::extract_a(&body),
                    Side::B => extract::extract_b(&body),
                };
                match extraction {
                    Extraction::Records(ids) => {
                        for id in ids {
                            if tx.send(id).await.is_err() {
                                debug!(%side, "identity channel closed, reader stopping");
                                return;
                            }
                        }
                    }
                    Extraction::Malformed => {
                        warn!(%side, "malformed payload dropped");
                    }
                    Extraction::EndOfStream => {
                        debug!(%side, "upstream signalled end of stream");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(%side, error = %e, "upstream poll failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%side, "reader cancelled");
                return;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
