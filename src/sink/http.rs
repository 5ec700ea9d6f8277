use anyhow::{Context, Result};

use super::{Classification, Delivery, SinkClient};

/// HTTP status the sink uses to signal transient back-pressure.
const BACKPRESSURE_STATUS: u16 = 406;

/// HTTP sink adapter posting classifications to the sink endpoint.
pub struct HttpSink {
    http: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{base_url}/sink/a"),
        }
    }
}

impl SinkClient for HttpSink {
    async fn deliver(&self, classification: &Classification) -> Result<Delivery> {
        let response = self
            .http
            .post(&self.url)
            .json(classification)
            .send()
            .await
            .with_context(|| format!("posting classification to {}", self.url))?;

        let status = response.status();
        // Drain the body for connection reuse.
        let _ = response.bytes().await;

        if status.is_success() {
            Ok(Delivery::Accepted)
        } else if status.as_u16() == BACKPRESSURE_STATUS {
            Ok(Delivery::Backpressure)
        } else {
            Ok(Delivery::Rejected(status.as_u16()))
        }
    }
}
