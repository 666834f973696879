//! InfluxDB v2 record sink over HTTP

use super::{line_protocol, Record, RecordSink, SinkError};
use crate::config::InfluxConfig;
use crate::{PRODUCER_NAME, RELAY_VERSION};
use std::time::Duration;
use tracing::trace;

/// Writes records to the InfluxDB `/api/v2/write` endpoint with millisecond precision
pub struct InfluxRecordSink {
    agent: ureq::Agent,
    base_url: String,
    org: String,
    bucket: String,
    authorization: String,
}

impl InfluxRecordSink {
    /// Create a sink with one reusable HTTP agent
    pub fn new(config: &InfluxConfig) -> Result<Self, SinkError> {
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(SinkError::Transport(format!(
                "InfluxDB url must start with http:// or https://: {}",
                config.url
            )));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&format!("{}/{}", PRODUCER_NAME, RELAY_VERSION))
            .build();

        Ok(Self {
            agent,
            base_url: config.url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            authorization: format!("Token {}", config.token),
        })
    }

    pub fn write_url(&self) -> String {
        format!("{}/api/v2/write", self.base_url)
    }

    /// Query the server `/health` endpoint
    pub fn health(&self) -> Result<(), SinkError> {
        let url = format!("{}/health", self.base_url);
        self.agent
            .get(&url)
            .call()
            .map(|_| ())
            .map_err(map_ureq_error)
    }
}

fn map_ureq_error(e: ureq::Error) -> SinkError {
    match e {
        ureq::Error::Status(status, resp) => SinkError::Rejected {
            status,
            body: resp.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(t) => SinkError::Transport(t.to_string()),
    }
}

impl RecordSink for InfluxRecordSink {
    fn write(&mut self, record: &Record) -> Result<(), SinkError> {
        let line = line_protocol::encode(record)?;
        trace!(%line, "writing record");

        self.agent
            .post(&self.write_url())
            .query("org", &self.org)
            .query("bucket", &self.bucket)
            .query("precision", "ms")
            .set("Authorization", &self.authorization)
            .set("Content-Type", "text/plain; charset=utf-8")
            .send_string(&line)
            .map(|_| ())
            .map_err(map_ureq_error)
    }
}
