use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use pigment_contracts::submission::{submission_form, SubmissionResponse};
use reqwest::blocking::Client as HttpClient;

/// Hands the prompt to the generation forwarder; accept/reject only.
pub trait Submitter: Send + Sync {
    /// `Ok` carries the forwarder's optional acknowledgement text.
    fn submit(&self, prompt: &str) -> Result<Option<String>>;
}

pub struct HttpSubmitter {
    client: HttpClient,
    url: String,
}

impl HttpSubmitter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed to build submission http client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Submitter for HttpSubmitter {
    fn submit(&self, prompt: &str) -> Result<Option<String>> {
        let response = self
            .client
            .post(&self.url)
            .form(&submission_form(prompt))
            .send()
            .with_context(|| format!("submission to {} failed", self.url))?;
        let status = response.status();
        let body = response
            .text()
            .context("failed to read submission response")?;
        let parsed: SubmissionResponse = serde_json::from_str(&body)
            .map_err(|_| anyhow!("Invalid response from generation forwarder (HTTP {status})"))?;
        parsed.into_result().map_err(|reason| anyhow!(reason))
    }
}
