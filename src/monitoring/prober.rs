use std::time::Instant;

use async_trait::async_trait;

use super::types::ProbeResult;
use crate::config::SiteTarget;

/// A strategy for checking a single site once.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Perform one check and report it, success or failure.
    async fn probe(&self, site: &SiteTarget) -> ProbeResult;
}

/// HTTP GET prober.
///
/// Timeout behavior is whatever the supplied client enforces; no additional
/// deadline is applied per probe.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, site: &SiteTarget) -> ProbeResult {
        let result = ProbeResult::new(&site.url);

        let request = match self.client.get(&site.url).build() {
            Ok(request) => request,
            Err(error) => return result.failed(format!("building request: {error}")),
        };

        let started = Instant::now();
        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(error) => return result.failed(format!("performing request: {error}")),
        };

        let status_code = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => return result.failed(format!("reading response body: {error}")),
        };
        // The response body counts towards the measured latency.
        let duration = started.elapsed();

        let pattern_matched = site
            .pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&body));

        result.completed(duration, status_code, pattern_matched)
    }
}
