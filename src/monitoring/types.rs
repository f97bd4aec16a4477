use std::time::{Duration, SystemTime};

/// Outcome of one probe of one site.
///
/// Exactly one of these is produced per scheduled check, whether or not the
/// request succeeded. `duration` and `status_code` stay zero when the stage
/// that would have produced them never ran.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// URL that was probed.
    pub url: String,
    /// Wall-clock time at which the probe started.
    pub timestamp: SystemTime,
    /// Time from sending the request to consuming the full response body.
    pub duration: Duration,
    /// HTTP status code, zero if no response arrived.
    pub status_code: u16,
    /// Whether the configured pattern was found in the response body.
    pub pattern_matched: bool,
    /// Failure description from the first stage that failed, if any.
    pub error: Option<String>,
}

impl ProbeResult {
    /// Start a result for a probe beginning now.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timestamp: SystemTime::now(),
            duration: Duration::ZERO,
            status_code: 0,
            pattern_matched: false,
            error: None,
        }
    }

    /// Finish the result for a fully read response.
    pub fn completed(
        mut self,
        duration: Duration,
        status_code: u16,
        pattern_matched: bool,
    ) -> Self {
        self.duration = duration;
        self.status_code = status_code;
        self.pattern_matched = pattern_matched;
        self
    }

    /// Finish the result for a probe that failed before completion.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
