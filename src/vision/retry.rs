use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub(crate) const MAX_ATTEMPTS: usize = 5;
pub(crate) const BASE_DELAY: Duration = Duration::from_secs(2);
pub(crate) const MAX_DELAY: Duration = Duration::from_secs(60);

/// Vision reports quota pressure as 429 with `RESOURCE_EXHAUSTED`, and
/// transient backend trouble as 503 `UNAVAILABLE`.
pub(crate) fn is_retryable(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return true;
    }
    if status.is_client_error() {
        return false;
    }
    let lower = body.to_lowercase();
    lower.contains("resource_exhausted")
        || lower.contains("rate limit")
        || lower.contains("unavailable")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Exponential backoff state for one request.
#[derive(Debug)]
pub(crate) struct Backoff {
    attempt: usize,
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            attempt: 0,
            delay: BASE_DELAY,
        }
    }

    /// Counts an attempt; false once the budget is spent.
    pub(crate) fn next_attempt(&mut self) -> bool {
        if self.attempt >= MAX_ATTEMPTS {
            return false;
        }
        self.attempt += 1;
        true
    }

    pub(crate) fn attempt(&self) -> usize {
        self.attempt
    }

    pub(crate) fn can_retry(&self) -> bool {
        self.attempt < MAX_ATTEMPTS
    }

    /// Sleeps for the current delay (or the server's `Retry-After`, if longer)
    /// and doubles the delay for the next round.
    pub(crate) async fn wait(&mut self, label: &str, retry_after: Option<Duration>) {
        let wait = match retry_after {
            Some(requested) if requested > self.delay => requested,
            _ => self.delay,
        };
        warn!(
            "{} rate limited; retrying in {:.1}s (attempt {}/{})",
            label,
            wait.as_secs_f32(),
            self.attempt,
            MAX_ATTEMPTS
        );
        sleep(wait).await;
        self.delay = next_delay(self.delay);
    }
}

pub(crate) fn next_delay(current: Duration) -> Duration {
    current.saturating_mul(2).clamp(BASE_DELAY, MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn delay_doubles_up_to_the_cap() {
        assert_eq!(next_delay(BASE_DELAY), Duration::from_secs(4));
        assert_eq!(next_delay(Duration::from_secs(40)), MAX_DELAY);
        assert_eq!(next_delay(Duration::ZERO), BASE_DELAY);
    }

    #[test]
    fn classifies_vision_errors() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE, ""));
        assert!(is_retryable(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#
        ));
        assert!(!is_retryable(
            StatusCode::FORBIDDEN,
            r#"{"error":{"status":"PERMISSION_DENIED"}}"#
        ));
    }

    #[test]
    fn reads_numeric_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static(" 7 "));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn attempts_are_bounded() {
        let mut backoff = Backoff::new();
        let mut count = 0;
        while backoff.next_attempt() {
            count += 1;
        }
        assert_eq!(count, MAX_ATTEMPTS);
        assert!(!backoff.can_retry());
    }
}
