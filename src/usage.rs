//! Monthly OCR request accounting.
//!
//! The Vision free tier is counted per account and calendar month. A ledger
//! is either a shared web endpoint (GET returns every account, POST adds to
//! one) or a JSON file on disk.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};

use crate::error::Error;

pub const DEFAULT_MONTHLY_MAX: u64 = 900;

pub type UsageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait UsageTracker: Send + Sync {
    fn monthly_max(&self) -> u64;

    /// Requests issued this month. Fails with [`Error::QuotaExceeded`] once
    /// the count reaches the maximum.
    fn current_count(&self) -> UsageFuture<'_, u64>;

    /// Adds `count` requests to this month and returns the new total.
    fn record(&self, count: u64) -> UsageFuture<'_, u64>;
}

/// Fails before any request is sent when the batch would reach the maximum.
pub async fn check_batch(tracker: &dyn UsageTracker, batch: u64) -> Result<u64> {
    let current = tracker.current_count().await?;
    let max = tracker.monthly_max();
    if current + batch >= max {
        return Err(Error::QuotaExceeded {
            count: current + batch,
            max,
        }
        .into());
    }
    info!("usage {}/{} (+{})", current, max, batch);
    Ok(current)
}

/// Current month as `YYYY-MM`, local time when the offset is known.
pub fn month_key() -> Result<String> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    month_key_for(now)
}

pub(crate) fn month_key_for(at: OffsetDateTime) -> Result<String> {
    at.format(format_description!("[year]-[month]"))
        .with_context(|| "failed to format month")
}

fn guard(count: u64, max: u64) -> Result<u64> {
    if count >= max {
        return Err(Error::QuotaExceeded { count, max }.into());
    }
    Ok(count)
}

fn warn_if_reached(total: u64, max: u64) {
    if total >= max {
        warn!("OCR quota reached: {}/{}", total, max);
    }
}

/// No ledger configured.
pub struct Unmetered;

impl UsageTracker for Unmetered {
    fn monthly_max(&self) -> u64 {
        u64::MAX
    }

    fn current_count(&self) -> UsageFuture<'_, u64> {
        Box::pin(async { Ok(0) })
    }

    fn record(&self, _count: u64) -> UsageFuture<'_, u64> {
        Box::pin(async { Ok(0) })
    }
}

/// Shared web ledger: `GET` answers `{account: {"YYYY-MM": count}}`, a form
/// `POST` of `name`, `month`, `issueCount` adds to it and answers the same shape.
pub struct RemoteLedger {
    client: reqwest::Client,
    url: String,
    account: String,
    month: String,
    max: u64,
}

impl RemoteLedger {
    pub fn new(url: impl Into<String>, account: impl Into<String>, max: u64) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            url: url.into(),
            account: account.into(),
            month: month_key()?,
            max,
        })
    }

    async fn fetch(&self) -> Result<Value> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("failed to reach usage ledger {}", self.url))?;
        read_ledger(response).await
    }

    async fn add(&self, count: u64) -> Result<Value> {
        let issue_count = count.to_string();
        let response = self
            .client
            .post(&self.url)
            .form(&[
                ("name", self.account.as_str()),
                ("month", self.month.as_str()),
                ("issueCount", issue_count.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("failed to reach usage ledger {}", self.url))?;
        read_ledger(response).await
    }
}

async fn read_ledger(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .await
        .with_context(|| format!("failed to read usage ledger response ({})", status))?;
    if !status.is_success() {
        return Err(anyhow!("usage ledger error ({}): {}", status, text));
    }
    serde_json::from_str(&text).with_context(|| "usage ledger returned invalid JSON")
}

/// Count for `account` in `month`; absent entries count as zero.
pub(crate) fn count_in(ledger: &Value, account: &str, month: &str) -> u64 {
    let Some(value) = ledger.get(account).and_then(|months| months.get(month)) else {
        return 0;
    };
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|count| count.max(0.0) as u64))
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
        .unwrap_or(0)
}

impl UsageTracker for RemoteLedger {
    fn monthly_max(&self) -> u64 {
        self.max
    }

    fn current_count(&self) -> UsageFuture<'_, u64> {
        Box::pin(async move {
            let ledger = self.fetch().await?;
            let count = count_in(&ledger, &self.account, &self.month);
            info!("{} - {}: {}/{}", self.account, self.month, count, self.max);
            guard(count, self.max)
        })
    }

    fn record(&self, count: u64) -> UsageFuture<'_, u64> {
        Box::pin(async move {
            let ledger = self.add(count).await?;
            let total = count_in(&ledger, &self.account, &self.month);
            warn_if_reached(total, self.max);
            Ok(total)
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CountsFile {
    #[serde(default)]
    counts: BTreeMap<String, u64>,
}

/// Local ledger: `{"counts": {"YYYY-MM": n}}`, one file per account.
pub struct FileLedger {
    path: PathBuf,
    month: String,
    max: u64,
    lock: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>, max: u64) -> Result<Self> {
        Ok(Self::for_month(path, month_key()?, max))
    }

    pub fn for_month(path: impl Into<PathBuf>, month: impl Into<String>, max: u64) -> Self {
        Self {
            path: path.into(),
            month: month.into(),
            max,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<CountsFile> {
        if !self.path.exists() {
            return Ok(CountsFile::default());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read usage ledger: {}", self.path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid usage ledger: {}", self.path.display()))
    }

    fn save(&self, counts: &CountsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(counts)
            .with_context(|| "failed to serialize usage ledger")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write usage ledger: {}", self.path.display()))
    }
}

impl UsageTracker for FileLedger {
    fn monthly_max(&self) -> u64 {
        self.max
    }

    fn current_count(&self) -> UsageFuture<'_, u64> {
        Box::pin(async move {
            let count = self
                .load()?
                .counts
                .get(&self.month)
                .copied()
                .unwrap_or(0);
            info!("{}: {}/{}", self.month, count, self.max);
            guard(count, self.max)
        })
    }

    fn record(&self, count: u64) -> UsageFuture<'_, u64> {
        Box::pin(async move {
            let _held = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut counts = self.load()?;
            let entry = counts.counts.entry(self.month.clone()).or_insert(0);
            *entry += count;
            let total = *entry;
            self.save(&counts)?;
            warn_if_reached(total, self.max);
            Ok(total)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn month_key_is_zero_padded() {
        let key = month_key_for(datetime!(2022-09-18 10:00 UTC)).expect("format");
        assert_eq!(key, "2022-09");
    }

    #[test]
    fn remote_ledger_counts_are_read_leniently() {
        let ledger = json!({
            "alice": {"2022-09": 12, "2022-10": 3.0},
            "bob": {"2022-09": "7"}
        });
        assert_eq!(count_in(&ledger, "alice", "2022-09"), 12);
        assert_eq!(count_in(&ledger, "alice", "2022-10"), 3);
        assert_eq!(count_in(&ledger, "bob", "2022-09"), 7);
        assert_eq!(count_in(&ledger, "carol", "2022-09"), 0);
        assert_eq!(count_in(&ledger, "alice", "2023-01"), 0);
    }

    /// Answers one request with `response`, then hangs up.
    fn serve_once(response: &'static [u8]) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = std::io::Read::read(&mut stream, &mut request);
                let _ = std::io::Write::write_all(&mut stream, response);
            }
        });
        format!("http://{addr}/ledger")
    }

    fn ledger_at(url: String) -> RemoteLedger {
        RemoteLedger {
            client: reqwest::Client::builder().no_proxy().build().expect("client"),
            url,
            account: "me".to_string(),
            month: "2022-09".to_string(),
            max: 900,
        }
    }

    #[tokio::test]
    async fn remote_ledger_reads_the_account_month() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 23\r\nConnection: close\r\n\r\n{\"me\": {\"2022-09\": 41}}",
        );
        assert_eq!(ledger_at(url).current_count().await.expect("count"), 41);
    }

    #[tokio::test]
    async fn truncated_ledger_body_is_reported_as_a_read_failure() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\nConnection: close\r\n\r\n{\"me\": {",
        );
        let err = ledger_at(url).current_count().await.expect_err("truncated");
        let message = format!("{err:#}");
        assert!(message.contains("failed to read usage ledger response"), "{message}");
        assert!(!message.contains("invalid JSON"), "{message}");
    }

    #[tokio::test]
    async fn file_ledger_accumulates_per_month() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("accounts").join("me").join("counts.json");
        let ledger = FileLedger::for_month(&path, "2022-09", 900);
        assert_eq!(ledger.current_count().await.expect("empty"), 0);
        assert_eq!(ledger.record(5).await.expect("record"), 5);
        assert_eq!(ledger.record(2).await.expect("record"), 7);
        assert_eq!(ledger.current_count().await.expect("count"), 7);

        let stored: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(stored, json!({"counts": {"2022-09": 7}}));
    }

    #[tokio::test]
    async fn batch_reaching_the_maximum_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = FileLedger::for_month(dir.path().join("counts.json"), "2022-09", 10);
        ledger.record(4).await.expect("record");

        assert_eq!(check_batch(&ledger, 5).await.expect("fits"), 4);
        let err = check_batch(&ledger, 6).await.expect_err("limit");
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::QuotaExceeded { count: 10, max: 10 })
        ));
    }

    #[tokio::test]
    async fn exhausted_month_fails_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = FileLedger::for_month(dir.path().join("counts.json"), "2022-09", 3);
        assert_eq!(ledger.record(3).await.expect("record"), 3);
        let err = ledger.current_count().await.expect_err("exhausted");
        assert!(err.downcast_ref::<Error>().is_some());
    }

    #[tokio::test]
    async fn unmetered_never_refuses() {
        assert_eq!(check_batch(&Unmetered, 10_000).await.expect("ok"), 0);
    }
}
