use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::BulkClient;
use crate::document::BulkEntry;
use crate::error::{ReporterError, Result};

/// In-memory client recording every call it receives
///
/// Pings and bulk writes succeed unless told otherwise.
pub struct MemoryClient {
    name: String,
    pings: AtomicUsize,
    ping_timeouts: Mutex<Vec<Option<Duration>>>,
    ping_failures: AtomicUsize,
    fail_bulk: AtomicBool,
    bulks: Mutex<Vec<Vec<BulkEntry>>>,
}

impl MemoryClient {
    /// Create a new memory client
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pings: AtomicUsize::new(0),
            ping_timeouts: Mutex::new(Vec::new()),
            ping_failures: AtomicUsize::new(0),
            fail_bulk: AtomicBool::new(false),
            bulks: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `count` pings fail
    pub fn fail_pings(&self, count: usize) {
        self.ping_failures.store(count, Ordering::SeqCst);
    }

    /// Make every ping fail until reset with `fail_pings(0)`
    pub fn fail_all_pings(&self) {
        self.fail_pings(usize::MAX);
    }

    /// Toggle failure of bulk writes
    pub fn fail_bulk(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::SeqCst);
    }

    /// Number of pings received
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Timeouts passed to each ping, in call order
    pub fn ping_timeouts(&self) -> Vec<Option<Duration>> {
        self.ping_timeouts
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Number of bulk writes received, failed ones included
    pub fn bulk_count(&self) -> usize {
        self.bulks.lock().map(|b| b.len()).unwrap_or_default()
    }

    /// Bodies of every bulk write received
    pub fn bulks(&self) -> Vec<Vec<BulkEntry>> {
        self.bulks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Body of the most recent bulk write
    pub fn last_bulk(&self) -> Option<Vec<BulkEntry>> {
        self.bulks.lock().ok().and_then(|b| b.last().cloned())
    }
}

#[async_trait]
impl BulkClient for MemoryClient {
    async fn ping(&self, timeout: Option<Duration>) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.ping_timeouts
            .lock()
            .map_err(|_| ReporterError::poisoned("client"))?
            .push(timeout);

        let failing = self
            .ping_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();

        if failing {
            return Err(ReporterError::Connection(format!("{} is unreachable", self.name)).into());
        }
        Ok(())
    }

    async fn bulk(&self, entries: &[BulkEntry]) -> Result<()> {
        self.bulks
            .lock()
            .map_err(|_| ReporterError::poisoned("client"))?
            .push(entries.to_vec());

        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(ReporterError::Bulk(format!("{} rejected the request", self.name)).into());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pings_succeed_by_default() {
        let client = MemoryClient::new("mem");
        assert!(client.ping(None).await.is_ok());
        assert!(client.ping(Some(Duration::from_millis(30))).await.is_ok());
        assert_eq!(client.ping_count(), 2);
        assert_eq!(
            client.ping_timeouts(),
            vec![None, Some(Duration::from_millis(30))]
        );
    }

    #[tokio::test]
    async fn test_failing_pings_are_counted_down() {
        let client = MemoryClient::new("mem");
        client.fail_pings(2);
        assert!(client.ping(None).await.is_err());
        assert!(client.ping(None).await.is_err());
        assert!(client.ping(None).await.is_ok());

        client.fail_all_pings();
        for _ in 0..5 {
            assert!(client.ping(None).await.is_err());
        }
        client.fail_pings(0);
        assert!(client.ping(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_bulk_is_recorded_even_when_failing() {
        let client = MemoryClient::new("mem");
        client.bulk(&[]).await.unwrap();
        client.fail_bulk(true);
        let err = client.bulk(&[]).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ReporterError>(),
            Some(ReporterError::Bulk(_))
        ));
        assert_eq!(client.bulk_count(), 2);
        assert_eq!(client.last_bulk(), Some(Vec::new()));
    }
}
