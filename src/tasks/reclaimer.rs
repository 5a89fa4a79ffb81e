use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::ReclaimerConfig;
use crate::metrics::ReclaimerMetrics;
use crate::registry::{ConnectionRecord, ConnectionRegistry, RegistryError};

/// Outcome of one reclamation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records returned by the stale scan (any status)
    pub scanned: usize,
    /// CONNECTED records flipped to DISCONNECTED by this sweep
    pub reclaimed: usize,
    /// Status updates that failed
    pub failed: usize,
    /// DISCONNECTED records removed after the retention window
    pub purged: usize,
}

/// Finds connections idle past the stale threshold and marks them closed.
///
/// Stale records are flipped to DISCONNECTED rather than deleted; they are
/// only removed once they have also sat past `purge_after_seconds`.
pub struct StaleConnectionReclaimer {
    config: ReclaimerConfig,
    registry: Arc<dyn ConnectionRegistry>,
}

impl StaleConnectionReclaimer {
    pub fn new(config: ReclaimerConfig, registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &ReclaimerConfig {
        &self.config
    }

    /// Run one sweep against the current time
    pub async fn sweep(&self) -> Result<SweepReport, RegistryError> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as if the current time were `now`
    #[tracing::instrument(name = "reclaimer.sweep", skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, RegistryError> {
        let start = Instant::now();
        let cutoff = seconds_before(now, self.config.stale_threshold_seconds);
        let stale = self.registry.scan_stale(cutoff).await?;

        let mut report = SweepReport {
            scanned: stale.len(),
            ..Default::default()
        };

        let (connected, disconnected): (Vec<_>, Vec<_>) = stale
            .into_iter()
            .partition(ConnectionRecord::is_connected);

        let (reclaimed, failed) = self.reclaim(&connected, cutoff, now).await;
        report.reclaimed = reclaimed;
        report.failed = failed;
        report.purged = self.purge(&disconnected, now).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        ReclaimerMetrics::record_sweep(
            report.reclaimed as u64,
            report.failed as u64,
            report.purged as u64,
            elapsed_ms,
        );

        if report.reclaimed > 0 || report.failed > 0 || report.purged > 0 {
            tracing::info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                failed = report.failed,
                purged = report.purged,
                elapsed_ms = elapsed_ms,
                "Reclamation sweep completed"
            );
        } else {
            tracing::debug!(scanned = report.scanned, elapsed_ms = elapsed_ms, "Reclamation sweep found nothing to do");
        }

        Ok(report)
    }

    /// Flip records to DISCONNECTED in parallel batches; returns (reclaimed, failed).
    ///
    /// A record touched since the scan is left CONNECTED.
    async fn reclaim(
        &self,
        records: &[ConnectionRecord],
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (usize, usize) {
        let mut reclaimed = 0;
        let mut failed = 0;

        for batch in records.chunks(self.config.max_concurrent_updates.max(1)) {
            let updates = batch.iter().map(|record| async move {
                let result = self
                    .registry
                    .close_if_idle(&record.connection_id, cutoff, now)
                    .await;
                (record, result)
            });

            for (record, result) in join_all(updates).await {
                match result {
                    Ok(true) => {
                        reclaimed += 1;
                        tracing::debug!(
                            connection_id = %record.connection_id,
                            user_id = %record.user_id,
                            last_activity = %record.last_activity,
                            "Reclaimed stale connection"
                        );
                    }
                    // Touched, closed or removed since the scan
                    Ok(false) => {}
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(
                            connection_id = %record.connection_id,
                            error = %e,
                            "Failed to reclaim stale connection"
                        );
                    }
                }
            }
        }

        (reclaimed, failed)
    }

    /// Remove records DISCONNECTED for longer than the retention window
    async fn purge(&self, records: &[ConnectionRecord], now: DateTime<Utc>) -> usize {
        if self.config.purge_after_seconds == 0 {
            return 0;
        }
        let cutoff = seconds_before(now, self.config.purge_after_seconds);
        let expired: Vec<&ConnectionRecord> = records
            .iter()
            .filter(|r| r.closed_before(cutoff))
            .collect();

        let mut purged = 0;
        for batch in expired.chunks(self.config.max_concurrent_updates.max(1)) {
            let removals = batch.iter().map(|record| async move {
                (record, self.registry.remove(&record.connection_id).await)
            });

            for (record, result) in join_all(removals).await {
                match result {
                    Ok(()) => purged += 1,
                    Err(e) => tracing::warn!(
                        connection_id = %record.connection_id,
                        error = %e,
                        "Failed to purge closed connection record"
                    ),
                }
            }
        }
        purged
    }

    /// Sweep on the configured interval until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_secs(self.config.interval_seconds.max(1));
        let mut timer = tokio::time::interval(interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_seconds,
            stale_threshold_secs = self.config.stale_threshold_seconds,
            purge_after_secs = self.config.purge_after_seconds,
            "Reclaimer task started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Reclaimer task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(error = %e, "Reclamation sweep failed");
                    }
                }
            }
        }

        tracing::info!("Reclaimer task stopped");
    }
}

/// `now` minus `seconds`, saturating at the earliest representable instant
fn seconds_before(now: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or_else(|| {
            tracing::warn!(
                seconds = seconds,
                "Reclaimer window exceeds the representable time range"
            );
            DateTime::<Utc>::MIN_UTC
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionStatus, MemoryRegistry, RegistryBackend, RegistryStats};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    fn reclaimer(registry: Arc<dyn ConnectionRegistry>) -> StaleConnectionReclaimer {
        StaleConnectionReclaimer::new(
            ReclaimerConfig {
                max_concurrent_updates: 2,
                ..Default::default()
            },
            registry,
        )
    }

    async fn seed(registry: &dyn ConnectionRegistry, id: &str, idle: ChronoDuration, now: DateTime<Utc>) {
        let record = ConnectionRecord::connected_at(id, "u1", now - idle);
        registry.put(&record).await.unwrap();
    }

    async fn seed_closed(
        registry: &MemoryRegistry,
        id: &str,
        closed_for: ChronoDuration,
        now: DateTime<Utc>,
    ) {
        let closed_at = now - closed_for;
        let mut record = ConnectionRecord::connected_at(id, "u1", closed_at - ChronoDuration::hours(1));
        record.close(closed_at);
        registry.put(&record).await.unwrap();
    }

    /// Memory registry that fails the flip for one id and can record
    /// activity on another right after the stale scan
    struct InterferingRegistry {
        inner: MemoryRegistry,
        fail_close: Option<&'static str>,
        touch_after_scan: Option<(&'static str, DateTime<Utc>)>,
    }

    #[async_trait]
    impl ConnectionRegistry for InterferingRegistry {
        fn backend_type(&self) -> RegistryBackend {
            self.inner.backend_type()
        }
        async fn put(&self, record: &ConnectionRecord) -> Result<(), RegistryError> {
            self.inner.put(record).await
        }
        async fn get(&self, id: &str) -> Result<Option<ConnectionRecord>, RegistryError> {
            self.inner.get(id).await
        }
        async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<(), RegistryError> {
            self.inner.touch(id, at).await
        }
        async fn remove(&self, id: &str) -> Result<(), RegistryError> {
            self.inner.remove(id).await
        }
        async fn mark_disconnected(&self, id: &str) -> Result<bool, RegistryError> {
            self.inner.mark_disconnected(id).await
        }
        async fn close_if_idle(
            &self,
            id: &str,
            older_than: DateTime<Utc>,
            at: DateTime<Utc>,
        ) -> Result<bool, RegistryError> {
            if self.fail_close == Some(id) {
                return Err(RegistryError::Storage("write timed out".to_string()));
            }
            self.inner.close_if_idle(id, older_than, at).await
        }
        async fn query_by_user(&self, user: &str) -> Result<Vec<ConnectionRecord>, RegistryError> {
            self.inner.query_by_user(user).await
        }
        async fn scan_stale(
            &self,
            older_than: DateTime<Utc>,
        ) -> Result<Vec<ConnectionRecord>, RegistryError> {
            let stale = self.inner.scan_stale(older_than).await?;
            if let Some((id, at)) = self.touch_after_scan {
                self.inner.touch(id, at).await?;
            }
            Ok(stale)
        }
        async fn stats(&self) -> Result<RegistryStats, RegistryError> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_sweep_flips_only_stale_records() {
        let registry = Arc::new(MemoryRegistry::new());
        let now = Utc::now();
        seed(registry.as_ref(), "fresh", ChronoDuration::minutes(5), now).await;
        for i in 0..5 {
            seed(registry.as_ref(), &format!("stale-{}", i), ChronoDuration::hours(2), now).await;
        }

        let report = reclaimer(registry.clone()).sweep_at(now).await.unwrap();
        assert_eq!(report.scanned, 5);
        assert_eq!(report.reclaimed, 5);
        assert_eq!(report.failed, 0);
        assert_eq!(report.purged, 0);

        // Audit trail kept, status flipped
        let record = registry.get("stale-0").await.unwrap().unwrap();
        assert_eq!(record.status, ConnectionStatus::Disconnected);
        assert_eq!(record.disconnected_at, Some(now));
        assert!(registry.get("fresh").await.unwrap().unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_second_sweep_reclaims_nothing() {
        let registry = Arc::new(MemoryRegistry::new());
        let now = Utc::now();
        seed(registry.as_ref(), "c1", ChronoDuration::hours(2), now).await;

        let reclaimer = reclaimer(registry);
        assert_eq!(reclaimer.sweep_at(now).await.unwrap().reclaimed, 1);

        let report = reclaimer.sweep_at(now).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.reclaimed, 0);
    }

    #[tokio::test]
    async fn test_failed_update_does_not_abort_sweep() {
        let registry = Arc::new(InterferingRegistry {
            inner: MemoryRegistry::new(),
            fail_close: Some("bad"),
            touch_after_scan: None,
        });
        let now = Utc::now();
        for id in ["a", "bad", "c"] {
            seed(registry.as_ref(), id, ChronoDuration::hours(2), now).await;
        }

        let report = reclaimer(registry.clone()).sweep_at(now).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 3,
                reclaimed: 2,
                failed: 1,
                purged: 0
            }
        );
        assert!(registry.get("bad").await.unwrap().unwrap().is_connected());
        assert!(!registry.get("a").await.unwrap().unwrap().is_connected());
        assert!(!registry.get("c").await.unwrap().unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_activity_after_scan_keeps_connection() {
        let now = Utc::now();
        let registry = Arc::new(InterferingRegistry {
            inner: MemoryRegistry::new(),
            fail_close: None,
            touch_after_scan: Some(("busy", now)),
        });
        seed(registry.as_ref(), "busy", ChronoDuration::hours(2), now).await;
        seed(registry.as_ref(), "idle", ChronoDuration::hours(2), now).await;

        let report = reclaimer(registry.clone()).sweep_at(now).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.failed, 0);

        let busy = registry.get("busy").await.unwrap().unwrap();
        assert!(busy.is_connected());
        assert_eq!(busy.last_activity, now);
        assert!(!registry.get("idle").await.unwrap().unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_purge_removes_long_closed_records() {
        let registry = Arc::new(MemoryRegistry::new());
        let now = Utc::now();
        seed_closed(&registry, "ancient", ChronoDuration::days(3), now).await;
        seed_closed(&registry, "recent", ChronoDuration::hours(2), now).await;

        let report = reclaimer(registry.clone()).sweep_at(now).await.unwrap();
        assert_eq!(report.reclaimed, 0);
        assert_eq!(report.purged, 1);
        assert!(registry.get("ancient").await.unwrap().is_none());
        assert!(registry.get("recent").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retention_counts_from_disconnect() {
        let registry = Arc::new(MemoryRegistry::new());
        let now = Utc::now();
        seed(registry.as_ref(), "c1", ChronoDuration::hours(23), now).await;

        let reclaimer = reclaimer(registry.clone());
        assert_eq!(reclaimer.sweep_at(now).await.unwrap().reclaimed, 1);

        // Idle for 25h, but closed for only 2h
        let report = reclaimer.sweep_at(now + ChronoDuration::hours(2)).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(registry.get("c1").await.unwrap().is_some());

        let report = reclaimer.sweep_at(now + ChronoDuration::hours(25)).await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(registry.get("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_disabled() {
        let registry = Arc::new(MemoryRegistry::new());
        let now = Utc::now();
        seed_closed(&registry, "ancient", ChronoDuration::days(3), now).await;

        let reclaimer = StaleConnectionReclaimer::new(
            ReclaimerConfig {
                purge_after_seconds: 0,
                ..Default::default()
            },
            registry.clone(),
        );
        assert_eq!(reclaimer.sweep_at(now).await.unwrap().purged, 0);
        assert!(registry.get("ancient").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_oversized_windows_reclaim_nothing() {
        let registry = Arc::new(MemoryRegistry::new());
        let now = Utc::now();
        seed(registry.as_ref(), "old", ChronoDuration::days(30), now).await;
        seed_closed(&registry, "closed", ChronoDuration::days(30), now).await;

        let reclaimer = StaleConnectionReclaimer::new(
            ReclaimerConfig {
                stale_threshold_seconds: u64::MAX,
                purge_after_seconds: u64::MAX,
                ..Default::default()
            },
            registry.clone(),
        );
        let report = reclaimer.sweep_at(now).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(registry.get("old").await.unwrap().unwrap().is_connected());
        assert!(registry.get("closed").await.unwrap().is_some());
    }

    #[test]
    fn test_seconds_before() {
        let now = Utc::now();
        assert_eq!(seconds_before(now, 3600), now - ChronoDuration::hours(1));
        assert_eq!(seconds_before(now, u64::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(seconds_before(now, i64::MAX as u64), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(MemoryRegistry::new());
        let reclaimer = Arc::new(reclaimer(registry));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(reclaimer.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }
}
