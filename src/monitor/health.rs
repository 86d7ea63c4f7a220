//! Central-store health checks.
//!
//! Samples the central store's performance gauges on a fixed interval and
//! grades each against configured warning/critical thresholds: probe
//! round-trip, average operation latency, cache hit ratio, memory, CPU and
//! disk utilization, and lock contention. The overall status is the worst
//! individual grade. Snapshots are kept in memory for a rolling window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{SyncConfig, Thresholds};
use crate::model::{HealthCheckResult, HealthStatus, MetricsSnapshot};
use crate::store::CentralStore;

/// One full battery outcome.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub generated_at: DateTime<Utc>,
}

/// Samples metrics and grades them against thresholds.
pub struct HealthMonitor {
    central: Arc<dyn CentralStore>,
    config: SyncConfig,
    latest: Arc<Mutex<Vec<HealthCheckResult>>>,
    metrics: Arc<Mutex<VecDeque<MetricsSnapshot>>>,
    shutdown: watch::Sender<bool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(central: Arc<dyn CentralStore>, config: SyncConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            central,
            config,
            latest: Arc::new(Mutex::new(Vec::new())),
            metrics: Arc::new(Mutex::new(VecDeque::new())),
            shutdown,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Run the battery now, outside the timer.
    pub async fn force_check(&self) -> HealthReport {
        let checks = Self::run_battery(
            &self.central,
            &self.config,
            &self.metrics,
        )
        .await;
        let report = HealthReport {
            overall: aggregate(&checks),
            checks: checks.clone(),
            generated_at: Utc::now(),
        };
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = checks;
        report
    }

    /// The most recent battery outcome. `Unknown` before the first run.
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let checks = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        HealthReport {
            overall: aggregate(&checks),
            generated_at: checks
                .first()
                .map_or_else(Utc::now, |c| c.measured_at),
            checks,
        }
    }

    /// Snapshots sampled within the last `hours`, oldest first.
    #[must_use]
    pub fn metrics_history(&self, hours: i64) -> Vec<MetricsSnapshot> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// The latest snapshot grouped into operator-facing sections, or
    /// `None` before the first successful sample.
    #[must_use]
    pub fn performance_summary(&self) -> Option<Value> {
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        let m = metrics.back()?;
        Some(json!({
            "timestamp": m.timestamp,
            "connections": {
                "total": m.connection_count,
                "active": m.active_connections,
                "idle": m.idle_connections,
            },
            "performance": {
                "avg_operation_ms": m.avg_operation_ms,
                "slow_operations": m.slow_operations,
                "cache_hit_ratio": m.cache_hit_ratio,
            },
            "system": {
                "memory_usage_percent": m.memory_usage_percent,
                "cpu_usage_percent": m.cpu_usage_percent,
                "disk_usage_percent": m.disk_usage_percent,
            },
            "contention": {
                "locks_waiting": m.locks_waiting,
                "deadlocks": m.deadlocks,
            },
        }))
    }

    /// Spawn the sampling loop. Idempotent.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let central = self.central.clone();
        let config = self.config.clone();
        let latest = self.latest.clone();
        let metrics = self.metrics.clone();
        let mut shutdown = self.shutdown.subscribe();

        *handle = Some(tokio::spawn(async move {
            loop {
                let checks = Self::run_battery(&central, &config, &metrics).await;
                let overall = aggregate(&checks);
                if overall.severity() >= HealthStatus::Warning.severity() {
                    for check in checks.iter().filter(|c| {
                        c.status.severity() >= HealthStatus::Warning.severity()
                    }) {
                        tracing::warn!(
                            check = check.name,
                            status = %check.status,
                            "{}", check.message
                        );
                    }
                }
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = checks;

                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(config.health_interval) => {}
                }
            }
            tracing::debug!("health sampling loop stopped");
        }));
    }

    /// Signal the loop to stop and wait for it to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "health loop task ended abnormally");
            }
        }
    }

    async fn run_battery(
        central: &Arc<dyn CentralStore>,
        config: &SyncConfig,
        metrics: &Arc<Mutex<VecDeque<MetricsSnapshot>>>,
    ) -> Vec<HealthCheckResult> {
        let t = &config.thresholds;
        let mut checks = Vec::new();

        match central.probe(config.probe_timeout).await {
            Ok(latency) => {
                let ms = millis(latency);
                checks.push(check(
                    "connectivity",
                    grade_high(ms, t.probe_ms),
                    format!("probe round-trip {ms:.0}ms"),
                    ms,
                    t.probe_ms,
                ));
            }
            Err(e) => {
                let mut result = check(
                    "connectivity",
                    HealthStatus::Critical,
                    format!("central store unreachable: {e}"),
                    0.0,
                    t.probe_ms,
                );
                result.details.remove("value");
                checks.push(result);
                // No point sampling metrics over a dead connection.
                return checks;
            }
        }

        let sample = tokio::time::timeout(
            config.health_sample_timeout,
            central.sample_metrics(),
        )
        .await;
        match sample {
            Ok(Ok(m)) => {
                checks.push(check(
                    "operation_latency",
                    grade_high(m.avg_operation_ms, t.operation_ms),
                    format!("average operation {:.0}ms", m.avg_operation_ms),
                    m.avg_operation_ms,
                    t.operation_ms,
                ));
                checks.push(check(
                    "cache_hit_ratio",
                    grade_low(m.cache_hit_ratio, t.cache_hit_ratio_percent),
                    format!("cache hit ratio {:.1}%", m.cache_hit_ratio),
                    m.cache_hit_ratio,
                    t.cache_hit_ratio_percent,
                ));
                checks.push(check(
                    "memory",
                    grade_high(m.memory_usage_percent, t.memory_percent),
                    format!("memory usage {:.1}%", m.memory_usage_percent),
                    m.memory_usage_percent,
                    t.memory_percent,
                ));
                checks.push(check(
                    "cpu",
                    grade_high(m.cpu_usage_percent, t.cpu_percent),
                    format!("cpu usage {:.1}%", m.cpu_usage_percent),
                    m.cpu_usage_percent,
                    t.cpu_percent,
                ));
                checks.push(check(
                    "disk",
                    grade_high(m.disk_usage_percent, t.disk_percent),
                    format!("disk usage {:.1}%", m.disk_usage_percent),
                    m.disk_usage_percent,
                    t.disk_percent,
                ));
                checks.push(check(
                    "lock_contention",
                    grade_high(f64::from(m.locks_waiting), t.locks_waiting),
                    format!("{} waiting locks, {} deadlocks", m.locks_waiting, m.deadlocks),
                    f64::from(m.locks_waiting),
                    t.locks_waiting,
                ));

                let mut history = metrics.lock().unwrap_or_else(PoisonError::into_inner);
                history.push_back(m);
                let cutoff =
                    Utc::now() - chrono::Duration::hours(config.metrics_retention_hours);
                while history.front().is_some_and(|m| m.timestamp < cutoff) {
                    history.pop_front();
                }
            }
            Ok(Err(e)) => {
                checks.push(HealthCheckResult {
                    name: "metrics_sample".to_string(),
                    status: HealthStatus::Unknown,
                    message: format!("metrics unavailable: {e}"),
                    measured_at: Utc::now(),
                    details: Map::new(),
                });
            }
            Err(_) => {
                checks.push(HealthCheckResult {
                    name: "metrics_sample".to_string(),
                    status: HealthStatus::Unknown,
                    message: format!(
                        "metrics sample timed out after {:?}",
                        config.health_sample_timeout
                    ),
                    measured_at: Utc::now(),
                    details: Map::new(),
                });
            }
        }

        checks
    }
}

/// Worst individual grade; `Unknown` for an empty battery.
fn aggregate(checks: &[HealthCheckResult]) -> HealthStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max_by_key(|s| s.severity())
        .unwrap_or(HealthStatus::Unknown)
}

/// Grade a gauge where exceeding the bound is the problem.
fn grade_high(value: f64, t: Thresholds) -> HealthStatus {
    if value >= t.critical {
        HealthStatus::Critical
    } else if value >= t.warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Grade a gauge where falling below the bound is the problem.
fn grade_low(value: f64, t: Thresholds) -> HealthStatus {
    if value <= t.critical {
        HealthStatus::Critical
    } else if value <= t.warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

fn check(
    name: &str,
    status: HealthStatus,
    message: String,
    value: f64,
    t: Thresholds,
) -> HealthCheckResult {
    let mut details = Map::new();
    details.insert("value".to_string(), json!(value));
    details.insert("warning".to_string(), json!(t.warning));
    details.insert("critical".to_string(), json!(t.critical));
    HealthCheckResult {
        name: name.to_string(),
        status,
        message,
        measured_at: Utc::now(),
        details,
    }
}

#[allow(clippy::cast_precision_loss)]
fn millis(d: std::time::Duration) -> f64 {
    d.as_millis() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::model::{OperationType, Payload};
    use crate::registry::Table;
    use crate::store::ChangedRecord;
    use async_trait::async_trait;
    use std::time::Duration;

    struct MetricsCentral {
        snapshot: Mutex<MetricsSnapshot>,
        reachable: bool,
    }

    impl MetricsCentral {
        fn healthy() -> MetricsSnapshot {
            MetricsSnapshot {
                timestamp: Utc::now(),
                connection_count: 10,
                active_connections: 2,
                idle_connections: 8,
                avg_operation_ms: 12.0,
                slow_operations: 0,
                cache_hit_ratio: 99.0,
                memory_usage_percent: 40.0,
                cpu_usage_percent: 25.0,
                disk_usage_percent: 50.0,
                locks_waiting: 0,
                deadlocks: 0,
            }
        }
    }

    #[async_trait]
    impl CentralStore for MetricsCentral {
        async fn probe(&self, _timeout: Duration) -> Result<Duration> {
            if self.reachable {
                Ok(Duration::from_millis(8))
            } else {
                Err(crate::error::Error::CentralUnreachable("down".into()))
            }
        }

        async fn changed_since(
            &self,
            _table: Table,
            _since: DateTime<Utc>,
            _limit: usize,
        ) -> Result<Vec<ChangedRecord>> {
            Ok(Vec::new())
        }

        async fn apply(
            &self,
            _table: Table,
            _op: OperationType,
            _record_id: &str,
            _payload: &Payload,
        ) -> Result<()> {
            Ok(())
        }

        async fn sample_metrics(&self) -> Result<MetricsSnapshot> {
            Ok(self.snapshot.lock().unwrap().clone())
        }
    }

    fn monitor_with(snapshot: MetricsSnapshot, reachable: bool) -> HealthMonitor {
        let central = Arc::new(MetricsCentral {
            snapshot: Mutex::new(snapshot),
            reachable,
        });
        HealthMonitor::new(central, SyncConfig::default())
    }

    #[test]
    fn grading_respects_direction() {
        let t = Thresholds {
            warning: 80.0,
            critical: 90.0,
        };
        assert_eq!(grade_high(50.0, t), HealthStatus::Healthy);
        assert_eq!(grade_high(85.0, t), HealthStatus::Warning);
        assert_eq!(grade_high(95.0, t), HealthStatus::Critical);

        let t = Thresholds {
            warning: 95.0,
            critical: 90.0,
        };
        assert_eq!(grade_low(99.0, t), HealthStatus::Healthy);
        assert_eq!(grade_low(93.0, t), HealthStatus::Warning);
        assert_eq!(grade_low(85.0, t), HealthStatus::Critical);
    }

    #[tokio::test]
    async fn healthy_metrics_give_a_healthy_report() {
        let mon = monitor_with(MetricsCentral::healthy(), true);
        let report = mon.force_check().await;

        assert_eq!(report.overall, HealthStatus::Healthy);
        assert!(report.checks.iter().any(|c| c.name == "connectivity"));
        assert!(report.checks.iter().any(|c| c.name == "disk"));
        assert!(mon.performance_summary().is_some());
        assert_eq!(mon.metrics_history(1).len(), 1);
    }

    #[tokio::test]
    async fn worst_check_drives_the_overall_status() {
        let mut snapshot = MetricsCentral::healthy();
        snapshot.memory_usage_percent = 85.0; // warning
        snapshot.disk_usage_percent = 95.0; // critical
        let mon = monitor_with(snapshot, true);

        let report = mon.force_check().await;
        assert_eq!(report.overall, HealthStatus::Critical);
        let disk = report.checks.iter().find(|c| c.name == "disk").unwrap();
        assert_eq!(disk.status, HealthStatus::Critical);
        let memory = report.checks.iter().find(|c| c.name == "memory").unwrap();
        assert_eq!(memory.status, HealthStatus::Warning);
    }

    #[tokio::test]
    async fn unreachable_central_is_critical_and_skips_metrics() {
        let mon = monitor_with(MetricsCentral::healthy(), false);
        let report = mon.force_check().await;

        assert_eq!(report.overall, HealthStatus::Critical);
        assert_eq!(report.checks.len(), 1);
        assert_eq!(report.checks[0].name, "connectivity");
        assert!(mon.performance_summary().is_none());
    }

    #[tokio::test]
    async fn report_is_unknown_before_the_first_battery() {
        let mon = monitor_with(MetricsCentral::healthy(), true);
        assert_eq!(mon.report().overall, HealthStatus::Unknown);
    }
}
