//! Usage records and exactly-once emission
//!
//! Both pipelines end here: a VM lifecycle ends when its resource is
//! deleted, a job ends at its terminal transition. Either way the
//! emitter converts what was consumed into line-item quantities and
//! hands one [`UsageRecord`] to the billing sink. The emission ledger
//! is checked before the hand-off and written after it, keyed on
//! subject plus transition, so a crash and restart can re-drive the
//! same transition without billing it twice.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use gantry_core::{AdapterError, ResourceId, ResourceRequest, Result};
use gantry_scheduler::{JobMetrics, TerminalSink, TerminalSnapshot};

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Line-item quantities the billing pipeline prices
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Quantities {
    /// CPU core-seconds
    pub cpu_core_seconds: u64,
    /// Memory GB-seconds
    pub memory_gb_seconds: u64,
    /// GPU device-seconds
    pub gpu_seconds: u64,
    /// Node-hours
    pub node_hours: f64,
}

impl Quantities {
    /// Quantities for a finished job, straight from its frozen metrics
    pub fn from_job(metrics: &JobMetrics) -> Self {
        Self {
            cpu_core_seconds: metrics.cpu_core_seconds,
            memory_gb_seconds: metrics.memory_gb_seconds,
            gpu_seconds: metrics.gpu_seconds,
            node_hours: metrics.node_hours,
        }
    }

    /// Quantities for a VM that held `resources` for `lifetime`
    pub fn for_vm(resources: &ResourceRequest, lifetime: Duration) -> Self {
        let seconds = lifetime.as_secs();
        Self {
            cpu_core_seconds: seconds * resources.cpu_millis / 1000,
            memory_gb_seconds: seconds * (resources.memory_bytes / BYTES_PER_GB),
            gpu_seconds: seconds * u64::from(resources.gpu_units),
            node_hours: seconds as f64 / 3600.0,
        }
    }
}

/// One terminal transition's worth of usage, the sole artifact the
/// billing collaborator consumes
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /// Unique record identifier
    pub record_id: Uuid,
    /// Resource or job the usage belongs to
    pub subject_id: String,
    /// Terminal transition that produced the record
    pub transition: String,
    /// Billable quantities
    pub quantities: Quantities,
    /// When the record was emitted
    pub emitted_at: DateTime<Utc>,
}

/// Where finished usage records go
#[async_trait]
pub trait BillingSink: Send + Sync {
    /// Hand one record to the billing collaborator
    async fn submit(&self, record: &UsageRecord) -> Result<()>;
}

/// Remembers which terminal transitions have already been billed
#[async_trait]
pub trait EmissionLedger: Send + Sync {
    /// Whether this transition was already emitted
    async fn is_recorded(&self, key: &str) -> Result<bool>;

    /// Mark this transition emitted
    async fn record(&self, key: &str) -> Result<()>;
}

/// In-process ledger; share one instance to survive an engine rebuild
#[derive(Default)]
pub struct MemoryLedger {
    keys: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmissionLedger for MemoryLedger {
    async fn is_recorded(&self, key: &str) -> Result<bool> {
        Ok(self.keys.lock().await.contains(key))
    }

    async fn record(&self, key: &str) -> Result<()> {
        self.keys.lock().await.insert(key.to_string());
        Ok(())
    }
}

/// Billing sink that writes each record to the log as one JSON line
pub struct LoggingSink;

#[async_trait]
impl BillingSink for LoggingSink {
    async fn submit(&self, record: &UsageRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| AdapterError::backend(format!("usage record serialization: {e}")))?;
        info!("Usage record: {}", line);
        Ok(())
    }
}

/// Converts terminal snapshots into usage records, exactly once each
pub struct UsageEmitter {
    ledger: Arc<dyn EmissionLedger>,
    sink: Arc<dyn BillingSink>,
}

impl UsageEmitter {
    /// Create an emitter over a ledger and a billing sink
    pub fn new(ledger: Arc<dyn EmissionLedger>, sink: Arc<dyn BillingSink>) -> Self {
        Self { ledger, sink }
    }

    /// Emit one record for `subject_id`'s `transition`.
    ///
    /// Returns `None` when the ledger shows the transition was already
    /// billed. The ledger is written only after the sink accepts the
    /// record, so a failed hand-off stays owed and the next drive of
    /// the same transition retries it.
    pub async fn emit(
        &self,
        subject_id: &str,
        transition: &str,
        quantities: Quantities,
    ) -> Result<Option<UsageRecord>> {
        let key = format!("{subject_id}:{transition}");
        if self.ledger.is_recorded(&key).await? {
            debug!("Usage for {} already emitted, skipping", key);
            return Ok(None);
        }

        let record = UsageRecord {
            record_id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            transition: transition.to_string(),
            quantities,
            emitted_at: Utc::now(),
        };
        self.sink.submit(&record).await?;
        self.ledger.record(&key).await?;
        info!(
            "Usage emitted for {}: {} cpu-core-seconds, {} gb-seconds, {} gpu-seconds",
            key,
            record.quantities.cpu_core_seconds,
            record.quantities.memory_gb_seconds,
            record.quantities.gpu_seconds
        );
        Ok(Some(record))
    }

    /// Emit the deletion record for a VM-shaped resource
    pub async fn emit_vm_deleted(
        &self,
        id: &ResourceId,
        resources: &ResourceRequest,
        lifetime: Duration,
    ) -> Result<Option<UsageRecord>> {
        self.emit(id.as_str(), "deleted", Quantities::for_vm(resources, lifetime))
            .await
    }
}

#[async_trait]
impl TerminalSink for UsageEmitter {
    async fn job_finished(&self, snapshot: &TerminalSnapshot) -> Result<()> {
        let quantities = Quantities::from_job(&snapshot.metrics);
        self.emit(&snapshot.job_id.to_string(), &snapshot.state.to_string(), quantities)
            .await
            .map(|_| ())
    }
}
