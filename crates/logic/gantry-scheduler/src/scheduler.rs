//! Job lifecycle state machine and terminal hand-off
//!
//! The scheduler owns job state; it never computes usage itself. The
//! executor reports state changes and cumulative metrics through the
//! seams here, and the moment a job goes terminal its frozen snapshot
//! is handed to the registered sink. Emission is transition-driven,
//! there is no timer re-scanning for finished jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use gantry_core::ResourceRequest;

use crate::error::SchedulerError;
use crate::job::{Job, JobId, JobMetrics, JobState};

/// Frozen view of a job at its terminal transition
#[derive(Debug, Clone)]
pub struct TerminalSnapshot {
    /// Job that finished
    pub job_id: JobId,
    /// Terminal state the job landed in
    pub state: JobState,
    /// Compute the job had asked for
    pub resources: ResourceRequest,
    /// Final cumulative metrics
    pub metrics: JobMetrics,
    /// When the terminal transition happened
    pub finished_at: DateTime<Utc>,
}

/// Receives each job's terminal snapshot, once, at the transition
#[async_trait]
pub trait TerminalSink: Send + Sync {
    /// Called synchronously as part of the terminal transition
    async fn job_finished(&self, snapshot: &TerminalSnapshot) -> gantry_core::Result<()>;
}

/// Tracks batch jobs through their lifecycle
///
/// The outer map lock is held only for insert and lookup; every job
/// carries its own lock, so transitions on different jobs run fully in
/// parallel while same-job calls serialize.
pub struct JobScheduler {
    jobs: Mutex<HashMap<JobId, Arc<Mutex<Job>>>>,
    sink: Option<Arc<dyn TerminalSink>>,
}

impl JobScheduler {
    /// Scheduler with no terminal sink
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            sink: None,
        }
    }

    /// Register the sink that receives terminal snapshots
    pub fn with_sink(mut self, sink: Arc<dyn TerminalSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn entry(&self, id: &JobId) -> Result<Arc<Mutex<Job>>, SchedulerError> {
        let jobs = self.jobs.lock().await;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJob(id.clone()))
    }

    /// Accept a new job in Pending
    pub async fn submit(
        &self,
        id: JobId,
        resources: ResourceRequest,
        max_runtime_secs: u64,
    ) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&id) {
            return Err(SchedulerError::DuplicateJob(id));
        }
        info!(
            "Job {} submitted ({} millicores, {} bytes, {} GPUs, max {}s)",
            id, resources.cpu_millis, resources.memory_bytes, resources.gpu_units, max_runtime_secs
        );
        jobs.insert(
            id.clone(),
            Arc::new(Mutex::new(Job::new(id, resources, max_runtime_secs))),
        );
        Ok(())
    }

    /// Drive a job to `next`, rejecting anything outside the legal chain.
    ///
    /// A terminal `next` freezes the job and hands its snapshot to the
    /// sink before the entry lock is released, so no other transition
    /// can interleave between the state write and the hand-off.
    pub async fn set_job_state(&self, id: &JobId, next: JobState) -> Result<(), SchedulerError> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        if !job.state.can_transition_to(next) {
            return Err(SchedulerError::IllegalTransition {
                job: id.clone(),
                from: job.state,
                to: next,
            });
        }
        let from = job.state;
        job.state = next;
        info!("Job {} transitioned: {} -> {}", id, from, next);

        if next.is_terminal() {
            let finished_at = Utc::now();
            job.finished_at = Some(finished_at);
            let snapshot = TerminalSnapshot {
                job_id: job.id.clone(),
                state: next,
                resources: job.resources.clone(),
                metrics: job.metrics,
                finished_at,
            };
            if let Some(sink) = &self.sink {
                // The transition stands either way; a failed hand-off is
                // the sink's to recover, its ledger knows what is owed.
                if let Err(e) = sink.job_finished(&snapshot).await {
                    error!("Terminal hand-off failed for job {}: {}", id, e);
                }
            }
        }
        Ok(())
    }

    /// Merge a cumulative metrics report. Running jobs only.
    pub async fn set_job_metrics(
        &self,
        id: &JobId,
        metrics: &JobMetrics,
    ) -> Result<(), SchedulerError> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        if job.state != JobState::Running {
            return Err(SchedulerError::MetricsFrozen {
                job: id.clone(),
                state: job.state,
            });
        }
        job.metrics.merge_from(metrics);
        debug!("Job {} metrics: {:?}", id, job.metrics);
        Ok(())
    }

    /// Cancel a job. Legal from every non-terminal state.
    pub async fn cancel(&self, id: &JobId) -> Result<(), SchedulerError> {
        self.set_job_state(id, JobState::Cancelled).await
    }

    /// Snapshot of the job as it is now. No side effects, cheap to poll.
    pub async fn job_status(&self, id: &JobId) -> Result<Job, SchedulerError> {
        let entry = self.entry(id).await?;
        let job = entry.lock().await;
        Ok(job.clone())
    }

    /// How many jobs the scheduler is tracking, terminal ones included
    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        snapshots: Mutex<Vec<TerminalSnapshot>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                snapshots: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TerminalSink for RecordingSink {
        async fn job_finished(&self, snapshot: &TerminalSnapshot) -> gantry_core::Result<()> {
            self.snapshots.lock().await.push(snapshot.clone());
            Ok(())
        }
    }

    fn resources() -> ResourceRequest {
        ResourceRequest::new(4000, 8 * 1024 * 1024 * 1024).with_gpu(1, "a100")
    }

    async fn advance(scheduler: &JobScheduler, id: &JobId, states: &[JobState]) {
        for state in states {
            scheduler.set_job_state(id, *state).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_full_chain_reaches_completed() {
        let scheduler = JobScheduler::new();
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();
        assert_eq!(scheduler.job_status(&id).await.unwrap().state, JobState::Pending);

        advance(
            &scheduler,
            &id,
            &[JobState::Queued, JobState::Scheduled, JobState::Running, JobState::Completed],
        )
        .await;

        let job = scheduler.job_status(&id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_illegal_transitions_rejected() {
        let scheduler = JobScheduler::new();
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();

        for next in [JobState::Running, JobState::Completed, JobState::Scheduled] {
            let err = scheduler.set_job_state(&id, next).await.unwrap_err();
            assert!(
                matches!(err, SchedulerError::IllegalTransition { .. }),
                "pending -> {next} must be rejected, got {err}"
            );
        }
        assert_eq!(scheduler.job_status(&id).await.unwrap().state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_cancel_from_every_non_terminal_state() {
        let prefixes: [&[JobState]; 4] = [
            &[],
            &[JobState::Queued],
            &[JobState::Queued, JobState::Scheduled],
            &[JobState::Queued, JobState::Scheduled, JobState::Running],
        ];
        for prefix in prefixes {
            let scheduler = JobScheduler::new();
            let id = JobId::new("job-1");
            scheduler.submit(id.clone(), resources(), 7200).await.unwrap();
            advance(&scheduler, &id, prefix).await;

            scheduler.cancel(&id).await.unwrap();
            assert_eq!(scheduler.job_status(&id).await.unwrap().state, JobState::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_cancel_after_terminal_rejected() {
        let scheduler = JobScheduler::new();
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();
        advance(
            &scheduler,
            &id,
            &[JobState::Queued, JobState::Scheduled, JobState::Running, JobState::Failed],
        )
        .await;

        let err = scheduler.cancel(&id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::IllegalTransition { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_metrics_accepted_only_while_running() {
        let scheduler = JobScheduler::new();
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();

        let report = JobMetrics {
            cpu_core_seconds: 100,
            ..Default::default()
        };
        let err = scheduler.set_job_metrics(&id, &report).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MetricsFrozen { .. }), "got {err}");

        advance(&scheduler, &id, &[JobState::Queued, JobState::Scheduled, JobState::Running]).await;
        scheduler.set_job_metrics(&id, &report).await.unwrap();

        scheduler.set_job_state(&id, JobState::Completed).await.unwrap();
        let err = scheduler.set_job_metrics(&id, &report).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MetricsFrozen { .. }), "terminal jobs are frozen");
    }

    #[tokio::test]
    async fn test_metrics_merge_keeps_maximum() {
        let scheduler = JobScheduler::new();
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();
        advance(&scheduler, &id, &[JobState::Queued, JobState::Scheduled, JobState::Running]).await;

        scheduler
            .set_job_metrics(
                &id,
                &JobMetrics {
                    cpu_core_seconds: 200,
                    wall_clock_seconds: 50,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // Out-of-order report with a stale CPU counter.
        scheduler
            .set_job_metrics(
                &id,
                &JobMetrics {
                    cpu_core_seconds: 150,
                    wall_clock_seconds: 60,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let job = scheduler.job_status(&id).await.unwrap();
        assert_eq!(job.metrics.cpu_core_seconds, 200);
        assert_eq!(job.metrics.wall_clock_seconds, 60);
    }

    #[tokio::test]
    async fn test_terminal_transition_hands_snapshot_to_sink() {
        let sink = RecordingSink::new();
        let scheduler = JobScheduler::new().with_sink(sink.clone());
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();
        advance(&scheduler, &id, &[JobState::Queued, JobState::Scheduled, JobState::Running]).await;
        scheduler
            .set_job_metrics(
                &id,
                &JobMetrics {
                    cpu_core_seconds: 14400,
                    wall_clock_seconds: 3600,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        scheduler.set_job_state(&id, JobState::Completed).await.unwrap();

        let snapshots = sink.snapshots.lock().await;
        assert_eq!(snapshots.len(), 1, "exactly one snapshot per terminal transition");
        assert_eq!(snapshots[0].job_id, id);
        assert_eq!(snapshots[0].state, JobState::Completed);
        assert_eq!(snapshots[0].metrics.cpu_core_seconds, 14400);
    }

    #[tokio::test]
    async fn test_cancelled_job_emits_partial_metrics() {
        let sink = RecordingSink::new();
        let scheduler = JobScheduler::new().with_sink(sink.clone());
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();
        advance(&scheduler, &id, &[JobState::Queued, JobState::Scheduled, JobState::Running]).await;
        scheduler
            .set_job_metrics(
                &id,
                &JobMetrics {
                    cpu_core_seconds: 900,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        scheduler.cancel(&id).await.unwrap();

        let snapshots = sink.snapshots.lock().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].state, JobState::Cancelled);
        assert_eq!(snapshots[0].metrics.cpu_core_seconds, 900, "partial runs still bill");
    }

    #[tokio::test]
    async fn test_duplicate_submit_rejected() {
        let scheduler = JobScheduler::new();
        let id = JobId::new("job-1");
        scheduler.submit(id.clone(), resources(), 7200).await.unwrap();
        let err = scheduler.submit(id, resources(), 7200).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(_)), "got {err}");
        assert_eq!(scheduler.job_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_errors() {
        let scheduler = JobScheduler::new();
        let id = JobId::new("ghost");
        assert!(matches!(
            scheduler.job_status(&id).await.unwrap_err(),
            SchedulerError::UnknownJob(_)
        ));
        assert!(matches!(
            scheduler.set_job_state(&id, JobState::Queued).await.unwrap_err(),
            SchedulerError::UnknownJob(_)
        ));
    }
}
