// Copyright 2026 Taxprobe Contributors
// SPDX-License-Identifier: Apache-2.0

//! Concurrent extraction orchestrator.
//!
//! Pulls tasks from a shared worklist with a bounded worker pool, paces
//! dispatches per site domain, retries transient faults with exponential
//! backoff, and records exactly one terminal result per task through the
//! result sink. Cancellation is cooperative and observed at task boundaries,
//! so a result already recorded is never lost or duplicated.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classify::{classify_failure, resolve, RetryPolicy};
use crate::driver::Driver;
use crate::events::{EventBus, RunEvent};
use crate::extract;
use crate::model::{
    ExtractedFields, ExtractionResult, ExtractionStatus, ExtractionTask, FieldNote,
    PropertyRecord, TargetField,
};
use crate::sink::ResultSink;
use crate::strategy::{StrategyRegistry, Transport};

/// Run-level knobs. Defaults match the pacing real county portals tolerate.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Maximum tasks in flight at once.
    pub concurrency: usize,
    /// Minimum interval between dispatches to the same site domain.
    pub domain_interval: Duration,
    /// Uniform retry policy; per-strategy overrides take precedence.
    pub retry: RetryPolicy,
    /// Only process records whose jurisdiction matches (case-insensitive
    /// substring).
    pub jurisdiction_filter: Option<String>,
    /// Cap on the number of tasks taken from the input.
    pub limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            domain_interval: Duration::from_millis(2_000),
            retry: RetryPolicy::default(),
            jurisdiction_filter: None,
            limit: None,
        }
    }
}

/// One line of the needs-review list.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub property_id: String,
    pub jurisdiction: String,
    pub status: ExtractionStatus,
}

/// Aggregate outcome of a run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub not_found: usize,
    pub parse_error: usize,
    pub timeout: usize,
    pub blocked: usize,
    /// Non-success outcomes, for operator follow-up.
    pub needs_review: Vec<ReviewItem>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl RunSummary {
    fn tally(&mut self, result: &ExtractionResult) {
        match result.extraction_status {
            ExtractionStatus::Success => self.success += 1,
            ExtractionStatus::NotFound => self.not_found += 1,
            ExtractionStatus::ParseError => self.parse_error += 1,
            ExtractionStatus::Timeout => self.timeout += 1,
            ExtractionStatus::Blocked => self.blocked += 1,
            ExtractionStatus::Pending | ExtractionStatus::InProgress => {}
        }
        if result.extraction_status != ExtractionStatus::Success {
            self.needs_review.push(ReviewItem {
                property_id: result.property_id.clone(),
                jurisdiction: result.jurisdiction.clone(),
                status: result.extraction_status,
            });
        }
    }
}

/// Per-domain dispatch pacing. Each acquisition advances the domain's
/// next-allowed instant by the interval, so N queued tasks on one domain
/// dispatch at least `interval` apart regardless of worker count.
struct DomainGate {
    interval: Duration,
    next_allowed: Mutex<HashMap<String, tokio::time::Instant>>,
}

impl DomainGate {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_allowed: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a dispatch slot for the domain, returning how long the caller
    /// must wait before proceeding.
    fn reserve(&self, domain: &str) -> Duration {
        let now = tokio::time::Instant::now();
        let mut map = match self.next_allowed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = map.entry(domain.to_string()).or_insert(now);
        let wait = slot.saturating_duration_since(now);
        *slot = (*slot).max(now) + self.interval;
        wait
    }
}

fn domain_of(record: &PropertyRecord) -> String {
    url::Url::parse(&record.lookup_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| record.lookup_url.clone())
}

struct WorkerCtx {
    browser: Arc<dyn Driver>,
    http: Arc<dyn Driver>,
    sink: Arc<dyn ResultSink>,
    bus: Arc<EventBus>,
    gate: Arc<DomainGate>,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
    worklist: Arc<Mutex<VecDeque<ExtractionTask>>>,
    summary: Arc<Mutex<RunSummary>>,
}

/// Drives a full extraction run.
pub struct Orchestrator {
    browser: Arc<dyn Driver>,
    http: Arc<dyn Driver>,
    sink: Arc<dyn ResultSink>,
    bus: Arc<EventBus>,
    config: RunConfig,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        browser: Arc<dyn Driver>,
        http: Arc<dyn Driver>,
        sink: Arc<dyn ResultSink>,
        bus: Arc<EventBus>,
        config: RunConfig,
    ) -> Self {
        Self {
            browser,
            http,
            sink,
            bus,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed at task boundaries; set it to stop the run after
    /// in-flight tasks finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Process every record to one terminal result each.
    pub async fn run(
        &self,
        records: Vec<PropertyRecord>,
        registry: &StrategyRegistry,
    ) -> anyhow::Result<RunSummary> {
        let started = std::time::Instant::now();

        let mut tasks: VecDeque<ExtractionTask> = records
            .into_iter()
            .filter(|r| match &self.config.jurisdiction_filter {
                Some(f) => r.jurisdiction.to_lowercase().contains(&f.to_lowercase()),
                None => true,
            })
            .map(|r| {
                let strategy = registry.lookup_record(&r);
                ExtractionTask::new(r, strategy)
            })
            .collect();
        if let Some(limit) = self.config.limit {
            tasks.truncate(limit);
        }
        let total = tasks.len();
        info!(total, concurrency = self.config.concurrency, "run started");
        self.bus.emit(RunEvent::RunStarted { total_tasks: total });

        let worklist = Arc::new(Mutex::new(tasks));
        let summary = Arc::new(Mutex::new(RunSummary {
            total,
            ..Default::default()
        }));
        let gate = Arc::new(DomainGate::new(self.config.domain_interval));

        let workers: Vec<_> = (0..self.config.concurrency.max(1))
            .map(|_| {
                let ctx = WorkerCtx {
                    browser: Arc::clone(&self.browser),
                    http: Arc::clone(&self.http),
                    sink: Arc::clone(&self.sink),
                    bus: Arc::clone(&self.bus),
                    gate: Arc::clone(&gate),
                    retry: self.config.retry,
                    cancel: Arc::clone(&self.cancel),
                    worklist: Arc::clone(&worklist),
                    summary: Arc::clone(&summary),
                };
                tokio::spawn(worker_loop(ctx))
            })
            .collect();
        for handle in workers {
            let _ = handle.await;
        }

        let cancelled = self.cancel.load(Ordering::Relaxed);
        let mut summary = recover_summary(
            Arc::try_unwrap(summary)
                .map_err(|_| anyhow::anyhow!("summary still shared after workers joined"))?,
        );
        summary.cancelled = cancelled;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        let completed = summary.success
            + summary.not_found
            + summary.parse_error
            + summary.timeout
            + summary.blocked;
        info!(completed, cancelled, "run completed");
        self.bus.emit(RunEvent::RunCompleted {
            completed,
            cancelled,
            total_ms: summary.duration_ms,
        });
        Ok(summary)
    }
}

/// Take the summary out of its lock, keeping the tallies even if a worker
/// panicked while holding it.
fn recover_summary(summary: Mutex<RunSummary>) -> RunSummary {
    summary
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn worker_loop(ctx: WorkerCtx) {
    loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            return;
        }
        let task = {
            let mut list = match ctx.worklist.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            list.pop_front()
        };
        let Some(mut task) = task else {
            return;
        };

        task.status = ExtractionStatus::InProgress;
        let result = process_task(&ctx, &mut task).await;

        if let Err(e) = ctx.sink.record(&result).await {
            warn!(property_id = %result.property_id, error = %e, "failed to record result");
        }
        ctx.bus.emit(RunEvent::TaskFinished {
            property_id: result.property_id.clone(),
            jurisdiction: result.jurisdiction.clone(),
            status: result.extraction_status,
            attempts: result.attempts,
            elapsed_ms: result.duration_ms,
        });
        if let Ok(mut summary) = ctx.summary.lock() {
            summary.tally(&result);
        }
    }
}

/// Run one task to a terminal result, retrying transient faults.
async fn process_task(ctx: &WorkerCtx, task: &mut ExtractionTask) -> ExtractionResult {
    let started = std::time::Instant::now();
    let record = &task.record;

    let Some(strategy) = task.strategy.clone() else {
        warn!(
            property_id = %record.property_id,
            jurisdiction = %record.jurisdiction,
            "no strategy registered"
        );
        return finish(
            task,
            ExtractedFields::default(),
            ExtractionStatus::Blocked,
            vec![FieldNote::new(
                TargetField::AmountDue,
                format!("no strategy registered for jurisdiction {:?}", record.jurisdiction),
            )],
            started,
        );
    };

    let policy = strategy.retry_policy(ctx.retry);
    let driver: &Arc<dyn Driver> = match strategy.transport {
        Transport::Browser => &ctx.browser,
        Transport::Http => &ctx.http,
    };
    let domain = domain_of(record);

    loop {
        task.attempts += 1;

        let wait = ctx.gate.reserve(&domain);
        if !wait.is_zero() {
            debug!(domain = %domain, wait_ms = wait.as_millis() as u64, "pacing dispatch");
            ctx.bus.emit(RunEvent::DomainDelayed {
                domain: domain.clone(),
                wait_ms: wait.as_millis() as u64,
            });
            tokio::time::sleep(wait).await;
        }

        ctx.bus.emit(RunEvent::TaskStarted {
            property_id: record.property_id.clone(),
            jurisdiction: record.jurisdiction.clone(),
            attempt: task.attempts,
        });

        // Fresh session per attempt; never reused across tasks.
        let attempt_outcome = match driver.new_session().await {
            Ok(mut session) => {
                let outcome = extract::extract(session.as_mut(), &strategy, record).await;
                if let Err(e) = session.close().await {
                    warn!(property_id = %record.property_id, error = %e, "session close failed");
                }
                outcome
            }
            Err(e) => Err(e.into()),
        };

        match attempt_outcome {
            Ok(raw) => {
                let (fields, status, notes) = resolve(&raw, &strategy.required);
                return finish(task, fields, status, notes, started);
            }
            Err(failure) => {
                let (status, retryable) = classify_failure(&failure);
                if retryable && policy.allows_retry(task.attempts) {
                    let backoff = policy.backoff(task.attempts);
                    warn!(
                        property_id = %record.property_id,
                        attempt = task.attempts,
                        error = %failure,
                        backoff_ms = backoff.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                warn!(
                    property_id = %record.property_id,
                    attempts = task.attempts,
                    status = %status,
                    error = %failure,
                    "task failed"
                );
                return finish(
                    task,
                    ExtractedFields::default(),
                    status,
                    vec![FieldNote::new(TargetField::AmountDue, failure.to_string())],
                    started,
                );
            }
        }
    }
}

fn finish(
    task: &mut ExtractionTask,
    fields: ExtractedFields,
    status: ExtractionStatus,
    notes: Vec<FieldNote>,
    started: std::time::Instant,
) -> ExtractionResult {
    task.status = status;
    ExtractionResult {
        property_id: task.record.property_id.clone(),
        jurisdiction: task.record.jurisdiction.clone(),
        fields,
        extraction_status: status,
        notes,
        attempts: task.attempts,
        last_extraction_timestamp: Utc::now(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
