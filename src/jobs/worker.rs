//! Queue Workers
//!
//! One consumer loop per queue claims due jobs up to the queue's concurrency
//! limit. Repeatable queues get a scheduler loop that enqueues their job on a
//! fixed interval. Everything stops when the shutdown signal flips.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::time::interval;

use super::queue::{Job, JobData, JobStore, QueueName, Retry};
use crate::common::SupplierError;
use crate::events::{BridgeEvent, Print};
use crate::logging::log_queue_event;
use crate::poller::EventPoller;
use crate::processors::{ProcessOutcome, SwapProcessor, SweepReport};

/// How often consumers look for due jobs
pub const DEFAULT_CLAIM_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one synchronous poll-and-process pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub events: usize,
    pub outcomes: Vec<ProcessOutcome>,
    /// Events whose processing errored and will be seen again next pass
    pub errors: usize,
    pub sweep: SweepReport,
    pub last_seen_txid: Option<String>,
}

/// Routes jobs from the durable queues to the swap processors
pub struct Orchestrator {
    jobs: JobStore,
    processor: SwapProcessor,
    poller: EventPoller,
    claim_interval: Duration,
}

impl Orchestrator {
    pub fn new(jobs: JobStore, processor: SwapProcessor) -> Self {
        let poller = EventPoller::new(processor.stacks().clone());
        Self {
            jobs,
            processor,
            poller,
            claim_interval: DEFAULT_CLAIM_INTERVAL,
        }
    }

    pub fn with_poller(mut self, poller: EventPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_claim_interval(mut self, every: Duration) -> Self {
        self.claim_interval = every;
        self
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn processor(&self) -> &SwapProcessor {
        &self.processor
    }

    /// Run one job to completion
    pub async fn handle(&self, job: &Job) -> Result<serde_json::Value, SupplierError> {
        match job.queue {
            QueueName::EventsCron => self.poll_events().await,
            QueueName::Events => self.dispatch(job_event(job)?).await,
            QueueName::FinalizeInbound => match &job_event(job)?.print {
                Print::FinalizeInbound(print) => {
                    to_json(&self.processor.process_finalize_inbound(print).await?)
                }
                other => Err(wrong_print(job, other)),
            },
            QueueName::SendOutbound => match &job_event(job)?.print {
                Print::InitiateOutbound(print) => {
                    to_json(&self.processor.process_initiate_outbound(print).await?)
                }
                other => Err(wrong_print(job, other)),
            },
            QueueName::FinalizeOutbound => to_json(&self.processor.process_pending_outbounds().await?),
            QueueName::BalanceCheck => to_json(&self.processor.report_balances().await?),
        }
    }

    /// Enqueue every new bridge event, then advance the cursor
    async fn poll_events(&self) -> Result<serde_json::Value, SupplierError> {
        let store = self.processor.store();
        let cursor = store.last_seen_txid().await?;
        let result = self.poller.poll(cursor.as_deref()).await?;

        for event in result.in_chain_order() {
            self.jobs
                .enqueue(QueueName::Events, &JobData::event(event.clone()))
                .await?;
        }
        if let Some(next) = result.next_cursor() {
            store.set_last_seen_txid(next).await?;
        }

        if !result.events.is_empty() {
            tracing::info!(new_events = result.events.len(), "Queued new bridge events");
        }
        Ok(serde_json::json!({
            "new_events": result.events.len(),
            "last_seen_txid": result.next_cursor().map(str::to_string).or(cursor),
        }))
    }

    async fn dispatch(&self, event: BridgeEvent) -> Result<serde_json::Value, SupplierError> {
        let topic = event.topic();
        let target = match &event.print {
            Print::FinalizeInbound(_) => Some(QueueName::FinalizeInbound),
            Print::InitiateOutbound(_) => Some(QueueName::SendOutbound),
            Print::Escrow(_)
            | Print::RevokeInbound(_)
            | Print::FinalizeOutbound(_)
            | Print::RevokeOutbound(_) => None,
        };
        if let Some(queue) = target {
            let id = self.jobs.enqueue(queue, &JobData::event(event)).await?;
            tracing::debug!(%queue, job_id = id, topic, "Dispatched bridge event");
        }
        Ok(serde_json::json!({
            "topic": topic,
            "queue": target.map(|q| q.as_str()),
        }))
    }

    async fn run_job(&self, mut job: Job) {
        let queue = job.queue.as_str();
        let job_id = job.id.to_string();
        let started = Instant::now();
        log_queue_event(queue, &job_id, "active", job.attempts, None, None);

        let result = self.handle(&job).await;
        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                if let Err(e) = self.jobs.complete(job.id).await {
                    tracing::error!(queue, job_id = %job_id, error = %e, "Could not mark job completed");
                }
                tracing::debug!(queue, job_id = %job_id, result = %value, "Job result");
                log_queue_event(queue, &job_id, "completed", job.attempts, Some(elapsed), None);
            }
            Err(e) => {
                if !e.is_retryable() {
                    job.attempts = job.max_attempts;
                }
                let message = e.to_string();
                log_queue_event(queue, &job_id, "failed", job.attempts, Some(elapsed), Some(&message));
                match self.jobs.fail(&job, &message).await {
                    Ok(Retry::Scheduled(at)) => {
                        tracing::debug!(queue, job_id = %job_id, run_at = at, "Job rescheduled");
                    }
                    Ok(Retry::Exhausted) => {
                        tracing::error!(
                            queue,
                            job_id = %job_id,
                            attempts = job.attempts,
                            code = e.error_code(),
                            payload = %serde_json::to_string(&job.data).unwrap_or_default(),
                            "Job gave up, needs manual reconciliation"
                        );
                    }
                    Err(qe) => {
                        tracing::error!(queue, job_id = %job_id, error = %qe, "Could not record job failure");
                    }
                }
            }
        }
    }

    /// Run every queue until `shutdown` turns true
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<(), SupplierError> {
        let recovered = self.jobs.recover_active().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Returned interrupted jobs to their queues");
        }

        let mut tasks = Vec::new();
        for queue in QueueName::ALL {
            tasks.push(tokio::spawn(self.clone().consume(queue, shutdown.clone())));
            if let Some(every) = queue.policy().repeat_every {
                tasks.push(tokio::spawn(self.clone().schedule(queue, every, shutdown.clone())));
            }
        }
        tracing::info!(queues = QueueName::ALL.len(), "Worker started");

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker stopped");
        Ok(())
    }

    async fn consume(self: Arc<Self>, queue: QueueName, mut shutdown: watch::Receiver<bool>) {
        let concurrency = queue.policy().concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut ticker = interval(self.claim_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            while let Ok(permit) = permits.clone().try_acquire_owned() {
                match self.jobs.claim(queue).await {
                    Ok(Some(job)) => {
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.run_job(job).await;
                            drop(permit);
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(%queue, error = %e, "Failed to claim job");
                        break;
                    }
                }
            }
        }

        // let in-flight jobs finish
        if permits.acquire_many(concurrency as u32).await.is_err() {
            tracing::warn!(%queue, "Queue permits closed before drain");
        }
        tracing::debug!(%queue, "Consumer stopped");
    }

    async fn schedule(
        self: Arc<Self>,
        queue: QueueName,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            match self.jobs.enqueue_repeat(queue).await {
                Ok(Some(id)) => tracing::debug!(%queue, job_id = id, "Scheduled repeat job"),
                Ok(None) => tracing::debug!(%queue, "Previous repeat job still waiting"),
                Err(e) => tracing::error!(%queue, error = %e, "Failed to schedule repeat job"),
            }
        }
    }

    /// Poll once, process each new event in chain order, sweep pending
    /// finalizations, then advance the cursor.
    pub async fn process_once(&self) -> Result<PassReport, SupplierError> {
        let store = self.processor.store();
        let cursor = store.last_seen_txid().await?;
        let result = self.poller.poll(cursor.as_deref()).await?;

        let mut report = PassReport {
            events: result.events.len(),
            ..Default::default()
        };
        for event in result.in_chain_order() {
            match self.process_event(event).await {
                Ok(Some(outcome)) => report.outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        txid = %event.txid,
                        topic = event.topic(),
                        error = %e,
                        "Error processing event"
                    );
                    report.errors += 1;
                }
            }
        }

        report.sweep = self.processor.process_pending_outbounds().await?;

        report.last_seen_txid = cursor;
        if report.errors == 0 {
            if let Some(next) = result.next_cursor() {
                store.set_last_seen_txid(next).await?;
                report.last_seen_txid = Some(next.to_string());
            }
        }
        Ok(report)
    }

    async fn process_event(&self, event: &BridgeEvent) -> Result<Option<ProcessOutcome>, SupplierError> {
        let outcome = match &event.print {
            Print::FinalizeInbound(print) => self.processor.process_finalize_inbound(print).await?,
            Print::InitiateOutbound(print) => self.processor.process_initiate_outbound(print).await?,
            _ => return Ok(None),
        };
        Ok(Some(outcome))
    }
}

fn job_event(job: &Job) -> Result<BridgeEvent, SupplierError> {
    job.data
        .event
        .clone()
        .ok_or_else(|| SupplierError::internal(format!("{} job {} has no event", job.queue, job.id)))
}

fn wrong_print(job: &Job, print: &Print) -> SupplierError {
    SupplierError::internal(format!(
        "{} job {} carries a {} event",
        job.queue,
        job.id,
        print.topic()
    ))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, SupplierError> {
    serde_json::to_value(value).map_err(|e| SupplierError::internal(e.to_string()))
}
