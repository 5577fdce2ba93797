//! Bounded fan-out of agent invocations within one tick.
//!
//! Units run as independent tokio tasks behind a counting semaphore. Each unit
//! owns its inputs; nothing mutable is shared. Results come back in input
//! order regardless of completion order, so the caller can serialize all
//! promotion writes after fan-in.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AttemptOutcome, ComponentContract, ComponentId, ContractTestSuite, ImplementationAttempt,
    TestRun,
};
use crate::domain::ports::{AgentBackend, CapabilityError, ImplementationReport, ImplementationRequest};

/// What happened to one dispatched unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitResult<T> {
    Finished(T),
    /// The invocation boundary hit the per-attempt timeout.
    TimedOut { elapsed_ms: u64 },
    /// A stop request arrived before the unit started.
    Skipped,
    /// The unit's task panicked or was aborted.
    Crashed(String),
}

/// Result of one implementation unit.
pub type AttemptUnit = UnitResult<Result<ImplementationReport, CapabilityError>>;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_concurrency: usize,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(max_concurrency: usize, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            timeout,
            cancel,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a stop request has arrived.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `work` over every item with at most `max_concurrency` in flight.
    pub async fn fan_out<I, F, Fut, T>(&self, items: Vec<I>, work: F) -> DomainResult<Vec<UnitResult<T>>>
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DomainError::BackendError("dispatch semaphore closed".to_string()))?;

            if self.cancel.is_cancelled() {
                drop(permit);
                handles.push(None);
                continue;
            }

            let work = work.clone();
            let timeout = self.timeout;
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                match tokio::time::timeout(timeout, work(item)).await {
                    Ok(value) => UnitResult::Finished(value),
                    Err(_) => UnitResult::TimedOut {
                        elapsed_ms: elapsed_ms(started),
                    },
                }
            });
            handles.push(Some(handle));
        }

        let results = join_all(handles.into_iter().map(|handle| async move {
            match handle {
                None => UnitResult::Skipped,
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => UnitResult::Crashed(e.to_string()),
                },
            }
        }))
        .await;
        Ok(results)
    }

    /// Dispatch implementation attempts, each in its own workspace.
    pub async fn run_attempts(
        &self,
        backend: Arc<dyn AgentBackend>,
        jobs: Vec<AttemptJob>,
    ) -> DomainResult<Vec<(AttemptJob, AttemptUnit)>> {
        let inputs: Vec<(AttemptJob, Arc<dyn AgentBackend>)> =
            jobs.iter().cloned().map(|job| (job, backend.clone())).collect();

        let results = self
            .fan_out(inputs, |(job, backend)| async move {
                prepare_workspace(&job.workspace).await?;
                backend.implement(job.into_request()).await
            })
            .await?;

        Ok(jobs.into_iter().zip(results).collect())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

async fn prepare_workspace(path: &Path) -> Result<(), CapabilityError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| CapabilityError::new(format!("workspace {}: {e}", path.display())))
}

/// One implementation attempt to dispatch.
#[derive(Debug, Clone)]
pub struct AttemptJob {
    pub run_id: Uuid,
    pub attempt_id: Uuid,
    pub component_id: ComponentId,
    pub contract: ComponentContract,
    pub suite: ContractTestSuite,
    pub context: Option<String>,
    pub workspace: PathBuf,
    pub round: u32,
    pub slot: usize,
}

impl AttemptJob {
    /// Workspace of one attempt: `<root>/<run>/<component>/<attempt>`.
    pub fn workspace_for(root: &Path, run_id: Uuid, component_id: &str, attempt_id: Uuid) -> PathBuf {
        root.join(run_id.to_string())
            .join(component_id)
            .join(attempt_id.to_string())
    }

    fn into_request(self) -> ImplementationRequest {
        ImplementationRequest {
            run_id: self.run_id,
            attempt_id: self.attempt_id,
            contract: self.contract,
            suite: self.suite,
            context: self.context,
            workspace: self.workspace,
            round: self.round,
            slot: self.slot,
        }
    }

    /// Turn the unit result into an immutable attempt record.
    ///
    /// Returns `None` for skipped units, which never started. Timed-out units
    /// are charged `timeout_charge`. Failed invocations are attributed to
    /// `backend_name`.
    pub fn into_attempt(
        self,
        result: AttemptUnit,
        submission_order: u64,
        timeout_charge: f64,
        backend_name: &str,
    ) -> Option<ImplementationAttempt> {
        let base = |agent: String, cost_usd: f64, duration_ms: u64, outcome: AttemptOutcome| {
            ImplementationAttempt {
                id: self.attempt_id,
                component_id: self.component_id.clone(),
                contract_version: self.contract.version.clone(),
                agent,
                artifact: None,
                tests: TestRun::default(),
                cost_usd,
                duration_ms,
                outcome,
                submission_order,
                round: self.round,
                notes: None,
                recorded_at: Utc::now(),
            }
        };

        match result {
            UnitResult::Skipped => None,
            UnitResult::Finished(Ok(report)) => {
                let outcome = if report.tests.all_passed() {
                    AttemptOutcome::Passed
                } else {
                    AttemptOutcome::TestFailure
                };
                let mut attempt = base(report.agent, report.cost_usd, report.duration_ms, outcome);
                attempt.artifact = report.artifact;
                attempt.tests = report.tests;
                attempt.notes = report.notes;
                Some(attempt)
            }
            UnitResult::Finished(Err(err)) => Some(base(
                backend_name.to_string(),
                err.cost_usd,
                err.duration_ms,
                AttemptOutcome::InvocationFailure {
                    message: err.message,
                },
            )),
            UnitResult::TimedOut { elapsed_ms } => Some(base(
                backend_name.to_string(),
                timeout_charge,
                elapsed_ms,
                AttemptOutcome::Timeout,
            )),
            UnitResult::Crashed(message) => Some(base(
                backend_name.to_string(),
                0.0,
                0,
                AttemptOutcome::InvocationFailure { message },
            )),
        }
    }
}
