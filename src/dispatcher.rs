//! Bounded-concurrency batch dispatch.
//!
//! The dispatch loop admits prompts from the backlog into a [`JoinSet`] until
//! `max_concurrency` jobs are in flight, then waits for any one of them to
//! finish and refills. Workers own copies of their inputs and hand back a
//! [`JobResult`]; only the loop touches the in-flight set, the completed list
//! and the tracker.

use crate::client::ChatClient;
use crate::config::BatchConfig;
use crate::error::{RelayError, Result};
use crate::job::{JobResult, PromptJob};
use crate::progress::{NoProgress, ProgressObserver, ProgressReporter};
use crate::request::GenerateOptions;
use crate::tracker::{BatchSummary, BatchTracker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Runs batches of prompts against a [`ChatClient`].
pub struct Dispatcher {
    client: Arc<dyn ChatClient>,
    config: BatchConfig,
}

/// Results of a batch, sorted by input index, with aggregate statistics.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One result per attempted prompt, in input order.
    pub results: Vec<JobResult>,
    /// Counts and timing.
    pub summary: BatchSummary,
}

impl BatchOutcome {
    /// Outcome of a batch with no prompts.
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            summary: BatchSummary::empty(),
        }
    }

    /// Whether every prompt was attempted and succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.summary.attempted == self.summary.total && self.summary.failure_count == 0
    }

    /// Failed results.
    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

impl Dispatcher {
    /// Create a dispatcher. The configuration is validated here.
    pub fn new(client: Arc<dyn ChatClient>, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { client, config })
    }

    /// The batch configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Check that the server is reachable and serves the configured model.
    pub async fn preflight(&self) -> Result<()> {
        let models = self.client.list_models().await?;
        if models.is_empty() {
            return Err(RelayError::Connectivity(
                "server reported no available models".to_string(),
            ));
        }

        if !models.iter().any(|m| m.matches(&self.config.model)) {
            let available = models
                .iter()
                .map(|m| m.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(RelayError::ModelValidation {
                model: self.config.model.clone(),
                available,
            });
        }

        Ok(())
    }

    /// Run a batch, drawing a progress bar if the configuration asks for one.
    pub async fn run(&self, prompts: &[String]) -> Result<BatchOutcome> {
        if self.config.show_progress {
            let mut reporter = ProgressReporter::new();
            self.run_with_observer(prompts, &mut reporter).await
        } else {
            self.run_with_observer(prompts, &mut NoProgress).await
        }
    }

    /// Run a batch, reporting progress to `observer`.
    ///
    /// Returns every result sorted by input index. When `continue_on_error`
    /// is off, the first failure cancels the jobs still in flight and the
    /// call returns [`RelayError::BatchAborted`] carrying the results
    /// collected so far.
    pub async fn run_with_observer(
        &self,
        prompts: &[String],
        observer: &mut dyn ProgressObserver,
    ) -> Result<BatchOutcome> {
        if prompts.is_empty() {
            debug!("Empty batch, nothing to dispatch");
            return Ok(BatchOutcome::empty());
        }

        self.preflight().await?;
        self.dispatch(prompts, observer).await
    }

    async fn dispatch(
        &self,
        prompts: &[String],
        observer: &mut dyn ProgressObserver,
    ) -> Result<BatchOutcome> {
        let total = prompts.len();
        let options = self.config.generate_options();
        let mut state = DispatchState::new(prompts);
        let mut tracker = BatchTracker::new(total);

        info!(
            total,
            model = %self.config.model,
            max_concurrency = self.config.max_concurrency,
            continue_on_error = self.config.continue_on_error,
            "Starting batch"
        );
        observer.on_start(total);

        loop {
            while state.in_flight.len() < self.config.max_concurrency {
                let Some(job) = state.next_job() else { break };
                debug!(index = job.index, "Dispatching prompt");
                state.spawn(
                    job,
                    Arc::clone(&self.client),
                    options.clone(),
                    self.config.timeout,
                );
            }

            let Some(joined) = state.in_flight.join_next().await else {
                break;
            };
            let Some(result) = state.resolve(joined) else {
                continue;
            };

            let progress = tracker.record(&result);
            observer.on_progress(progress, &result);

            if !result.is_success() && !self.config.continue_on_error {
                let index = result.index();
                let message = result.error().unwrap_or_default().to_string();
                warn!(index, error = %message, "Prompt failed, aborting batch");

                state.completed.push(result);
                state.abort(&mut tracker, observer).await;

                let partial = state.finish(tracker.summary());
                observer.on_finish(&partial.summary);
                info!(summary = %partial.summary.summary_line(), "Batch aborted");

                return Err(RelayError::BatchAborted {
                    index,
                    message,
                    partial: Box::new(partial),
                });
            }

            if let Some(error) = result.error() {
                warn!(index = result.index(), error, "Prompt failed, continuing");
            }
            state.completed.push(result);
        }

        let outcome = state.finish(tracker.summary());
        observer.on_finish(&outcome.summary);
        info!(summary = %outcome.summary.summary_line(), "Batch complete");

        Ok(outcome)
    }
}

/// Mutable state of one batch, owned by the dispatch loop.
struct DispatchState<'a> {
    prompts: &'a [String],
    /// Next input index not yet dispatched.
    pending_index: usize,
    in_flight: JoinSet<JobResult>,
    /// In-flight jobs by task, so a panicking worker can still be reported.
    jobs: HashMap<TaskId, PromptJob>,
    completed: Vec<JobResult>,
}

impl<'a> DispatchState<'a> {
    fn new(prompts: &'a [String]) -> Self {
        Self {
            prompts,
            pending_index: 0,
            in_flight: JoinSet::new(),
            jobs: HashMap::new(),
            completed: Vec::with_capacity(prompts.len()),
        }
    }

    fn next_job(&mut self) -> Option<PromptJob> {
        let prompt = self.prompts.get(self.pending_index)?;
        let job = PromptJob::new(self.pending_index, prompt.clone());
        self.pending_index += 1;
        Some(job)
    }

    fn spawn(
        &mut self,
        job: PromptJob,
        client: Arc<dyn ChatClient>,
        options: GenerateOptions,
        timeout: Duration,
    ) {
        let handle = self
            .in_flight
            .spawn(run_job(client, job.clone(), options, timeout));
        self.jobs.insert(handle.id(), job);
    }

    /// Turn a joined task into a result. Cancelled tasks yield nothing.
    fn resolve(&mut self, joined: std::result::Result<JobResult, JoinError>) -> Option<JobResult> {
        match joined {
            Ok(result) => {
                self.jobs.retain(|_, job| job.index != result.index());
                Some(result)
            }
            Err(join_err) if join_err.is_panic() => {
                error!("Batch worker panicked: {join_err}");
                self.jobs
                    .remove(&join_err.id())
                    .map(|job| JobResult::failed(job, format!("worker panicked: {join_err}")))
            }
            Err(join_err) => {
                self.jobs.remove(&join_err.id());
                None
            }
        }
    }

    /// Cancel everything still in flight and wait until every task is gone.
    ///
    /// Jobs that finished before the cancellation reached them are kept.
    async fn abort(&mut self, tracker: &mut BatchTracker, observer: &mut dyn ProgressObserver) {
        let cancelled = self.in_flight.len();
        self.in_flight.abort_all();

        while let Some(joined) = self.in_flight.join_next().await {
            if let Some(result) = self.resolve(joined) {
                let progress = tracker.record(&result);
                observer.on_progress(progress, &result);
                self.completed.push(result);
            }
        }

        debug!(
            cancelled,
            never_dispatched = self.prompts.len() - self.pending_index,
            "In-flight jobs reaped"
        );
    }

    fn finish(self, summary: BatchSummary) -> BatchOutcome {
        let mut results = self.completed;
        results.sort_by_key(JobResult::index);
        BatchOutcome { results, summary }
    }
}

/// Worker body: exactly one request, every failure folded into the result.
async fn run_job(
    client: Arc<dyn ChatClient>,
    job: PromptJob,
    options: GenerateOptions,
    timeout: Duration,
) -> JobResult {
    let outcome = tokio::time::timeout(timeout, client.complete(&job.prompt, &options)).await;

    match outcome {
        Ok(Ok(completion)) => {
            let server_duration = completion.server_duration();
            JobResult::succeeded(job, completion.response, server_duration)
        }
        Ok(Err(e)) => JobResult::failed(job, e.to_string()),
        Err(_) => JobResult::failed(job, RelayError::Timeout { after: timeout }.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_job_walks_backlog_in_order() {
        let prompts = vec!["A".to_string(), "B".to_string()];
        let mut state = DispatchState::new(&prompts);

        let first = state.next_job().unwrap();
        let second = state.next_job().unwrap();

        assert_eq!((first.index, first.prompt.as_str()), (0, "A"));
        assert_eq!((second.index, second.prompt.as_str()), (1, "B"));
        assert!(state.next_job().is_none());
        assert_eq!(state.pending_index, 2);
    }

    #[test]
    fn test_finish_sorts_by_index() {
        let prompts = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let mut state = DispatchState::new(&prompts);
        for index in [2, 0, 1] {
            let job = PromptJob::new(index, prompts[index].clone());
            state.completed.push(JobResult::succeeded(job, "ok".into(), None));
        }

        let outcome = state.finish(BatchSummary::empty());
        let indices: Vec<usize> = outcome.results.iter().map(JobResult::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_outcome() {
        let outcome = BatchOutcome::empty();
        assert!(outcome.results.is_empty());
        assert!(outcome.all_succeeded());
        assert_eq!(outcome.failures().count(), 0);
    }
}
