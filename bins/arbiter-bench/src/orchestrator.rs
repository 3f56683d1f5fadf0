/// Batch Orchestrator - Concurrent Generation Runs
///
/// **Core Responsibility:**
/// Drive every planned batch through the generation client concurrently,
/// retry transient failures with backoff, and merge partial results into
/// one response map.
///
/// **Partial-Failure Semantics:**
/// A batch that exhausts its retries is marked failed and its error
/// captured; the other batches are unaffected. Partial success is the
/// normal case - the run only fails outright when planning is invalid or
/// every single batch failed.
///
/// **Ordering:**
/// Batches settle in arbitrary order. The merged map is the union of the
/// successful batches' responses; nothing here assumes completion order.
use crate::client::{GenerationClient, GenerationRequest};
use crate::planner;
use arbiter_common::error::{OrchestratorError, PlanningError};
use arbiter_common::progress::{ProgressEvent, ProgressSink};
use arbiter_common::retry::RetryPolicy;
use arbiter_common::types::{BatchJob, BatchState, BatchStatus, RunResult, TestCase};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub custom_batch_sizes: Option<Vec<usize>>,
    /// Generation calls in flight at once. I/O bound, so this runs well
    /// above the scoring pool size.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            batch_size: 45,
            custom_batch_sizes: None,
            concurrency: 20,
            retry: RetryPolicy::default(),
            temperature: 0.1,
            max_tokens: 8192,
        }
    }
}

/// State shared by the batch workers of one run: the status map the
/// progress events snapshot, the settled-test and failed-batch counters,
/// and the event channel. Workers only ever write through the methods
/// below; the response map is merged in the single collecting task.
struct RunState {
    statuses: Mutex<BTreeMap<u32, BatchStatus>>,
    completed_tests: AtomicUsize,
    failed_batches: AtomicU32,
    total_tests: usize,
    num_batches: u32,
    events: mpsc::UnboundedSender<ProgressEvent>,
}

impl RunState {
    fn set_status(&self, number: u32, state: BatchState, retry: u32, max_retries: u32) {
        let mut statuses = self
            .statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        statuses.insert(
            number,
            BatchStatus {
                state,
                retry,
                max_retries,
            },
        );
    }

    fn emit(&self, batch_num: u32, message: String) {
        let batch_statuses = self
            .statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        // The receiver outlives the run; a send can only fail on shutdown
        let _ = self.events.send(ProgressEvent {
            completed: self.completed_tests.load(Ordering::SeqCst),
            total: self.total_tests,
            message,
            batch_num,
            num_batches: self.num_batches,
            failed: self.failed_batches.load(Ordering::SeqCst),
            batch_statuses,
        });
    }
}

/// Runs benchmark generation end to end: plan, generate concurrently,
/// merge.
pub struct BatchOrchestrator {
    client: Arc<dyn GenerationClient>,
    config: OrchestratorConfig,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<dyn GenerationClient>, config: OrchestratorConfig) -> Self {
        BatchOrchestrator { client, config }
    }

    /// Run all batches for `tests` against `model` and merge the results.
    ///
    /// Progress events flow through a channel to a single forwarder task,
    /// which invokes `sink`; emission order is preserved and the forwarder
    /// is drained before this function returns.
    pub async fn run(
        &self,
        model: &str,
        doc_content: &str,
        tests: &[TestCase],
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunResult, OrchestratorError> {
        let batches = planner::plan(
            tests,
            self.config.batch_size,
            self.config.custom_batch_sizes.as_deref(),
        )?;
        let num_batches = batches.len() as u32;

        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.on_event(event);
            }
        });

        let statuses: BTreeMap<u32, BatchStatus> = batches
            .iter()
            .map(|b| (b.number, BatchStatus::pending(self.config.retry.max_retries)))
            .collect();
        let state = Arc::new(RunState {
            statuses: Mutex::new(statuses),
            completed_tests: AtomicUsize::new(0),
            failed_batches: AtomicU32::new(0),
            total_tests: tests.len(),
            num_batches,
            events: tx,
        });

        info!(
            model,
            num_batches,
            total_tests = tests.len(),
            concurrency = self.config.concurrency,
            "Starting orchestrated run"
        );
        state.emit(0, format!("Running {} batches in parallel", num_batches));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut futures = FuturesUnordered::new();
        for batch in batches {
            futures.push(run_batch(
                Arc::clone(&self.client),
                model.to_string(),
                doc_content.to_string(),
                batch,
                self.config.temperature,
                self.config.max_tokens,
                self.config.retry,
                Arc::clone(&state),
                Arc::clone(&semaphore),
            ));
        }

        let mut responses: HashMap<String, String> = HashMap::new();
        let mut errors: Vec<String> = Vec::new();
        let mut settled = 0u32;
        while let Some((number, batch_len, outcome)) = futures.next().await {
            settled += 1;
            match outcome {
                Ok(batch_responses) => {
                    responses.extend(batch_responses);
                    state.completed_tests.fetch_add(batch_len, Ordering::SeqCst);
                }
                Err(message) => {
                    state.failed_batches.fetch_add(1, Ordering::SeqCst);
                    errors.push(format!("Batch {}: {}", number, message));
                }
            }
            state.emit(number, format!("Batch {}/{}", settled, num_batches));
        }

        let failed_batches = state.failed_batches.load(Ordering::SeqCst);
        let final_message = if failed_batches > 0 {
            format!("Completed | Failed: {}", failed_batches)
        } else {
            "Completed".to_string()
        };
        state.emit(0, final_message);

        // Dropping the last sender ends the forwarder once the queue drains,
        // so every event reaches the sink before the result is returned
        drop(state);
        let _ = forwarder.await;

        if responses.is_empty() {
            return Err(OrchestratorError::NoResponses { errors });
        }

        let run_id = format!(
            "{}-{}",
            model.replace('/', "-"),
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        );

        info!(
            run_id = %run_id,
            num_responses = responses.len(),
            failed_batches,
            "Run complete"
        );

        Ok(RunResult {
            run_id,
            model: model.to_string(),
            num_responses: responses.len(),
            responses,
            failed_batches,
            errors,
        })
    }

    /// Regenerate a single batch by number with the same planning
    /// parameters. Failure here is fatal - there is no partial result to
    /// fall back to.
    pub async fn rerun_batch(
        &self,
        model: &str,
        doc_content: &str,
        tests: &[TestCase],
        batch_num: u32,
    ) -> Result<HashMap<String, String>, OrchestratorError> {
        let batches = planner::plan(
            tests,
            self.config.batch_size,
            self.config.custom_batch_sizes.as_deref(),
        )?;
        let batch = batches
            .into_iter()
            .find(|b| b.number == batch_num)
            .ok_or_else(|| {
                PlanningError(format!("Batch {} is empty or out of range", batch_num))
            })?;

        let request = GenerationRequest {
            model: model.to_string(),
            doc_content: doc_content.to_string(),
            tests: batch.tests,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let policy = self.config.retry;
        let mut last_error = String::new();
        for retry in 0..=policy.max_retries {
            if retry > 0 {
                tokio::time::sleep(policy.delay_for(retry)).await;
            }
            match self.client.generate(&request).await {
                Ok(responses) => return Ok(responses),
                Err(e) => {
                    let transient = e.is_transient();
                    last_error = e.to_string();
                    if !transient {
                        break;
                    }
                    warn!(batch = batch_num, retry, error = %last_error, "Retrying batch");
                }
            }
        }

        Err(OrchestratorError::BatchFailed {
            number: batch_num,
            message: last_error,
        })
    }
}

/// Drive one batch through its retry loop. Returns the batch number, its
/// test count, and either the response map or the final error message.
#[allow(clippy::too_many_arguments)]
async fn run_batch(
    client: Arc<dyn GenerationClient>,
    model: String,
    doc_content: String,
    batch: BatchJob,
    temperature: f64,
    max_tokens: u32,
    policy: RetryPolicy,
    state: Arc<RunState>,
    semaphore: Arc<Semaphore>,
) -> (u32, usize, Result<HashMap<String, String>, String>) {
    let number = batch.number;
    let batch_len = batch.tests.len();

    let _permit = semaphore
        .acquire_owned()
        .await
        .expect("generation semaphore closed");

    let request = GenerationRequest {
        model,
        doc_content,
        tests: batch.tests,
        temperature,
        max_tokens,
    };

    for retry in 0..=policy.max_retries {
        state.set_status(number, BatchState::Running, retry, policy.max_retries);
        state.emit(number, format!("Batch {} running", number));
        if retry > 0 {
            tokio::time::sleep(policy.delay_for(retry)).await;
        }

        match client.generate(&request).await {
            Ok(responses) => {
                state.set_status(number, BatchState::Completed, retry, policy.max_retries);
                state.emit(number, format!("Batch {} completed", number));
                return (number, batch_len, Ok(responses));
            }
            Err(e) => {
                if e.is_transient() && retry < policy.max_retries {
                    warn!(batch = number, retry, error = %e, "Transient generation failure, retrying");
                    continue;
                }
                state.set_status(number, BatchState::Failed, retry, policy.max_retries);
                state.emit(number, format!("Batch {} failed", number));
                return (number, batch_len, Err(e.to_string()));
            }
        }
    }

    (number, batch_len, Err("Unknown error".to_string()))
}
