//! Settle-all fan-out of usage tasks.
use crate::metrics_defs::{PERSIST_FAILURES, TASK_OUTCOME};
use crate::outcome::{Outcome, TaskFailure};
use crate::persistence::record_outcome;
use crate::task::{QueryTask, Task};
use crate::upstream::UsageClient;
use directory::store::UsageStore;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One task's outcome and whether it reached the usage store.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskResult {
    pub outcome: Outcome,
    /// Set when recording the outcome failed. The outcome itself stands.
    pub persist_error: Option<String>,
}

/// Runs every task of a collection concurrently and waits for all of them.
///
/// A failing or panicking task never cancels its siblings. Results come back
/// in the order the tasks were given, whatever order they complete in.
#[derive(Clone)]
pub struct Executor {
    client: Arc<dyn UsageClient>,
    store: Arc<dyn UsageStore>,
    permits: Option<Arc<Semaphore>>,
}

impl Executor {
    pub fn new(
        client: Arc<dyn UsageClient>,
        store: Arc<dyn UsageStore>,
        max_concurrent_tasks: Option<usize>,
    ) -> Self {
        Executor {
            client,
            store,
            permits: max_concurrent_tasks.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    pub async fn run(&self, tasks: Vec<QueryTask>) -> Vec<TaskResult> {
        let mut join_set = JoinSet::new();
        // Maps tokio task ids back to their position in `tasks`
        let mut task_index = HashMap::with_capacity(tasks.len());
        let mut submitted: Vec<Task> = Vec::with_capacity(tasks.len());
        // Set once a task starts recording its outcome, so a panic past that
        // point is not recorded a second time
        let mut recording: Vec<Arc<AtomicBool>> = Vec::with_capacity(tasks.len());

        for (index, query_task) in tasks.into_iter().enumerate() {
            submitted.push(query_task.task.clone());
            let started = Arc::new(AtomicBool::new(false));
            recording.push(started.clone());

            let client = self.client.clone();
            let store = self.store.clone();
            let permits = self.permits.clone();

            let abort_handle = join_set.spawn(async move {
                let _permit = match permits {
                    Some(permits) => permits.acquire_owned().await.ok(),
                    None => None,
                };
                run_task(client.as_ref(), store.as_ref(), query_task, &started).await
            });
            task_index.insert(abort_handle.id(), index);
        }

        let mut slots: Vec<Option<TaskResult>> = submitted.iter().map(|_| None).collect();

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(index) = task_index.remove(&id) {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Usage task did not complete");
                    let Some(index) = task_index.remove(&e.id()) else {
                        continue;
                    };
                    let message = if e.is_panic() {
                        "Usage task panicked"
                    } else {
                        "Usage task was cancelled"
                    };
                    let outcome = Outcome::Failure {
                        task: submitted[index].clone(),
                        failure: TaskFailure::internal(message),
                    };
                    // Already counted before it started recording
                    let result = if recording[index].load(Ordering::SeqCst) {
                        counter!(PERSIST_FAILURES).increment(1);
                        TaskResult {
                            outcome,
                            persist_error: Some(
                                "Usage task failed while recording its outcome".into(),
                            ),
                        }
                    } else {
                        settle_detached(self.store.clone(), outcome).await
                    };
                    slots[index] = Some(result);
                }
            }
        }

        slots
            .into_iter()
            .zip(submitted)
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| TaskResult {
                    outcome: Outcome::Failure {
                        task,
                        failure: TaskFailure::internal("Usage task result was lost"),
                    },
                    persist_error: Some("Outcome was not recorded".into()),
                })
            })
            .collect()
    }
}

async fn run_task(
    client: &dyn UsageClient,
    store: &dyn UsageStore,
    query_task: QueryTask,
    recording: &AtomicBool,
) -> TaskResult {
    let QueryTask { task, api_key } = query_task;
    let result = client.query(&task.query(), &api_key).await;
    let outcome = Outcome::from_result(task, result);
    count_outcome(&outcome);
    recording.store(true, Ordering::SeqCst);
    persist(store, outcome).await
}

/// Records the outcome of a task that died before recording it. Runs on its
/// own task so a panicking store cannot take the whole collection down.
async fn settle_detached(store: Arc<dyn UsageStore>, outcome: Outcome) -> TaskResult {
    count_outcome(&outcome);
    let fallback = outcome.clone();
    match tokio::spawn(async move { persist(store.as_ref(), outcome).await }).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Recording a failed usage task did not complete");
            counter!(PERSIST_FAILURES).increment(1);
            TaskResult {
                outcome: fallback,
                persist_error: Some(format!("Outcome was not recorded: {e}")),
            }
        }
    }
}

fn count_outcome(outcome: &Outcome) {
    let task = outcome.task();
    match outcome {
        Outcome::Success { .. } => {
            counter!(TASK_OUTCOME, "status" => "succeeded").increment(1);
        }
        Outcome::Failure { failure, .. } => {
            tracing::warn!(
                tenant = %task.tenant.slug,
                project_id = %task.project_id,
                metric = %task.metric,
                kind = failure.kind.as_str(),
                status = ?failure.status,
                "Usage query failed: {}",
                failure.message
            );
            counter!(TASK_OUTCOME, "status" => "failed", "kind" => failure.kind.as_str())
                .increment(1);
        }
    }
}

async fn persist(store: &dyn UsageStore, outcome: Outcome) -> TaskResult {
    let task = outcome.task();
    let persist_error = match record_outcome(store, &outcome).await {
        Ok(()) => None,
        Err(e) => {
            tracing::error!(
                tenant = %task.tenant.slug,
                project_id = %task.project_id,
                metric = %task.metric,
                error = %e,
                "Failed to record usage outcome"
            );
            counter!(PERSIST_FAILURES).increment(1);
            Some(e.to_string())
        }
    };

    TaskResult {
        outcome,
        persist_error,
    }
}
