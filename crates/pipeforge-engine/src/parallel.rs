//! ParallelTaskCoordinator: join-all fan-out for the generation phase.
//!
//! Every task is spawned onto the runtime, so a panicking task is observed as
//! a failed outcome instead of tearing down its siblings. The coordinator
//! waits for all of them and reports outcomes in submission order.
//!
//! Dropping the `run_all` future (a phase timeout, for instance) aborts every
//! task still in flight, so no stale task writes into a working area after
//! it has been reset.

use futures::{StreamExt, stream::FuturesUnordered};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use pipeforge_config::ParallelConfig;
use pipeforge_utils::error::{CollaboratorError, PhaseError};

/// Why a task did not produce its output.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskError {
    Failed(CollaboratorError),
    Panicked(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{e}"),
            Self::Panicked(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

/// Aborts the spawned task when dropped before it was joined.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub task: String,
    pub result: Result<T, TaskError>,
}

impl<T> TaskOutcome<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Phase-level verdict over a set of outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    /// Phase completes. `warning` lists failed tasks when there were any.
    Completed { warning: Option<String> },
    Failed(PhaseError),
}

#[derive(Debug, Clone)]
pub struct ParallelTaskCoordinator {
    required: BTreeSet<String>,
    max_failed: Option<usize>,
    max_concurrency: Option<usize>,
}

impl ParallelTaskCoordinator {
    #[must_use]
    pub fn new(config: &ParallelConfig) -> Self {
        Self {
            required: config.required_tasks.iter().cloned().collect(),
            max_failed: config.max_failed_tasks,
            max_concurrency: config.max_concurrency,
        }
    }

    #[must_use]
    pub fn is_required(&self, task: &str) -> bool {
        self.required.contains(task)
    }

    #[must_use]
    pub fn required_tasks(&self) -> Vec<String> {
        self.required.iter().cloned().collect()
    }

    /// Run every task to completion and return outcomes in input order.
    ///
    /// Tasks that have not finished when the returned future is dropped are
    /// aborted.
    pub async fn run_all<T, Fut>(&self, tasks: Vec<(String, Fut)>) -> Vec<TaskOutcome<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, CollaboratorError>> + Send + 'static,
    {
        let permits = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut names = Vec::with_capacity(tasks.len());
        let mut running = FuturesUnordered::new();

        for (index, (name, fut)) in tasks.into_iter().enumerate() {
            names.push(name);
            let permits = permits.clone();
            let handle = tokio::spawn(async move {
                let _permit = match permits {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                fut.await
            });
            let mut guard = AbortOnDrop(handle);
            running.push(async move { (index, (&mut guard.0).await) });
        }

        let mut slots: Vec<Option<Result<T, TaskError>>> = names.iter().map(|_| None).collect();
        while let Some((index, joined)) = running.next().await {
            let result = match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(join_err) => Err(TaskError::Panicked(join_err.to_string())),
            };
            slots[index] = Some(result);
        }

        names
            .into_iter()
            .zip(slots)
            .map(|(task, slot)| TaskOutcome {
                task,
                result: slot.unwrap_or_else(|| Err(TaskError::Panicked("task was not joined".to_string()))),
            })
            .collect()
    }

    /// Apply the failure policy: any failed required task, or more failures
    /// than `max_failed_tasks`, fails the phase.
    #[must_use]
    pub fn aggregate<T>(&self, outcomes: &[TaskOutcome<T>]) -> Aggregate {
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.task.as_str())
            .collect();

        let required_failed: Vec<String> = failed
            .iter()
            .filter(|t| self.is_required(t))
            .map(|t| (*t).to_string())
            .collect();
        if !required_failed.is_empty() {
            return Aggregate::Failed(PhaseError::RequiredTasksFailed {
                tasks: required_failed,
            });
        }

        if let Some(limit) = self.max_failed
            && failed.len() > limit
        {
            return Aggregate::Failed(PhaseError::TooManyTasksFailed {
                failed: failed.len(),
                limit,
            });
        }

        let warning = (!failed.is_empty()).then(|| {
            format!(
                "partial output: {} of {} generation tasks failed ({})",
                failed.len(),
                outcomes.len(),
                failed.join(", ")
            )
        });
        Aggregate::Completed { warning }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn coordinator(required: &[&str], max_failed: Option<usize>) -> ParallelTaskCoordinator {
        ParallelTaskCoordinator::new(&ParallelConfig {
            required_tasks: required.iter().map(|s| (*s).to_string()).collect(),
            max_failed_tasks: max_failed,
            max_concurrency: None,
        })
    }

    type BoxedTask = std::pin::Pin<Box<dyn Future<Output = Result<String, CollaboratorError>> + Send>>;

    fn task(name: &str, fail: bool, delay_ms: u64) -> (String, BoxedTask) {
        let owned = name.to_string();
        let fut: BoxedTask = Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if fail {
                Err(CollaboratorError::unknown(format!("{owned} failed")))
            } else {
                Ok(owned)
            }
        });
        (name.to_string(), fut)
    }

    #[tokio::test]
    async fn test_outcomes_are_in_submission_order() {
        let coord = coordinator(&[], None);
        let outcomes = coord
            .run_all(vec![task("slow", false, 30), task("fast", false, 0)])
            .await;

        let names: Vec<_> = outcomes.iter().map(|o| o.task.as_str()).collect();
        assert_eq!(names, vec!["slow", "fast"]);
        assert_eq!(outcomes[0].result.as_ref().unwrap(), "slow");
    }

    #[tokio::test]
    async fn test_three_of_five_optional_failures_complete_with_warning() {
        let coord = coordinator(&["orchestrator"], None);
        let outcomes = coord
            .run_all(vec![
                task("a", true, 5),
                task("b", false, 0),
                task("c", true, 1),
                task("d", false, 3),
                task("e", true, 0),
            ])
            .await;

        assert_eq!(outcomes.iter().filter(|o| !o.is_success()).count(), 3);
        match coord.aggregate(&outcomes) {
            Aggregate::Completed { warning: Some(w) } => {
                assert!(w.contains("3 of 5"));
                assert!(w.contains("a, c, e"));
            }
            other => panic!("expected completed with warning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_required_failure_fails_phase() {
        let coord = coordinator(&["reviewer"], None);
        let outcomes = coord
            .run_all(vec![task("reviewer", true, 0), task("docs", false, 0)])
            .await;

        assert_eq!(
            coord.aggregate(&outcomes),
            Aggregate::Failed(PhaseError::RequiredTasksFailed {
                tasks: vec!["reviewer".to_string()]
            })
        );
    }

    #[tokio::test]
    async fn test_failure_threshold() {
        let coord = coordinator(&[], Some(1));
        let outcomes = coord
            .run_all(vec![task("a", true, 0), task("b", true, 0), task("c", false, 0)])
            .await;

        assert!(matches!(
            coord.aggregate(&outcomes),
            Aggregate::Failed(PhaseError::TooManyTasksFailed { failed: 2, limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_abort_siblings() {
        let coord = coordinator(&[], None);
        let boom: BoxedTask = Box::pin(async { panic!("generator exploded") });
        let outcomes = coord
            .run_all(vec![("boom".to_string(), boom), task("ok", false, 10)])
            .await;

        assert!(matches!(outcomes[0].result, Err(TaskError::Panicked(_))));
        assert!(outcomes[1].is_success());
    }

    #[tokio::test]
    async fn test_max_concurrency_bounds_parallelism() {
        let coord = ParallelTaskCoordinator::new(&ParallelConfig {
            required_tasks: Vec::new(),
            max_failed_tasks: None,
            max_concurrency: Some(2),
        });
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6)
            .map(|i| {
                let active = active.clone();
                let peak = peak.clone();
                let fut = async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, CollaboratorError>(i)
                };
                (format!("t{i}"), fut)
            })
            .collect();

        let outcomes = coord.run_all(tasks).await;

        assert_eq!(outcomes.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_fan_out_aborts_every_task() {
        let coord = coordinator(&[], None);
        let finished = Arc::new(AtomicUsize::new(0));
        let tasks = (0..3)
            .map(|i| {
                let finished = finished.clone();
                let fut = async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CollaboratorError>(i)
                };
                (format!("t{i}"), fut)
            })
            .collect();

        let timed_out = tokio::time::timeout(Duration::from_secs(2), coord.run_all(tasks)).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
