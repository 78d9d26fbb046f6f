//! Bounded concurrent fan-out for a stage's actions (spec §4.6, §5).
//!
//! Authored fresh for this crate (absent from the retrieval pack) but
//! grounded tightly on the teacher's superstep concurrency contract: spawn
//! every runnable unit of the current "round" concurrently, bound by a
//! semaphore, and join all of them — success or failure — before returning
//! a report that keeps ran and errored apart rather than short-circuiting
//! on the first failure.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("action '{0}' panicked: {1}")]
    Panicked(String, String),
}

pub struct StageReport<E> {
    pub ran: Vec<String>,
    pub errors: Vec<(String, E)>,
}

impl<E> StageReport<E> {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Spawns one task per `(name, future)` pair, bounded by `concurrency_limit`
/// in flight at once, and joins all of them before returning.
pub struct Scheduler {
    limit: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new(concurrency_limit: usize) -> Self {
        Self { limit: concurrency_limit.max(1) }
    }

    pub async fn run_stage<E, Fut>(&self, tasks: Vec<(String, Fut)>) -> StageReport<E>
    where
        E: Send + From<SchedulerError> + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut handles = Vec::with_capacity(tasks.len());
        for (name, fut) in tasks {
            let permit = Arc::clone(&semaphore);
            handles.push((name, tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                fut.await
            })));
        }

        let mut ran = Vec::new();
        let mut errors = Vec::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => ran.push(name),
                Ok(Err(err)) => errors.push((name, err)),
                Err(join_err) => {
                    let message = join_err.to_string();
                    tracing::error!(action = %name, error = %message, "action task panicked");
                    errors.push((name.clone(), E::from(SchedulerError::Panicked(name, message))));
                }
            }
        }
        StageReport { ran, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("{0}")]
        Boom(String),
        #[error(transparent)]
        Scheduler(#[from] SchedulerError),
    }

    #[tokio::test]
    async fn runs_all_tasks_and_separates_errors() {
        let scheduler = Scheduler::new(2);
        let tasks: Vec<(String, _)> = vec![
            ("a".to_string(), Box::pin(async { Ok::<(), TestError>(()) }) as std::pin::Pin<Box<dyn Future<Output = Result<(), TestError>> + Send>>),
            ("b".to_string(), Box::pin(async { Err::<(), TestError>(TestError::Boom("boom".to_string())) })),
        ];
        let report = scheduler.run_stage(tasks).await;
        assert_eq!(report.ran, vec!["a".to_string()]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "b");
    }

    #[tokio::test]
    async fn a_panicking_task_surfaces_as_an_error_instead_of_vanishing() {
        let scheduler = Scheduler::new(2);
        let tasks: Vec<(String, _)> = vec![(
            "c".to_string(),
            Box::pin(async { panic!("task blew up") }) as std::pin::Pin<Box<dyn Future<Output = Result<(), TestError>> + Send>>,
        )];
        let report = scheduler.run_stage(tasks).await;
        assert!(report.ran.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "c");
    }
}
