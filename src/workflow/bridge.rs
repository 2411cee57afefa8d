//! Blocking-to-async bridge.
//!
//! The engine runs on tokio's blocking pool and pushes [`Notification`]s into
//! a bounded queue. [`BridgeStream`] drains that queue on the async side and,
//! once the worker has returned, yields its result.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Job, Notification, Notifier, WorkflowEngine, WorkflowError, WorkflowOutcome};

/// What the run task receives from the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeItem {
    Notice(Notification),
    /// The engine returned. Always the last item.
    Finished(WorkflowOutcome),
    /// The engine failed or panicked. Always the last item.
    Failed(WorkflowError),
}

type Worker = JoinHandle<Result<WorkflowOutcome, WorkflowError>>;

#[derive(Debug)]
pub struct BridgeStream {
    rx: mpsc::Receiver<Notification>,
    held: Option<Notification>,
    worker: Option<Worker>,
}

/// Start `engine` on a blocking worker.
///
/// `capacity` bounds the queue between worker and consumer; the worker blocks
/// while it is full.
pub fn spawn(
    engine: Arc<dyn WorkflowEngine>,
    job: Job,
    capacity: usize,
    cancel: CancellationToken,
) -> BridgeStream {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let span = tracing::Span::current();

    let worker = tokio::task::spawn_blocking(move || {
        let _guard = span.enter();
        debug!(name: "workflow.worker.started", engine = engine.name(), "Engine worker started");
        let notifier = Notifier::new(tx);
        let result = engine.run(job, &notifier, &cancel);
        debug!(name: "workflow.worker.finished", ok = result.is_ok(), "Engine worker finished");
        result
    });

    BridgeStream::from_parts(rx, worker)
}

impl BridgeStream {
    pub(crate) fn from_parts(rx: mpsc::Receiver<Notification>, worker: Worker) -> Self {
        Self {
            rx,
            held: None,
            worker: Some(worker),
        }
    }

    /// Next item, or `None` after the final `Finished`/`Failed`.
    ///
    /// Consecutive progress reports for the same task that are already
    /// queued collapse into the latest one.
    pub async fn next(&mut self) -> Option<BridgeItem> {
        let next = match self.held.take() {
            Some(n) => Some(n),
            None => self.rx.recv().await,
        };

        match next {
            Some(Notification::Progress { task, ratio }) => {
                Some(BridgeItem::Notice(self.coalesce(task, ratio)))
            }
            Some(n) => Some(BridgeItem::Notice(n)),
            None => {
                let worker = self.worker.take()?;
                Some(match worker.await {
                    Ok(Ok(outcome)) => BridgeItem::Finished(outcome),
                    Ok(Err(e)) => BridgeItem::Failed(e),
                    Err(e) => BridgeItem::Failed(join_failure(e)),
                })
            }
        }
    }

    fn coalesce(&mut self, task: super::Task, mut ratio: f64) -> Notification {
        let mut merged = 0_usize;
        loop {
            match self.rx.try_recv() {
                Ok(Notification::Progress { task: t, ratio: r }) if t == task => {
                    ratio = r;
                    merged += 1;
                }
                Ok(other) => {
                    self.held = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        if merged > 0 {
            debug!(name: "workflow.progress.coalesced", task = task.as_str(), merged, "Coalesced progress");
        }
        Notification::Progress { task, ratio }
    }
}

fn join_failure(e: JoinError) -> WorkflowError {
    if e.is_cancelled() {
        return WorkflowError::Cancelled;
    }
    let message = e
        .try_into_panic()
        .map_or_else(|e| e.to_string(), |payload| panic_message(payload.as_ref()));
    warn!(name: "workflow.worker.panicked", panic = %message, "Engine worker panicked");
    WorkflowError::Engine(format!("engine panicked: {message}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Task, Verdict};

    fn outcome() -> WorkflowOutcome {
        WorkflowOutcome {
            recommendations: "done".into(),
            restaurants: Vec::new(),
            verdict: Verdict::Revised,
        }
    }

    #[derive(Debug)]
    struct Panicking;

    impl WorkflowEngine for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn run(
            &self,
            _job: Job,
            notifier: &Notifier,
            _cancel: &CancellationToken,
        ) -> Result<WorkflowOutcome, WorkflowError> {
            notifier.phase(Task::Search)?;
            panic!("crew exploded");
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl WorkflowEngine for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run(
            &self,
            _job: Job,
            _notifier: &Notifier,
            _cancel: &CancellationToken,
        ) -> Result<WorkflowOutcome, WorkflowError> {
            Err(WorkflowError::Engine("no results".into()))
        }
    }

    #[tokio::test]
    async fn test_coalesces_queued_progress_per_task() {
        let (tx, rx) = mpsc::channel(16);
        for ratio in [0.1, 0.2, 0.3] {
            tx.try_send(Notification::Progress {
                task: Task::Search,
                ratio,
            })
            .unwrap();
        }
        tx.try_send(Notification::TextChunk("x".into())).unwrap();
        tx.try_send(Notification::Progress {
            task: Task::Search,
            ratio: 1.0,
        })
        .unwrap();
        tx.try_send(Notification::Progress {
            task: Task::Recommend,
            ratio: 0.4,
        })
        .unwrap();
        drop(tx);

        let worker = tokio::task::spawn_blocking(|| Ok(outcome()));
        let mut stream = BridgeStream::from_parts(rx, worker);

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }

        assert_eq!(
            items,
            vec![
                BridgeItem::Notice(Notification::Progress {
                    task: Task::Search,
                    ratio: 0.3
                }),
                BridgeItem::Notice(Notification::TextChunk("x".into())),
                BridgeItem::Notice(Notification::Progress {
                    task: Task::Search,
                    ratio: 1.0
                }),
                BridgeItem::Notice(Notification::Progress {
                    task: Task::Recommend,
                    ratio: 0.4
                }),
                BridgeItem::Finished(outcome()),
            ]
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let mut stream = spawn(
            Arc::new(Panicking),
            Job::Search { query: "q".into() },
            4,
            CancellationToken::new(),
        );

        assert_eq!(
            stream.next().await,
            Some(BridgeItem::Notice(Notification::PhaseStarted(Task::Search)))
        );
        let Some(BridgeItem::Failed(WorkflowError::Engine(msg))) = stream.next().await else {
            panic!("expected failure");
        };
        assert!(msg.contains("crew exploded"));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_engine_error_ends_stream() {
        let mut stream = spawn(
            Arc::new(Failing),
            Job::Search { query: "q".into() },
            4,
            CancellationToken::new(),
        );
        assert_eq!(
            stream.next().await,
            Some(BridgeItem::Failed(WorkflowError::Engine("no results".into())))
        );
        assert_eq!(stream.next().await, None);
    }
}
