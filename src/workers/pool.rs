//! Generic worker pool with pool-of-inboxes dispatch.
//!
//! Every idle worker re-publishes its inbox sender on a shared channel; the
//! dispatcher pairs one job from the input stream with one idle inbox. Jobs
//! are therefore never queued on a busy worker.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Job handler run by every worker. Errors are logged and the worker keeps
/// going; only a quit signal or cancellation stops it.
#[async_trait]
pub trait Processor<J>: Send + Sync {
    async fn process(&self, job: J) -> anyhow::Result<()>;
}

pub struct WorkerPool<J> {
    size: usize,
    processor: Arc<dyn Processor<J>>,
    quit_txs: Vec<mpsc::Sender<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new(size: usize, processor: Arc<dyn Processor<J>>) -> Self {
        Self {
            size,
            processor,
            quit_txs: Vec::new(),
        }
    }

    /// Spawn the workers and return the pool-of-inboxes channel the
    /// dispatcher consumes.
    pub fn start(&mut self, cancel: CancellationToken) -> mpsc::Receiver<mpsc::Sender<J>> {
        let (pool_tx, pool_rx) = mpsc::channel(self.size.max(1));

        for worker_id in 1..=self.size {
            let (quit_tx, quit_rx) = mpsc::channel(1);
            self.quit_txs.push(quit_tx);

            tokio::spawn(worker_loop(
                worker_id,
                pool_tx.clone(),
                quit_rx,
                cancel.clone(),
                self.processor.clone(),
            ));
        }

        pool_rx
    }

    /// Signal every worker to quit. Nothing is drained: a job already in an
    /// inbox is still processed, anything else is dropped.
    pub async fn stop(&self) {
        for quit_tx in &self.quit_txs {
            let _ = quit_tx.send(()).await;
        }
    }
}

async fn worker_loop<J: Send + 'static>(
    worker_id: usize,
    pool_tx: mpsc::Sender<mpsc::Sender<J>>,
    mut quit_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
    processor: Arc<dyn Processor<J>>,
) {
    let (inbox_tx, mut inbox_rx) = mpsc::channel::<J>(1);

    loop {
        if pool_tx.send(inbox_tx.clone()).await.is_err() {
            break;
        }

        tokio::select! {
            job = inbox_rx.recv() => {
                let Some(job) = job else { break };
                tracing::trace!(target: "workers", worker = worker_id, "Processing job");
                if let Err(err) = processor.process(job).await {
                    tracing::error!(
                        target: "workers",
                        worker = worker_id,
                        error = ?err,
                        "Job processing failed"
                    );
                }
            }
            _ = quit_rx.recv() => {
                tracing::debug!(target: "workers", worker = worker_id, "Worker quitting");
                break;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Route jobs from the input stream to idle workers.
pub async fn dispatch<J: Send + 'static>(
    cancel: CancellationToken,
    mut inboxes: mpsc::Receiver<mpsc::Sender<J>>,
    mut input: mpsc::Receiver<J>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            job = input.recv() => {
                let Some(job) = job else { return };
                let Some(inbox) = inboxes.recv().await else { return };
                if inbox.send(job).await.is_err() {
                    tracing::warn!(target: "workers", "Dropped job addressed to a stopped worker");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        seen: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Processor<usize> for Counting {
        async fn process(&self, _job: usize) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Processor<usize> for Failing {
        async fn process(&self, job: usize) -> anyhow::Result<()> {
            anyhow::bail!("job {job} always fails")
        }
    }

    #[tokio::test]
    async fn all_jobs_reach_some_worker() {
        let processor = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            delay: Duration::from_millis(1),
        });
        let mut pool = WorkerPool::new(3, processor.clone());
        let cancel = CancellationToken::new();
        let inboxes = pool.start(cancel.clone());

        let (input_tx, input_rx) = mpsc::channel(16);
        let dispatcher = tokio::spawn(dispatch(cancel.clone(), inboxes, input_rx));

        for job in 0..10 {
            input_tx.send(job).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while processor.seen.load(Ordering::SeqCst) < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all jobs should be processed");

        cancel.cancel();
        drop(input_tx);
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn a_failing_job_does_not_kill_the_worker() {
        let mut pool = WorkerPool::new(1, Arc::new(Failing));
        let cancel = CancellationToken::new();
        let mut inboxes = pool.start(cancel.clone());

        for job in 0..3 {
            let inbox = inboxes.recv().await.unwrap();
            inbox.send(job).await.unwrap();
        }

        // The single worker survived three failures and is idle again.
        let inbox = inboxes.recv().await.unwrap();
        assert!(!inbox.is_closed());

        cancel.cancel();
    }

    #[tokio::test]
    async fn stop_shuts_workers_down() {
        let processor = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let mut pool = WorkerPool::new(2, processor);
        let cancel = CancellationToken::new();
        let mut inboxes = pool.start(cancel.clone());

        pool.stop().await;

        // Drain until both workers have exited; their inbox senders close
        // once the worker loop returns.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match inboxes.recv().await {
                    Some(inbox) => {
                        if inbox.is_closed() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    None => break,
                }
            }
        })
        .await
        .expect("workers should exit after stop");
    }
}
