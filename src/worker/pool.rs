use super::completion::CompletionTicket;
use super::pipeline::DevicePipeline;
use crate::models::DeviceRecord;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// One device to poll, tied to the cycle that dispatched it.
#[derive(Debug)]
pub struct Job {
    pub device: DeviceRecord,
    // Marks the job done when the job is dropped, whether it ran or not.
    _ticket: CompletionTicket,
}

impl Job {
    pub fn new(device: DeviceRecord, ticket: CompletionTicket) -> Self {
        Self {
            device,
            _ticket: ticket,
        }
    }
}

#[derive(Debug, Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

/// Sending half of the bounded job queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Waits for room in the queue.
    pub async fn submit(&self, job: Job) -> Result<(), PoolClosed> {
        self.sender.send(job).await.map_err(|_| PoolClosed)
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

/// Fixed set of workers draining a shared bounded queue.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `size` workers behind a queue holding at most `2 * size` jobs.
    ///
    /// The pool runs until every [`JobQueue`] clone is dropped; it then finishes
    /// the jobs still queued and the workers exit.
    pub fn start(size: usize, pipeline: Arc<DevicePipeline>) -> (JobQueue, WorkerPool) {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel(size * 2);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| tokio::spawn(run_worker(id, Arc::clone(&receiver), Arc::clone(&pipeline))))
            .collect();

        info!(workers = size, queue_capacity = size * 2, "Worker pool started.");
        (JobQueue { sender }, WorkerPool { workers })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for all workers to exit. Only returns after the queue is closed.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task ended abnormally.");
            }
        }
        info!("Worker pool stopped.");
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    pipeline: Arc<DevicePipeline>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        // A panic while polling one device must not take the worker down.
        let task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            let device = job.device.clone();
            async move { pipeline.process(&device).await }
        });

        match task.await {
            Ok(report) => debug!(
                worker = id,
                device = %report.device,
                interfaces = report.interfaces,
                results = report.results,
                rejected = report.rejected,
                written = report.written,
                connect_failed = report.connect_failed,
                "Device processed."
            ),
            Err(e) => error!(
                worker = id,
                device = %job.device.name,
                error = %e,
                "Device processing panicked."
            ),
        }
        drop(job);
    }
    debug!(worker = id, "Job queue closed, worker exiting.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AnomalyFilter, RateEngine};
    use crate::worker::completion::CompletionCounter;
    use crate::worker::testing::{device, snapshot, RecordingSink, ScriptedCollector};
    use std::time::Duration;

    fn start_pool(
        size: usize,
        collector: Arc<ScriptedCollector>,
        sink: Arc<RecordingSink>,
    ) -> (JobQueue, WorkerPool) {
        let pipeline = DevicePipeline::new(
            collector,
            Arc::new(RateEngine::default()),
            AnomalyFilter::default(),
            sink,
        );
        WorkerPool::start(size, Arc::new(pipeline))
    }

    fn steady_traffic() -> ScriptedCollector {
        ScriptedCollector::new(|_, poll| {
            Ok(vec![snapshot("uplink", poll as u64 * 1_000_000, 0, true, 1000, poll)])
        })
    }

    #[tokio::test]
    async fn test_queue_is_bounded_at_twice_the_workers() {
        let sink = Arc::new(RecordingSink::default());
        let (queue, pool) = start_pool(3, Arc::new(steady_traffic()), sink);
        assert_eq!(queue.capacity(), 6);
        assert_eq!(pool.size(), 3);

        drop(queue);
        tokio::time::timeout(Duration::from_secs(1), pool.join()).await.unwrap();
    }

    #[tokio::test]
    async fn test_every_job_completes() {
        let collector = Arc::new(steady_traffic());
        let sink = Arc::new(RecordingSink::default());
        let (queue, pool) = start_pool(4, collector.clone(), sink.clone());

        for round in 0..2 {
            let completion = CompletionCounter::new();
            for n in 0..20 {
                queue
                    .submit(Job::new(device(&format!("sw-{n:02}")), completion.ticket()))
                    .await
                    .unwrap();
            }
            tokio::time::timeout(Duration::from_secs(5), completion.wait())
                .await
                .unwrap();
            assert_eq!(collector.calls(), 20 * (round + 1));
        }

        // First round only seeds baselines.
        assert_eq!(sink.batches().len(), 20);

        drop(queue);
        pool.join().await;
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let collector = Arc::new(steady_traffic().with_delay(Duration::from_millis(200)));
        let (queue, pool) = start_pool(1, collector, Arc::new(RecordingSink::default()));
        let completion = CompletionCounter::new();

        // One job in flight plus two queued fill a single-worker pool.
        for n in 0..3 {
            queue.submit(Job::new(device(&format!("r{n}")), completion.ticket())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            queue.submit(Job::new(device("r3"), completion.ticket())),
        )
        .await;
        assert!(blocked.is_err());

        completion.wait().await;
        drop(queue);
        pool.join().await;
    }

    #[tokio::test]
    async fn test_panicking_device_does_not_stop_worker() {
        let collector = Arc::new(ScriptedCollector::new(|device, poll| {
            if device.name == "cursed" {
                panic!("agent sent garbage");
            }
            Ok(vec![snapshot("uplink", poll as u64, 0, true, 1000, poll)])
        }));
        let (queue, pool) = start_pool(1, collector.clone(), Arc::new(RecordingSink::default()));
        let completion = CompletionCounter::new();

        queue.submit(Job::new(device("cursed"), completion.ticket())).await.unwrap();
        queue.submit(Job::new(device("fine"), completion.ticket())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), completion.wait())
            .await
            .unwrap();
        assert_eq!(collector.calls(), 2);

        drop(queue);
        pool.join().await;
    }

    #[tokio::test]
    async fn test_closed_queue_drains_before_exit() {
        let collector = Arc::new(steady_traffic().with_delay(Duration::from_millis(20)));
        let (queue, pool) = start_pool(2, collector.clone(), Arc::new(RecordingSink::default()));
        let completion = CompletionCounter::new();

        for n in 0..4 {
            queue.submit(Job::new(device(&format!("olt-{n}")), completion.ticket())).await.unwrap();
        }
        drop(queue);
        pool.join().await;

        assert_eq!(collector.calls(), 4);
        assert_eq!(completion.outstanding(), 0);
    }
}
