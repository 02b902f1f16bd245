use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, bounded};
use tracing::error;

pub type Task<T> = Box<dyn FnOnce() -> T + Send + 'static>;
pub type TaskListener<T> = Box<dyn FnOnce(T) + Send + 'static>;

const SEND_RETRY: Duration = Duration::from_secs(1);

struct Job<T> {
    task: Task<T>,
    listener: Option<TaskListener<T>>,
}

struct Completed<T> {
    result: thread::Result<T>,
    listener: Option<TaskListener<T>>,
}

#[derive(Default)]
struct Counts {
    submissions_open: bool,
    submitted: u64,
    completed: u64,
    failed: u64,
}

struct FinishState {
    counts: Mutex<Counts>,
    signal: Condvar,
}

impl FinishState {
    fn new() -> Self {
        Self {
            counts: Mutex::new(Counts::default()),
            signal: Condvar::new(),
        }
    }

    fn record_submission(&self) {
        let mut counts = self.counts.lock().unwrap();
        if !counts.submissions_open {
            *counts = Counts {
                submissions_open: true,
                ..Counts::default()
            };
        }
        counts.submitted += 1;
    }

    fn record_result(&self, failed: bool) {
        let mut counts = self.counts.lock().unwrap();
        counts.completed += 1;
        if failed {
            counts.failed += 1;
        }
        if counts.completed == counts.submitted {
            self.signal.notify_all();
        }
    }

    fn wait(&self) {
        let mut counts = self.counts.lock().unwrap();
        counts.submissions_open = false;
        while counts.completed < counts.submitted {
            counts = self.signal.wait(counts).unwrap();
        }
    }

    fn failures(&self) -> u64 {
        self.counts.lock().unwrap().failed
    }
}

/// A fixed pool of worker threads consuming a bounded queue of tasks, with a
/// dedicated listener thread that drains completions and runs callbacks.
///
/// Workers never execute consumer code: completions go through the listener
/// thread, so a slow callback can never block a worker. Submission blocks
/// with timed retry when the queue is full. A task (or listener) that panics
/// is recorded as a failure and never re-thrown across threads; its result
/// is simply absent from the output stream.
pub struct TaskExecutor<T: Send + 'static> {
    incoming: Option<crossbeam_channel::Sender<Job<T>>>,
    workers: Vec<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    finish: Arc<FinishState>,
}

impl<T: Send + 'static> TaskExecutor<T> {
    pub fn start(num_threads: usize, queue_capacity: usize) -> Self {
        let num_threads = num_threads.max(1);
        let queue_capacity = queue_capacity.max(1);

        let (in_tx, in_rx) = bounded::<Job<T>>(queue_capacity);
        let (out_tx, out_rx) = bounded::<Completed<T>>(queue_capacity);
        let finish = Arc::new(FinishState::new());

        let workers = (0..num_threads)
            .map(|i| {
                let in_rx = in_rx.clone();
                let out_tx = out_tx.clone();
                thread::Builder::new()
                    .name(format!("task-worker-{i}"))
                    .spawn(move || {
                        for Job { task, listener } in in_rx.iter() {
                            let result = catch_unwind(AssertUnwindSafe(task));
                            let mut completed = Completed { result, listener };
                            loop {
                                match out_tx.send_timeout(completed, SEND_RETRY) {
                                    Ok(()) => break,
                                    Err(SendTimeoutError::Timeout(returned)) => {
                                        completed = returned;
                                    }
                                    Err(SendTimeoutError::Disconnected(_)) => return,
                                }
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        // Workers hold the only completion senders; the listener exits when
        // the last worker does.
        drop(out_tx);

        let listener = {
            let finish = Arc::clone(&finish);
            thread::Builder::new()
                .name("task-listener".into())
                .spawn(move || {
                    for completed in out_rx.iter() {
                        let failed = match completed.result {
                            Ok(output) => match completed.listener {
                                Some(listener) => {
                                    let outcome =
                                        catch_unwind(AssertUnwindSafe(move || listener(output)));
                                    if outcome.is_err() {
                                        error!("task listener panicked; recording failure");
                                    }
                                    outcome.is_err()
                                }
                                None => false,
                            },
                            Err(_) => {
                                error!("task panicked; recording failure");
                                true
                            }
                        };
                        finish.record_result(failed);
                    }
                })
                .expect("failed to spawn listener thread")
        };

        Self {
            incoming: Some(in_tx),
            workers,
            listener: Some(listener),
            finish,
        }
    }

    /// Submits a task, blocking with timed retry while the queue is full.
    /// The listener, if any, runs on the listener thread after the task
    /// completes.
    pub fn submit(&self, task: Task<T>, listener: Option<TaskListener<T>>) {
        let sender = self.incoming.as_ref().expect("executor is stopped");
        self.finish.record_submission();
        let mut job = Job { task, listener };
        loop {
            match sender.send_timeout(job, SEND_RETRY) {
                Ok(()) => return,
                Err(SendTimeoutError::Timeout(returned)) => job = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    panic!("task executor queue disconnected")
                }
            }
        }
    }

    /// Barrier: blocks until every task submitted so far has completed and
    /// its listener has run.
    pub fn wait_for_finish(&self) {
        self.finish.wait();
    }

    /// Failed (panicked) tasks in the current submission batch.
    pub fn num_failures(&self) -> u64 {
        self.finish.failures()
    }

    /// Stops accepting tasks, drains the queues, and joins all threads.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.incoming.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }
}

impl<T: Send + 'static> Drop for TaskExecutor<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn runs_every_task_and_listener() {
        let executor: TaskExecutor<u64> = TaskExecutor::start(4, 8);
        let sum = Arc::new(AtomicU64::new(0));

        for i in 0..100u64 {
            let sum = Arc::clone(&sum);
            executor.submit(
                Box::new(move || i),
                Some(Box::new(move |value| {
                    sum.fetch_add(value, Ordering::SeqCst);
                })),
            );
        }
        executor.wait_for_finish();

        assert_eq!(sum.load(Ordering::SeqCst), (0..100).sum::<u64>());
        assert_eq!(executor.num_failures(), 0);
        executor.stop();
    }

    #[test]
    fn barrier_holds_under_out_of_order_completion() {
        let executor: TaskExecutor<u64> = TaskExecutor::start(4, 4);
        let completed = Arc::new(AtomicU64::new(0));

        for i in 0..16u64 {
            let completed = Arc::clone(&completed);
            executor.submit(
                Box::new(move || {
                    // Later submissions finish sooner.
                    thread::sleep(Duration::from_millis(16 - i));
                    i
                }),
                Some(Box::new(move |_| {
                    completed.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        executor.wait_for_finish();
        assert_eq!(completed.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn backpressure_blocks_submission_without_losing_tasks() {
        let executor: TaskExecutor<()> = TaskExecutor::start(1, 1);
        let count = Arc::new(AtomicU64::new(0));

        for _ in 0..32 {
            let count = Arc::clone(&count);
            executor.submit(
                Box::new(move || {
                    thread::sleep(Duration::from_millis(1));
                }),
                Some(Box::new(move |()| {
                    count.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        executor.wait_for_finish();
        assert_eq!(count.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn panicking_task_is_recorded_not_rethrown() {
        let executor: TaskExecutor<u64> = TaskExecutor::start(2, 4);
        let delivered = Arc::new(AtomicU64::new(0));

        executor.submit(Box::new(|| panic!("deliberate failure")), None);
        for i in 0..4u64 {
            let delivered = Arc::clone(&delivered);
            executor.submit(
                Box::new(move || i),
                Some(Box::new(move |_| {
                    delivered.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        executor.wait_for_finish();

        assert_eq!(executor.num_failures(), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn finish_state_resets_for_the_next_batch() {
        let executor: TaskExecutor<()> = TaskExecutor::start(2, 4);

        executor.submit(Box::new(|| panic!("first batch fails")), None);
        executor.wait_for_finish();
        assert_eq!(executor.num_failures(), 1);

        executor.submit(Box::new(|| ()), None);
        executor.wait_for_finish();
        assert_eq!(executor.num_failures(), 0);
    }

    #[test]
    fn wait_for_finish_with_no_tasks_returns_immediately() {
        let executor: TaskExecutor<()> = TaskExecutor::start(1, 1);
        executor.wait_for_finish();
    }
}
