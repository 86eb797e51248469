//! Asynchronous batches of jobs
//!
//! A batch is a list of jobs of one [`JobCategory`] run in parallel on the
//! worker pool from a coordinator thread. At most one batch per category is
//! in flight. Finished jobs are shown through a bounded [`DisplayQueue`]
//! which is only touched under the dispatcher lock.

use crate::display_queue::DisplayQueue;
use crate::error::DispatchError;
use crate::jobs::{run_job, Job, JobCategory, JobContext};
use crate::lock;
use crate::notify::{LogSink, Notification, NotificationSink};
use crate::pool::WorkerPool;
use log::{debug, error, warn};
use mvreg_core::{CloudKey, Error};
use rayon::prelude::*;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// Outcome of a finished batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub category: JobCategory,
    pub total: usize,
    /// Jobs that returned `Ok`
    pub completed: usize,
    /// Jobs that returned an error or panicked
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    /// Jobs that never started because the batch was cancelled
    pub fn skipped(&self) -> usize {
        self.total - self.completed - self.failed
    }
}

/// Progress of a running batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    JobFinished {
        key: CloudKey,
        succeeded: bool,
        finished: usize,
        total: usize,
    },
    BatchFinished(BatchSummary),
}

#[derive(Default)]
struct Completion {
    summary: Mutex<Option<BatchSummary>>,
    done: Condvar,
}

impl Completion {
    fn finish(&self, summary: BatchSummary) {
        *lock(&self.summary) = Some(summary);
        self.done.notify_all();
    }

    fn wait(&self) -> BatchSummary {
        let mut guard = lock(&self.summary);
        loop {
            if let Some(summary) = guard.as_ref() {
                return summary.clone();
            }
            guard = self
                .done
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

/// Caller's side of a dispatched batch
pub struct BatchHandle {
    category: JobCategory,
    cancel: Arc<AtomicBool>,
    completion: Arc<Completion>,
    events: Receiver<BatchEvent>,
}

impl BatchHandle {
    pub fn category(&self) -> JobCategory {
        self.category
    }

    /// Progress events; the channel closes once the batch has finished
    pub fn events(&self) -> &Receiver<BatchEvent> {
        &self.events
    }

    /// Stop starting new jobs. Jobs already running finish normally.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.completion.summary).is_some()
    }

    /// Block until the batch has finished
    pub fn wait(&self) -> BatchSummary {
        self.completion.wait()
    }
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("category", &self.category)
            .field("finished", &self.is_finished())
            .finish()
    }
}

struct RunningBatch {
    cancel: Arc<AtomicBool>,
    completion: Arc<Completion>,
}

struct DispatcherState {
    running: HashMap<JobCategory, RunningBatch>,
    display: DisplayQueue,
}

/// Runs job batches on a worker pool
pub struct TaskDispatcher {
    pool: WorkerPool,
    context: JobContext,
    sink: Arc<dyn NotificationSink>,
    state: Arc<Mutex<DispatcherState>>,
}

impl TaskDispatcher {
    /// Create a dispatcher with a pool sized by `context.config.dispatcher`
    pub fn new(context: JobContext) -> Result<Self, DispatchError> {
        context.config.validate()?;
        let pool = WorkerPool::new(&context.config.dispatcher)?;
        let capacity = context
            .config
            .dispatcher
            .display_capacity
            .unwrap_or_else(|| pool.concurrency());

        Ok(Self {
            pool,
            context,
            sink: Arc::new(LogSink),
            state: Arc::new(Mutex::new(DispatcherState {
                running: HashMap::new(),
                display: DisplayQueue::new(capacity),
            })),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn concurrency(&self) -> usize {
        self.pool.concurrency()
    }

    pub fn display_capacity(&self) -> usize {
        lock(&self.state).display.capacity()
    }

    /// Keys currently held by the display queue, oldest first
    pub fn displayed_keys(&self) -> Vec<CloudKey> {
        lock(&self.state).display.keys().copied().collect()
    }

    pub fn is_running(&self, category: JobCategory) -> bool {
        lock(&self.state).running.contains_key(&category)
    }

    pub fn is_busy(&self) -> bool {
        !lock(&self.state).running.is_empty()
    }

    /// Start `jobs` as one batch of `category`.
    ///
    /// Every job is validated before anything runs. With `display` set, each
    /// finished job's cloud is pushed through the display queue, and the
    /// queue is cleared when the batch ends.
    pub fn dispatch(&self, category: JobCategory, jobs: Vec<Job>, display: bool) -> Result<BatchHandle, DispatchError> {
        for job in &jobs {
            if job.category() != category {
                return Err(Error::InvalidParameter(format!(
                    "{} job for frame {} dispatched as {}",
                    job.category(),
                    job.frame(),
                    category
                ))
                .into());
            }
            job.validate()?;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let completion = Arc::new(Completion::default());
        {
            let mut state = lock(&self.state);
            if state.running.contains_key(&category) {
                return Err(DispatchError::CategoryBusy(category));
            }
            state.running.insert(
                category,
                RunningBatch {
                    cancel: Arc::clone(&cancel),
                    completion: Arc::clone(&completion),
                },
            );
        }

        let (sender, events) = mpsc::channel();
        let batch = Batch {
            category,
            jobs,
            display,
            cancel: Arc::clone(&cancel),
            completion: Arc::clone(&completion),
            pool: self.pool.clone(),
            context: self.context.clone(),
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.state),
        };

        let spawned = thread::Builder::new()
            .name(format!("mvreg-batch-{:?}", category).to_lowercase())
            .spawn(move || batch.run(sender));
        if let Err(e) = spawned {
            lock(&self.state).running.remove(&category);
            return Err(DispatchError::Pool(format!("Failed to start batch thread: {}", e)));
        }

        Ok(BatchHandle {
            category,
            cancel,
            completion,
            events,
        })
    }

    /// Cancel every running batch, optionally blocking until they drained
    pub fn cancel_running_tasks(&self, wait: bool) {
        let completions: Vec<Arc<Completion>> = {
            let state = lock(&self.state);
            state
                .running
                .values()
                .map(|batch| {
                    batch.cancel.store(true, Ordering::SeqCst);
                    Arc::clone(&batch.completion)
                })
                .collect()
        };
        debug!("cancelling {} running batches", completions.len());
        if wait {
            for completion in completions {
                completion.wait();
            }
        }
    }

    fn frames(&self) -> Vec<u32> {
        match self.context.store.frame_range() {
            Some(detected) => {
                let (start, end) = self.context.config.frames.apply(detected);
                (start..=end).collect()
            }
            None => Vec::new(),
        }
    }

    /// One generation job per view of every frame
    pub fn dispatch_points_generation(&self) -> Result<BatchHandle, DispatchError> {
        let generation = &self.context.config.generation;
        let view_count = self.context.store.view_count();
        let jobs = self
            .frames()
            .into_iter()
            .flat_map(|frame| {
                (0..view_count).map(move |view| Job::PointsGeneration {
                    frame,
                    view,
                    ctr_threshold: generation.ctr_threshold,
                    sat_threshold: generation.sat_threshold,
                })
            })
            .collect();
        self.dispatch(JobCategory::PointsGeneration, jobs, true)
    }

    pub fn dispatch_registration(&self, segment_threshold: usize) -> Result<BatchHandle, DispatchError> {
        let registration = &self.context.config.registration;
        let jobs = self
            .frames()
            .into_iter()
            .map(|frame| Job::Registration {
                frame,
                segment_threshold,
                max_iterations: registration.max_iterations,
                max_distance: registration.max_distance,
            })
            .collect();
        self.dispatch(JobCategory::Registration, jobs, true)
    }

    pub fn dispatch_denoise(&self, segment_threshold: usize) -> Result<BatchHandle, DispatchError> {
        let jobs = self
            .frames()
            .into_iter()
            .map(|frame| Job::Denoise {
                frame,
                segment_threshold,
            })
            .collect();
        self.dispatch(JobCategory::Denoise, jobs, true)
    }

    pub fn dispatch_downsampling<P: AsRef<Path>>(&self, sample_ratio: usize, folder: P) -> Result<BatchHandle, DispatchError> {
        let folder = folder.as_ref().to_path_buf();
        let jobs = self
            .frames()
            .into_iter()
            .map(|frame| Job::Downsampling {
                frame,
                sample_ratio,
                folder: folder.clone(),
            })
            .collect();
        self.dispatch(JobCategory::Downsampling, jobs, false)
    }

    pub fn dispatch_data_cut(&self) -> Result<BatchHandle, DispatchError> {
        let jobs = self.frames().into_iter().map(|frame| Job::DataCut { frame }).collect();
        self.dispatch(JobCategory::DataCut, jobs, true)
    }

    pub fn dispatch_remove_outliers(&self) -> Result<BatchHandle, DispatchError> {
        let jobs = self
            .frames()
            .into_iter()
            .map(|frame| Job::RemoveOutliers { frame })
            .collect();
        self.dispatch(JobCategory::RemoveOutliers, jobs, true)
    }

    pub fn dispatch_extract_points<P: AsRef<Path>>(&self, interval: usize, folder: P) -> Result<BatchHandle, DispatchError> {
        let folder = folder.as_ref().to_path_buf();
        let jobs = self
            .frames()
            .into_iter()
            .map(|frame| Job::ExtractPoints {
                frame,
                interval,
                folder: folder.clone(),
            })
            .collect();
        self.dispatch(JobCategory::ExtractPoints, jobs, false)
    }
}

impl Drop for TaskDispatcher {
    fn drop(&mut self) {
        self.cancel_running_tasks(true);
    }
}

/// Everything the coordinator thread owns
struct Batch {
    category: JobCategory,
    jobs: Vec<Job>,
    display: bool,
    cancel: Arc<AtomicBool>,
    completion: Arc<Completion>,
    pool: WorkerPool,
    context: JobContext,
    sink: Arc<dyn NotificationSink>,
    state: Arc<Mutex<DispatcherState>>,
}

impl Batch {
    fn run(self, sender: mpsc::Sender<BatchEvent>) {
        let name = self.category.to_string();
        let total = self.jobs.len();
        self.sink.notify(Notification::Started {
            name: name.clone(),
            total,
        });

        let finished = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        self.pool.install(|| {
            self.jobs.par_iter().for_each_with(sender.clone(), |sender, job| {
                if self.cancel.load(Ordering::SeqCst) {
                    return;
                }

                let key = job.key();
                let succeeded = match panic::catch_unwind(AssertUnwindSafe(|| run_job(job, &self.context))) {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!("{}: {} failed: {}", name, key, e);
                        false
                    }
                    Err(_) => {
                        error!("{}: {} panicked", name, key);
                        false
                    }
                };

                if succeeded {
                    completed.fetch_add(1, Ordering::SeqCst);
                    if self.display {
                        lock(&self.state).display.push(key, &self.context.store);
                    }
                } else {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
                let finished = finished.fetch_add(1, Ordering::SeqCst) + 1;

                let _ = sender.send(BatchEvent::JobFinished {
                    key,
                    succeeded,
                    finished,
                    total,
                });
                self.sink.notify(Notification::Progress {
                    name: name.clone(),
                    key,
                    completed: finished,
                    total,
                });
            });
        });

        let summary = BatchSummary {
            category: self.category,
            total,
            completed: completed.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            cancelled: self.cancel.load(Ordering::SeqCst),
        };

        {
            let mut state = lock(&self.state);
            if self.display {
                state.display.clear(&self.context.store);
            }
            state.running.remove(&self.category);
        }

        self.sink.notify(Notification::Finished {
            name,
            completed: summary.completed,
            failed: summary.failed,
            cancelled: summary.cancelled,
        });
        let _ = sender.send(BatchEvent::BatchFinished(summary.clone()));
        self.completion.finish(summary);
    }
}
