//! Background blob loading.
//!
//! One worker thread drains a FIFO channel of jobs. Results travel back over a
//! second channel and are handed to their sinks only when the owner calls
//! [`LoadQueue::dispatch_finished`] or awaits [`LoadQueue::wait_finished`], so
//! sinks always run on the owner's thread.
//!
//! Cancellation is cooperative: a cancelled job still queued is skipped by the
//! worker, and a result arriving for a cancelled job finds no sink and is
//! dropped.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use flume::{Receiver, Sender};
use hashbrown::HashMap;
use tracing::{debug, trace, warn};

pub mod task;

pub use task::{BlobLoadSink, BlobReadTask, LoadTask, MissTask};

/// Opaque handle of a submitted load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Job {
    id: TaskId,
    live: Arc<AtomicBool>,
    task: Box<dyn LoadTask>,
}

struct Finished {
    id: TaskId,
    data: Option<Vec<u8>>,
}

struct Pending {
    live: Arc<AtomicBool>,
    sink: Box<dyn BlobLoadSink>,
}

pub struct LoadQueue {
    next_id: u64,
    jobs: Option<Sender<Job>>,
    results: Receiver<Finished>,
    pending: HashMap<TaskId, Pending>,
    worker: Option<JoinHandle<()>>,
}

impl LoadQueue {
    /// Spawns the worker thread.
    pub fn start() -> Result<Self> {
        let (job_sender, job_receiver) = flume::unbounded::<Job>();
        let (result_sender, result_receiver) = flume::unbounded::<Finished>();

        let worker = thread::Builder::new().name("blob-loader".into()).spawn(move || Self::run(&job_receiver, &result_sender)).context("failed to spawn load worker")?;

        Ok(Self { next_id: 0, jobs: Some(job_sender), results: result_receiver, pending: HashMap::new(), worker: Some(worker) })
    }

    fn run(jobs: &Receiver<Job>, results: &Sender<Finished>) {
        for mut job in jobs.iter() {
            if !job.live.load(Ordering::Acquire) {
                trace!(id = %job.id, "skipping cancelled load");
                continue;
            }
            let data = job.task.process();
            if results.send(Finished { id: job.id, data }).is_err() {
                break;
            }
        }
        debug!("load worker exiting");
    }

    /// Queues `task`; `sink` receives exactly one result unless cancelled.
    pub fn submit(&mut self, task: Box<dyn LoadTask>, sink: Box<dyn BlobLoadSink>) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);

        let Some(jobs) = &self.jobs else {
            warn!(%id, "load queue stopped, reporting a miss");
            sink.on_loaded(None);
            return id;
        };

        let live = Arc::new(AtomicBool::new(true));
        if jobs.send(Job { id, live: Arc::clone(&live), task }).is_err() {
            warn!(%id, "load worker gone, reporting a miss");
            sink.on_loaded(None);
            return id;
        }

        self.pending.insert(id, Pending { live, sink });
        id
    }

    /// Cancels a load. Returns `false` when it already finished or never existed.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                pending.live.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Delivers every result that is ready without blocking.
    pub fn dispatch_finished(&mut self) -> usize {
        let mut delivered = 0;
        for finished in self.results.try_iter() {
            delivered += usize::from(Self::deliver(&mut self.pending, finished));
        }
        delivered
    }

    /// Waits for at least one live load to finish, then delivers what is ready.
    pub async fn wait_finished(&mut self) -> usize {
        let mut delivered = 0;
        while delivered == 0 && !self.pending.is_empty() {
            let Ok(finished) = self.results.recv_async().await else {
                break;
            };
            delivered += usize::from(Self::deliver(&mut self.pending, finished));
        }
        delivered + self.dispatch_finished()
    }

    fn deliver(pending: &mut HashMap<TaskId, Pending>, finished: Finished) -> bool {
        match pending.remove(&finished.id) {
            Some(entry) => {
                entry.sink.on_loaded(finished.data);
                true
            }
            None => {
                trace!(id = %finished.id, "dropping result of cancelled load");
                false
            }
        }
    }

    /// Discards queued loads and joins the worker.
    pub fn stop(&mut self) -> Result<()> {
        for pending in self.pending.values() {
            pending.live.store(false, Ordering::Release);
        }
        self.pending.clear();
        self.jobs = None;

        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| anyhow!("load worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for LoadQueue {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "load queue shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    struct Echo(Vec<u8>);

    impl LoadTask for Echo {
        fn process(&mut self) -> Option<Vec<u8>> {
            Some(std::mem::take(&mut self.0))
        }
    }

    /// Blocks the worker until the test releases it.
    struct Gate(mpsc::Receiver<()>);

    impl LoadTask for Gate {
        fn process(&mut self) -> Option<Vec<u8>> {
            self.0.recv().ok();
            Some(b"gate".to_vec())
        }
    }

    fn recorder() -> (Rc<RefCell<Vec<Option<Vec<u8>>>>>, impl Fn() -> Box<dyn BlobLoadSink>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = Rc::clone(&log);
        let make = move || {
            let log = Rc::clone(&handle);
            Box::new(move |data: Option<Vec<u8>>| log.borrow_mut().push(data)) as Box<dyn BlobLoadSink>
        };
        (log, make)
    }

    fn drain(queue: &mut LoadQueue, expected: usize) {
        let mut seen = 0;
        for _ in 0..200 {
            seen += queue.dispatch_finished();
            if seen >= expected {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("only {seen} of {expected} loads finished");
    }

    #[test]
    fn test_fifo_delivery() {
        let mut queue = LoadQueue::start().unwrap();
        let (log, sink) = recorder();

        queue.submit(Box::new(Echo(b"one".to_vec())), sink());
        queue.submit(Box::new(MissTask), sink());
        queue.submit(Box::new(Echo(b"three".to_vec())), sink());
        drain(&mut queue, 3);

        assert_eq!(*log.borrow(), vec![Some(b"one".to_vec()), None, Some(b"three".to_vec())]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_cancel_queued_and_in_flight() {
        let mut queue = LoadQueue::start().unwrap();
        let (log, sink) = recorder();
        let (release, gate) = mpsc::channel();

        let in_flight = queue.submit(Box::new(Gate(gate)), sink());
        let queued = queue.submit(Box::new(Echo(b"skipped".to_vec())), sink());
        let kept = queue.submit(Box::new(Echo(b"kept".to_vec())), sink());

        assert!(queue.cancel(queued));
        assert!(queue.cancel(in_flight));
        assert!(!queue.cancel(in_flight));
        let _ = release.send(());

        drain(&mut queue, 1);
        assert_eq!(*log.borrow(), vec![Some(b"kept".to_vec())]);
        assert!(!queue.cancel(kept));
    }

    #[test]
    fn test_stop_discards_and_joins() {
        let mut queue = LoadQueue::start().unwrap();
        let (log, sink) = recorder();

        queue.stop().unwrap();
        queue.submit(Box::new(Echo(b"late".to_vec())), sink());
        assert_eq!(*log.borrow(), vec![None]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_finished() {
        let mut queue = LoadQueue::start().unwrap();
        let (log, sink) = recorder();

        queue.submit(Box::new(Echo(b"async".to_vec())), sink());
        let mut delivered = 0;
        while delivered == 0 {
            delivered += queue.wait_finished().await;
        }

        assert_eq!(*log.borrow(), vec![Some(b"async".to_vec())]);
        assert_eq!(queue.wait_finished().await, 0);
    }
}
