//! Bulk deletion off the caller's thread.
//!
//! Requests are coalesced before they run: `All` is a superset of every other
//! kind, so it absorbs queued requests and silences a narrower sweep already in
//! progress. Each completed kind that was not superseded produces one
//! [`ClearEvent`].

use std::collections::VecDeque;
use std::mem;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::types::ClearKind;

pub mod sweep;

/// Completion of one clear request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearEvent {
    pub kind: ClearKind,
    pub success: bool,
    /// Another request was queued when this one finished.
    pub more_pending: bool,
}

impl ClearEvent {
    /// Succeeded with nothing left to do.
    #[inline]
    pub const fn fully_done(&self) -> bool {
        self.success && !self.more_pending
    }
}

/// Directories the sweeps operate on.
#[derive(Clone, Debug)]
pub struct ClearTargets {
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
}

#[derive(Default)]
struct State {
    tasks: VecDeque<ClearKind>,
    storage_files: Vec<PathBuf>,
    current: Option<ClearKind>,
    superseded: bool,
    stopping: bool,
}

type Shared = Arc<(Mutex<State>, Condvar)>;

pub struct ClearManager {
    shared: Shared,
    events: Receiver<ClearEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ClearManager {
    /// Spawns the clear worker.
    pub fn start(targets: ClearTargets) -> Result<Self> {
        let shared: Shared = Arc::new((Mutex::new(State::default()), Condvar::new()));
        let (sender, events) = flume::unbounded();

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new().name("clear-manager".into()).spawn(move || Self::run(&worker_shared, &targets, &sender)).context("failed to spawn clear worker")?;

        Ok(Self { shared, events, worker: Some(worker) })
    }

    fn lock(shared: &Shared) -> MutexGuard<'_, State> {
        shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a sweep. `files` are the blob files a `Storage` sweep deletes.
    ///
    /// Returns `false` when the request was absorbed by one already queued.
    pub fn request(&self, kind: ClearKind, files: Vec<PathBuf>) -> bool {
        self.request_many([(kind, files)]) == 1
    }

    /// Queues several sweeps under one lock, so the worker sees them already
    /// coalesced. Returns how many were accepted.
    pub fn request_many(&self, requests: impl IntoIterator<Item = (ClearKind, Vec<PathBuf>)>) -> usize {
        let mut state = Self::lock(&self.shared);
        let mut accepted = 0;
        for (kind, files) in requests {
            accepted += usize::from(Self::enqueue(&mut state, kind, files));
        }

        if accepted > 0 {
            self.shared.1.notify_one();
        }
        accepted
    }

    fn enqueue(state: &mut State, kind: ClearKind, files: Vec<PathBuf>) -> bool {
        if state.tasks.contains(&ClearKind::All) {
            debug!(%kind, "absorbed by queued clear all");
            return false;
        }

        match kind {
            ClearKind::All => {
                if state.current.is_some_and(|current| current != ClearKind::All) {
                    state.superseded = true;
                }
                state.tasks.clear();
                state.storage_files.clear();
                state.tasks.push_back(ClearKind::All);
            }
            ClearKind::Storage => {
                state.storage_files.extend(files);
                if !state.tasks.contains(&kind) {
                    state.tasks.push_back(kind);
                }
            }
            ClearKind::Downloads => {
                if state.tasks.contains(&kind) {
                    return false;
                }
                state.tasks.push_back(kind);
            }
        }

        info!(%kind, queued = state.tasks.len(), "clear requested");
        true
    }

    /// Completion events produced so far, without blocking.
    pub fn poll_events(&self) -> Vec<ClearEvent> {
        self.events.try_iter().collect()
    }

    /// Blocking receiver for hosts that dedicate a thread to completions.
    #[inline]
    pub fn events(&self) -> &Receiver<ClearEvent> {
        &self.events
    }

    /// True while a sweep runs or is queued.
    pub fn is_busy(&self) -> bool {
        let state = Self::lock(&self.shared);
        state.current.is_some() || !state.tasks.is_empty()
    }

    /// True while a sweep of `kind` runs or is queued.
    pub fn is_clearing(&self, kind: ClearKind) -> bool {
        let state = Self::lock(&self.shared);
        state.current == Some(kind) || state.tasks.contains(&kind)
    }

    fn run(shared: &Shared, targets: &ClearTargets, events: &Sender<ClearEvent>) {
        loop {
            let (kind, files) = {
                let mut state = Self::lock(shared);
                while state.tasks.is_empty() && !state.stopping {
                    state = shared.1.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                if state.stopping {
                    break;
                }
                let Some(kind) = state.tasks.pop_front() else {
                    continue;
                };
                let files = if kind == ClearKind::Storage { mem::take(&mut state.storage_files) } else { Vec::new() };
                state.current = Some(kind);
                state.superseded = false;
                (kind, files)
            };

            let success = Self::sweep(kind, targets, &files);

            let (superseded, more_pending) = {
                let mut state = Self::lock(shared);
                state.current = None;
                (mem::take(&mut state.superseded), !state.tasks.is_empty())
            };

            if superseded {
                debug!(%kind, "clear superseded, not reporting");
                continue;
            }
            info!(%kind, success, more_pending, "clear finished");
            if events.send(ClearEvent { kind, success, more_pending }).is_err() {
                break;
            }
        }
        debug!("clear worker exiting");
    }

    fn sweep(kind: ClearKind, targets: &ClearTargets, files: &[PathBuf]) -> bool {
        match kind {
            ClearKind::All => {
                let data = sweep::remove_tree(&targets.data_dir, false);
                let temp = sweep::remove_tree(&targets.temp_dir, false);
                data && temp
            }
            ClearKind::Storage => sweep::remove_files(files),
            ClearKind::Downloads => sweep::remove_tree(&targets.temp_dir, true),
        }
    }

    /// Stops after the running sweep; queued requests are dropped.
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut state = Self::lock(&self.shared);
            state.stopping = true;
            state.tasks.clear();
            state.storage_files.clear();
        }
        self.shared.1.notify_all();

        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| anyhow!("clear worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ClearManager {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "clear manager shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    fn targets(root: &std::path::Path) -> ClearTargets {
        let targets = ClearTargets { data_dir: root.join("data"), temp_dir: root.join("temp") };
        fs::create_dir_all(&targets.data_dir).unwrap();
        fs::create_dir_all(&targets.temp_dir).unwrap();
        targets
    }

    fn next_event(manager: &ClearManager) -> ClearEvent {
        manager.events().recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_storage_then_all_reports_once() {
        let dir = tempdir().unwrap();
        let targets = targets(dir.path());
        let blob = targets.data_dir.join("0000000000000001s");
        fs::write(&blob, b"blob").unwrap();

        let mut manager = ClearManager::start(targets.clone()).unwrap();
        let accepted = manager.request_many([(ClearKind::Storage, vec![blob]), (ClearKind::All, Vec::new())]);
        assert_eq!(accepted, 2);

        let event = next_event(&manager);
        assert_eq!(event.kind, ClearKind::All);
        assert!(event.fully_done());

        manager.stop().unwrap();
        assert!(manager.poll_events().is_empty());
        assert!(!targets.data_dir.exists());
    }

    #[test]
    fn test_all_absorbs_queued_requests() {
        let dir = tempdir().unwrap();
        let mut manager = ClearManager::start(targets(dir.path())).unwrap();

        let requests = [(ClearKind::All, Vec::new()), (ClearKind::All, Vec::new()), (ClearKind::Downloads, Vec::new()), (ClearKind::Storage, Vec::new())];
        assert_eq!(manager.request_many(requests), 1);

        let event = next_event(&manager);
        assert_eq!(event.kind, ClearKind::All);
        assert!(!event.more_pending);

        manager.stop().unwrap();
        assert!(manager.poll_events().is_empty());
    }

    #[test]
    fn test_storage_requests_merge_snapshots() {
        let dir = tempdir().unwrap();
        let targets = targets(dir.path());
        let first = targets.data_dir.join("Fs");
        let second = targets.data_dir.join("Gs");
        fs::write(&first, b"1").unwrap();
        fs::write(&second, b"2").unwrap();

        let mut manager = ClearManager::start(targets).unwrap();
        let accepted = manager.request_many([(ClearKind::Storage, vec![first.clone()]), (ClearKind::Storage, vec![second.clone()])]);
        assert_eq!(accepted, 2);

        let event = next_event(&manager);
        assert_eq!(event.kind, ClearKind::Storage);
        assert!(event.fully_done());
        assert!(!first.exists() && !second.exists());

        manager.stop().unwrap();
        assert!(manager.poll_events().is_empty());
    }

    #[test]
    fn test_downloads_empties_temp_only() {
        let dir = tempdir().unwrap();
        let targets = targets(dir.path());
        fs::write(targets.temp_dir.join("partial.bin"), b"x").unwrap();
        fs::write(targets.data_dir.join("map0"), b"x").unwrap();

        let manager = ClearManager::start(targets.clone()).unwrap();
        manager.request(ClearKind::Downloads, Vec::new());

        let event = next_event(&manager);
        assert_eq!(event.kind, ClearKind::Downloads);
        assert!(event.success);
        assert!(!manager.is_busy());
        assert!(!manager.is_clearing(ClearKind::Downloads));
        assert!(targets.temp_dir.exists());
        assert!(!targets.temp_dir.join("partial.bin").exists());
        assert!(targets.data_dir.join("map0").exists());
    }
}
