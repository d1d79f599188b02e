//! Fan one command out over many argument sets.
//!
//! At most `pool_size` runs are in flight. Results are buffered until every
//! earlier batch has been handed out, so callers always see batch `i` before
//! batch `i + 1` no matter which finished first.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, trace};

use crate::error::Result;
use crate::signals;

use super::output::Stdout;
use super::prototype::Prototype;
use super::stage::Options;

/// Pool settings for [`Prototype::map`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MapOptions {
    /// Concurrent runs; defaults to the number of available processors.
    pub pool_size: Option<usize>,
    /// Kill the pool and stop at the first failed batch.
    pub stop_on_failure: bool,
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    fn workers(&self) -> usize {
        self.pool_size
            .unwrap_or_else(|| thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1))
            .max(1)
    }
}

type Finished = (usize, Result<Stdout>);

/// Shared between the iterator and its workers. Once `stopped` is set no
/// worker starts a batch, and one that already spawned kills its own pids.
#[derive(Default)]
struct Pool {
    stopped: bool,
    live: HashMap<usize, Vec<u32>>,
}

fn terminate(index: usize, pids: Vec<u32>) {
    for pid in pids {
        trace!(batch = index, pid, "terminating");
        let _ = signals::terminate(pid);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Results of [`Prototype::map`], in submission order.
///
/// With `stop_on_failure`, the first failed batch is yielded as an error
/// (even if earlier batches are still outstanding), every running process
/// gets `SIGTERM`, and the iterator ends.
pub struct MapResults {
    prototype: Prototype,
    pending: VecDeque<(usize, Vec<String>)>,
    workers: usize,
    in_flight: usize,
    stop_on_failure: bool,
    stopped: bool,
    total: usize,
    next: usize,
    done: BTreeMap<usize, Result<Stdout>>,
    pool: Arc<Mutex<Pool>>,
    tx: Sender<Finished>,
    rx: Receiver<Finished>,
}

impl MapResults {
    pub(crate) fn start(prototype: Prototype, batches: Vec<Vec<String>>, options: MapOptions) -> Self {
        let (tx, rx) = mpsc::channel();
        let total = batches.len();
        let workers = options.workers();
        debug!(command = prototype.name(), batches = total, workers, "starting batch map");

        let mut results = MapResults {
            prototype,
            pending: batches.into_iter().enumerate().collect(),
            workers,
            in_flight: 0,
            stop_on_failure: options.stop_on_failure,
            stopped: false,
            total,
            next: 0,
            done: BTreeMap::new(),
            pool: Arc::default(),
            tx,
            rx,
        };
        results.fill();
        results
    }

    /// Start queued batches until the pool is full.
    fn fill(&mut self) {
        while self.in_flight < self.workers {
            let Some((index, args)) = self.pending.pop_front() else {
                break;
            };
            trace!(batch = index, "batch started");
            let pipeline = self.prototype.call_with(args, Options::new().run_now(false));
            let tx = self.tx.clone();
            let pool = Arc::clone(&self.pool);
            self.in_flight += 1;

            thread::spawn(move || {
                if lock(&pool).stopped {
                    return;
                }
                let result = pipeline.bg().and_then(|running| {
                    {
                        let mut pool = lock(&pool);
                        if pool.stopped {
                            terminate(index, running.pids());
                        } else {
                            pool.live.insert(index, running.pids());
                        }
                    }
                    let result = running.finish();
                    lock(&pool).live.remove(&index);
                    result
                });
                // The receiver is gone if the caller dropped the iterator.
                let _ = tx.send((index, result));
            });
        }
    }

    /// Terminate whatever is running and forget the queue.
    fn stop(&mut self) {
        self.stopped = true;
        self.pending.clear();
        let mut pool = lock(&self.pool);
        pool.stopped = true;
        for (index, pids) in pool.live.drain() {
            terminate(index, pids);
        }
    }
}

impl Iterator for MapResults {
    type Item = Result<Stdout>;

    fn next(&mut self) -> Option<Result<Stdout>> {
        loop {
            if self.stopped {
                return None;
            }
            if let Some(result) = self.done.remove(&self.next) {
                self.next += 1;
                return Some(result);
            }
            if self.next >= self.total {
                return None;
            }

            let (index, result) = self.rx.recv().ok()?;
            self.in_flight -= 1;
            trace!(batch = index, "batch finished");

            let failed = match &result {
                Ok(out) => out.failed(),
                Err(_) => true,
            };
            if self.stop_on_failure && failed {
                debug!(batch = index, "batch failed, stopping");
                self.stop();
                return Some(result.and_then(Stdout::check));
            }

            self.done.insert(index, result);
            self.fill();
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stage::ExecMode;
    use crate::engine::state::Context;
    use crate::error::Error;
    use std::time::{Duration, Instant};

    fn sh() -> Prototype {
        Prototype::new(Context::from_env(), "sh", "sh", Vec::new(), ExecMode::Deferred)
    }

    #[test]
    fn test_results_in_submission_order() {
        let batches = vec![
            vec!["-c 'sleep 0.4; echo 0'"],
            vec!["-c 'echo 1'"],
            vec!["-c 'sleep 0.2; echo 2'"],
            vec!["-c 'echo 3'"],
            vec!["-c 'echo 4'"],
        ];
        let results: Vec<String> = sh()
            .map(batches, MapOptions::new().pool_size(2))
            .map(|r| r.unwrap().into_string())
            .collect();
        assert_eq!(results, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_failures_are_results_by_default() {
        let batches = vec![vec!["-c 'exit 3'"], vec!["-c 'echo ok'"]];
        let results: Vec<Stdout> = sh()
            .map(batches, MapOptions::new().pool_size(1))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results[0].returncodes(), &[3]);
        assert_eq!(results[1], "ok");
    }

    #[test]
    fn test_stop_on_failure_kills_pool() {
        let batches = vec![
            vec!["-c 'sleep 0.1; exit 3'"],
            vec!["-c 'exec sleep 10'"],
            vec!["-c 'exec sleep 10'"],
            vec!["-c 'echo never'"],
        ];
        let start = Instant::now();
        let mut results = sh().map(batches, MapOptions::new().pool_size(3).stop_on_failure(true));

        match results.next() {
            Some(Err(Error::Pipeline { returncodes, .. })) => assert_eq!(returncodes, vec![3]),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(results.next().is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_reaches_batches_still_starting() {
        let dir = tempfile::tempdir().unwrap();
        let mut batches = vec![vec!["-c 'exit 3'".to_string()]];
        for n in 1..8 {
            let pidfile = dir.path().join(n.to_string());
            batches.push(vec![format!("-c 'echo $$ > {}; exec sleep 30'", pidfile.display())]);
        }
        let mut results = sh().map(batches, MapOptions::new().pool_size(8).stop_on_failure(true));
        assert!(matches!(results.next(), Some(Err(Error::Pipeline { .. }))));
        assert!(results.next().is_none());

        // Let late starters write their pid before checking.
        std::thread::sleep(Duration::from_millis(300));
        let deadline = Instant::now() + Duration::from_secs(5);
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let text = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            let Ok(pid) = text.trim().parse::<i32>() else {
                continue;
            };
            let pid = nix::unistd::Pid::from_raw(pid);
            while nix::sys::signal::kill(pid, None).is_ok() {
                assert!(Instant::now() < deadline, "batch process {pid} outlived the stop");
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }

    #[test]
    fn test_empty_batches() {
        let batches: Vec<Vec<String>> = Vec::new();
        assert_eq!(sh().map(batches, MapOptions::new()).count(), 0);
    }
}
