//! Per-thread nonce search loop.
//!
//! Each worker runs in a dedicated `std::thread` so the CPU-bound loop
//! never blocks the async runtime. A worker waits for a job, builds the
//! 64-byte header for its extraNonce, then walks the full signed 32-bit
//! nonce range. Job and difficulty updates are published by the
//! distributor into a mutex-guarded slot; the job-changed flag is a
//! coalescing edge trigger, so any number of updates between checks
//! collapse into one rebuild from the current job.
//!
//! Cancellation is cooperative: a flag checked once per nonce while
//! searching, and a condition variable bounded by [`IDLE_WAIT`] while
//! jobless. A hash computation in progress is never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::job::{Candidate, Job, NONCE_OFFSET, TIMESTAMP_OFFSET};
use crate::pow::{PairDigest, PowHash};
use crate::tracing::prelude::*;
use crate::u256::U256;

/// Share target in effect until the pool's first difficulty notification:
/// 0x000000FF followed by forty F hex digits (a 24-byte threshold).
pub const DEFAULT_SHARE_TARGET: U256 = U256 {
    low: u128::MAX,
    high: 0x00ff_ffff_ffff,
};

/// Bound on the jobless wait between shutdown checks.
pub const IDLE_WAIT: Duration = Duration::from_secs(3);

/// How many nonce attempts between in-place timestamp refreshes.
const TIMESTAMP_REFRESH_INTERVAL: u32 = 10_000;

/// Handle to one search thread.
///
/// The distributor is the single writer of the job/target slot; the
/// worker thread is its single reader.
pub struct Worker {
    state: Arc<WorkerState>,
    extra_nonce: u64,
    thread: Option<thread::JoinHandle<()>>,
}

/// Latest-value slot published by the distributor.
struct Slot {
    job: Option<Arc<Job>>,
    target: Arc<U256>,
}

struct WorkerState {
    slot: Mutex<Slot>,
    wake: Condvar,
    job_changed: AtomicBool,
    running: AtomicBool,
}

impl Worker {
    /// Spawn a search thread with a fixed extraNonce.
    pub fn spawn(
        index: usize,
        extra_nonce: u64,
        candidate_tx: mpsc::Sender<Candidate>,
        pow: Arc<dyn PowHash>,
        digest: Arc<dyn PairDigest>,
    ) -> Self {
        let state = Arc::new(WorkerState {
            slot: Mutex::new(Slot {
                job: None,
                target: Arc::new(DEFAULT_SHARE_TARGET),
            }),
            wake: Condvar::new(),
            job_changed: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });

        let thread_state = state.clone();
        let thread = thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || {
                run_search_loop(thread_state, extra_nonce, candidate_tx, pow, digest);
            })
            .expect("failed to spawn worker thread");

        Self {
            state,
            extra_nonce,
            thread: Some(thread),
        }
    }

    /// This worker's extraNonce, stable for its lifetime.
    pub fn extra_nonce(&self) -> u64 {
        self.extra_nonce
    }

    /// Replace the current job wholesale and signal the change.
    pub fn set_job(&self, job: Arc<Job>) {
        {
            let mut slot = self.state.slot.lock().unwrap();
            slot.job = Some(job);
        }
        self.state.job_changed.store(true, Ordering::Relaxed);
        self.state.wake.notify_all();
    }

    /// Replace the share target wholesale.
    ///
    /// Picked up by the worker at the next rebuild or timestamp refresh;
    /// intermediate values may be skipped, the latest never is.
    pub fn set_target(&self, target: Arc<U256>) {
        let mut slot = self.state.slot.lock().unwrap();
        slot.target = target;
    }

    /// Request cooperative shutdown.
    pub fn request_stop(&self) {
        self.state.running.store(false, Ordering::Relaxed);
        self.state.wake.notify_all();
    }

    /// Stop the worker and join its thread.
    pub fn join(mut self) {
        self.request_stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// The search loop proper.
///
/// State machine: wait for a job, build a header, walk the nonce range.
/// Exhausting the range without a job change restarts immediately against
/// the same job with a fresh timestamp.
fn run_search_loop(
    state: Arc<WorkerState>,
    extra_nonce: u64,
    candidate_tx: mpsc::Sender<Candidate>,
    pow: Arc<dyn PowHash>,
    digest: Arc<dyn PairDigest>,
) {
    while state.running.load(Ordering::Relaxed) {
        // Consume any pending change signal before snapshotting, so an
        // update landing after the snapshot always leaves the flag set.
        state.job_changed.store(false, Ordering::Relaxed);

        // Snapshot the current job, or idle-wait for one.
        let (job, mut target) = {
            let guard = state.slot.lock().unwrap();
            match guard.job.clone() {
                Some(job) => (job, guard.target.clone()),
                None => {
                    let _guard = state.wake.wait_timeout(guard, IDLE_WAIT).unwrap();
                    continue;
                }
            }
        };

        let mut timestamp = unix_time();
        let mut header = match job.build_header(timestamp, extra_nonce, digest.as_ref()) {
            Ok(header) => header,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Cannot build header, waiting for next job");
                let guard = state.slot.lock().unwrap();
                let _guard = state.wake.wait_timeout(guard, IDLE_WAIT).unwrap();
                continue;
            }
        };

        let mut iterations: u32 = 0;
        for nonce in i32::MIN..=i32::MAX {
            if !state.running.load(Ordering::Relaxed) {
                return;
            }

            // Consume the coalescing change signal and rebuild from the
            // now-current job.
            if state.job_changed.swap(false, Ordering::Relaxed) {
                break;
            }

            iterations += 1;
            if iterations == TIMESTAMP_REFRESH_INTERVAL {
                iterations = 0;
                timestamp = unix_time();
                header[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4]
                    .copy_from_slice(&timestamp.to_be_bytes());
                // Refresh the target along the way; staleness between
                // refreshes is benign.
                target = state.slot.lock().unwrap().target.clone();
            }

            header[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_be_bytes());

            let pow_digest = pow.hash(&header);
            if U256::from_be_slice(&pow_digest) < *target {
                debug!(
                    job_id = %job.id,
                    nonce = %format_args!("{nonce:#010x}"),
                    "Share found"
                );
                let candidate = Candidate {
                    job: job.clone(),
                    extra_nonce,
                    header,
                };
                // A share does not terminate the search; keep walking the
                // same job.
                if candidate_tx.blocking_send(candidate).is_err() {
                    return;
                }
            }
        }
        // Range exhausted or job changed: loop around and rebuild.
    }
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{header_nonce, HEADER_LEN};
    use crate::pow::Sha256Pair;
    use std::time::Instant;

    fn test_job(id: &str, height: u32) -> Arc<Job> {
        Arc::new(Job {
            id: id.to_string(),
            height,
            version: 2,
            previous_hash: vec![0x11; 12],
            previous_keystone: vec![0x22; 9],
            second_previous_keystone: vec![0x33; 9],
            intermediate_merkles: [vec![0x44; 32], vec![0x55; 32], vec![0x66; 32]],
            time: 1_600_000_000,
            difficulty: 0x1d0fffff,
        })
    }

    /// Accepts exactly the given raw nonce values with a digest of 1;
    /// everything else gets an all-FF 24-byte digest.
    struct MatchNonces(Vec<u32>);

    impl PowHash for MatchNonces {
        fn hash(&self, header: &[u8; HEADER_LEN]) -> Vec<u8> {
            if self.0.contains(&header_nonce(header)) {
                vec![1]
            } else {
                vec![0xff; 24]
            }
        }
    }

    /// Accepts any nonce for headers of the given height.
    struct MatchHeight(u32);

    impl PowHash for MatchHeight {
        fn hash(&self, header: &[u8; HEADER_LEN]) -> Vec<u8> {
            if header[0..4] == self.0.to_be_bytes() {
                vec![1]
            } else {
                vec![0xff; 24]
            }
        }
    }

    /// Never matches.
    struct NeverMatch;

    impl PowHash for NeverMatch {
        fn hash(&self, _header: &[u8; HEADER_LEN]) -> Vec<u8> {
            vec![0xff; 24]
        }
    }

    #[test]
    fn test_default_target_accepts_one_rejects_all_ff() {
        // A digest of big-endian value 1 is below the default target.
        assert!(U256::from_be_slice(&[1]) < DEFAULT_SHARE_TARGET);
        // An all-FF digest is not.
        assert!(U256::from_be_slice(&[0xff; 24]) >= DEFAULT_SHARE_TARGET);
        assert!(U256::from_be_slice(&[0xff; 32]) >= DEFAULT_SHARE_TARGET);
    }

    #[test]
    fn test_worker_emits_candidates_and_keeps_searching() {
        // The search starts at i32::MIN; accept its 2nd and 4th nonces.
        let first = (i32::MIN + 1) as u32;
        let second = (i32::MIN + 3) as u32;
        let (tx, mut rx) = mpsc::channel(8);

        let worker = Worker::spawn(
            0,
            16,
            tx,
            Arc::new(MatchNonces(vec![first, second])),
            Arc::new(Sha256Pair),
        );
        worker.set_job(test_job("job-a", 100));

        // A found share does not terminate the search: both candidates
        // arrive, in nonce order.
        let a = rx.blocking_recv().unwrap();
        assert_eq!(header_nonce(&a.header), first);
        assert_eq!(a.extra_nonce, 16);
        assert_eq!(a.job.id, "job-a");

        let b = rx.blocking_recv().unwrap();
        assert_eq!(header_nonce(&b.header), second);

        worker.join();
    }

    #[test]
    fn test_idle_shutdown_is_prompt() {
        let (tx, _rx) = mpsc::channel(1);
        let worker = Worker::spawn(0, 0, tx, Arc::new(NeverMatch), Arc::new(Sha256Pair));

        // No job was ever assigned; the condvar wake must beat the full
        // idle-wait interval.
        let started = Instant::now();
        worker.join();
        assert!(started.elapsed() < IDLE_WAIT);
    }

    #[test]
    fn test_job_change_restarts_with_new_job() {
        let (tx, mut rx) = mpsc::channel(8);

        // Only headers of job-b's height ever match.
        let worker = Worker::spawn(0, 0, tx, Arc::new(MatchHeight(200)), Arc::new(Sha256Pair));

        worker.set_job(test_job("job-a", 100));
        worker.set_job(test_job("job-b", 200));

        // Coalesced or not, the worker rebuilds from the current job and
        // finds candidates only for it.
        let c = rx.blocking_recv().unwrap();
        assert_eq!(c.job.id, "job-b");
        assert_eq!(&c.header[0..4], &200u32.to_be_bytes());

        // Every nonce of job-b matches, so the candidate channel fills up;
        // closing it unblocks the worker before the join.
        drop(rx);
        worker.join();
    }

    #[test]
    fn test_stop_while_searching() {
        let (tx, _rx) = mpsc::channel(1);
        let worker = Worker::spawn(0, 0, tx, Arc::new(NeverMatch), Arc::new(Sha256Pair));
        worker.set_job(test_job("job-a", 100));

        // Let it spin briefly, then stop; the per-nonce check makes this
        // return quickly.
        thread::sleep(Duration::from_millis(50));
        worker.join();
    }
}
