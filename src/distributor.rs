//! Worker-pool ownership, job/difficulty fan-out, and candidate fan-in.
//!
//! A distributor is created fresh per connection attempt alongside its
//! session client, and the pool is fully torn down before a new attempt
//! starts, so no job, target, or worker state leaks across sessions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::job::{header_nonce, header_timestamp, Candidate, Job};
use crate::pow::{PairDigest, PowHash};
use crate::stratum::{ClientHandle, PoolEvent};
use crate::tracing::prelude::*;
use crate::u256::U256;
use crate::worker::Worker;

/// Spacing between consecutive workers' extraNonces. Distinct worker
/// indices always yield distinct values, regardless of worker count.
const EXTRA_NONCE_STRIDE: u64 = 10;

/// Owns the worker pool for one session.
pub struct JobDistributor {
    threads: usize,
    client: ClientHandle,
    pow: Arc<dyn PowHash>,
    digest: Arc<dyn PairDigest>,
    workers: Vec<Worker>,
    candidate_tx: mpsc::Sender<Candidate>,
    candidate_rx: mpsc::Receiver<Candidate>,
}

enum Action {
    Event(Option<PoolEvent>),
    Candidate(Candidate),
    Stop,
}

impl JobDistributor {
    /// Create a distributor for a pool of `threads` workers.
    ///
    /// Workers are provisioned lazily, on the subscription
    /// acknowledgement, because their extraNonces derive from it.
    pub fn new(
        threads: usize,
        client: ClientHandle,
        pow: Arc<dyn PowHash>,
        digest: Arc<dyn PairDigest>,
    ) -> Self {
        let (candidate_tx, candidate_rx) = mpsc::channel(64);
        Self {
            threads,
            client,
            pow,
            digest,
            workers: Vec::new(),
            candidate_tx,
            candidate_rx,
        }
    }

    /// Consume session events and worker candidates until the session
    /// ends or shutdown is requested. The pool is torn down before
    /// returning.
    pub async fn run(
        &mut self,
        event_rx: &mut mpsc::Receiver<PoolEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let action = tokio::select! {
                event = event_rx.recv() => Action::Event(event),
                Some(candidate) = self.candidate_rx.recv() => Action::Candidate(candidate),
                _ = shutdown.cancelled() => Action::Stop,
            };

            match action {
                Action::Event(Some(PoolEvent::Subscribed {
                    extra_nonce,
                    extra_nonce_size,
                })) => self.start_workers(extra_nonce, extra_nonce_size),
                Action::Event(Some(PoolEvent::NewJob(job))) => self.broadcast_job(job),
                Action::Event(Some(PoolEvent::DifficultyChanged(target))) => {
                    self.broadcast_target(target)
                }
                Action::Event(Some(PoolEvent::Disconnected)) | Action::Event(None) => break,
                Action::Candidate(candidate) => self.submit(candidate),
                Action::Stop => break,
            }
        }

        self.shutdown();
    }

    /// Provision and start the pool: worker `i` gets the extraNonce
    /// `base + i * 10`.
    fn start_workers(&mut self, base: u64, extra_nonce_size: usize) {
        if !self.workers.is_empty() {
            warn!("Duplicate subscription acknowledgement, workers already running");
            return;
        }

        info!(
            count = self.threads,
            base = %format_args!("{base:#x}"),
            extra_nonce_size,
            "Provisioning workers"
        );
        for i in 0..self.threads {
            let extra_nonce = base + i as u64 * EXTRA_NONCE_STRIDE;
            self.workers.push(Worker::spawn(
                i,
                extra_nonce,
                self.candidate_tx.clone(),
                self.pow.clone(),
                self.digest.clone(),
            ));
        }
    }

    /// Broadcast a new job, replacing each worker's current one wholesale.
    fn broadcast_job(&self, job: Job) {
        debug!(job_id = %job.id, height = job.height, "New job");
        let job = Arc::new(job);
        for worker in &self.workers {
            worker.set_job(job.clone());
        }
    }

    /// Broadcast a new share target.
    fn broadcast_target(&self, target: U256) {
        debug!("Difficulty changed");
        let target = Arc::new(target);
        for worker in &self.workers {
            worker.set_target(target.clone());
        }
    }

    /// Forward one found candidate as a submit call.
    ///
    /// The submitted timestamp and nonce are read back from the fixed
    /// offsets of the candidate's 64-byte header, exactly as hashed.
    fn submit(&self, candidate: Candidate) {
        let timestamp = header_timestamp(&candidate.header);
        let nonce = header_nonce(&candidate.header);

        info!(
            job_id = %candidate.job.id,
            nonce = %format_args!("{nonce:#010x}"),
            "Submitting share"
        );

        if let Err(e) =
            self.client
                .submit_share(&candidate.job.id, candidate.extra_nonce, timestamp, nonce)
        {
            warn!(error = %e, "Failed to submit share");
        }
    }

    /// Stop and join every worker.
    ///
    /// Idempotent: safe to invoke repeatedly or before any worker was
    /// started.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        info!(count = self.workers.len(), "Stopping workers");
        for worker in &self.workers {
            worker.request_stop();
        }
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }

    #[cfg(test)]
    fn extra_nonces(&self) -> Vec<u64> {
        self.workers.iter().map(|w| w.extra_nonce()).collect()
    }
}
