// SPDX-License-Identifier: Apache-2.0
//! foam-worker: the single-slot geometry worker (C2).
//!
//! A dedicated background thread owns the [`foam_geom::GeometryAdapter`] and
//! blocks on its input channel when idle; [`GeometryWorker::try_submit`] and
//! [`GeometryWorker::try_poll`] never block the caller beyond an atomic
//! flag/channel check, so the main loop never stalls on geometry. The
//! channel discipline (capacity exactly one in each direction)
//! enforces the single-in-flight protocol at the type level: a second
//! `try_submit` while one request is outstanding is rejected before it ever
//! touches the channel.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

use foam_core::particle::ParticleSnapshot;
use foam_core::{GeomFlag, GeometryResult};
use foam_geom::GeometryAdapter;
use foam_geom::GeometryBackend;

/// Build a zero-metric, all-failed result of length `n`, used both for
/// backend catastrophes (caught by the adapter) and worker-internal panics
/// (caught here, one layer further out).
fn total_failure(n: usize, elapsed_ms: f64) -> GeometryResult {
    GeometryResult {
        volume: vec![0.0; n],
        surface: vec![0.0; n],
        faces: vec![0; n],
        flags: vec![GeomFlag::TriangulationFail; n],
        elapsed_ms,
    }
}

/// A single-producer/single-consumer background worker around a
/// [`GeometryAdapter`], with at most one request in flight at a time.
pub struct GeometryWorker {
    req_tx: SyncSender<ParticleSnapshot>,
    res_rx: Receiver<GeometryResult>,
    handle: Option<JoinHandle<()>>,
    pending: bool,
}

impl GeometryWorker {
    /// Spawn a new worker thread owning a freshly constructed adapter.
    ///
    /// `make_adapter` is called once, on the worker thread, so the adapter's
    /// one-time backend init runs there; recycling (see [`Self::recycle`])
    /// calls it again for the replacement worker, clearing any cached
    /// backend state as the design notes require.
    pub fn spawn<B, F>(make_adapter: F) -> Self
    where
        B: GeometryBackend + 'static,
        F: FnOnce() -> GeometryAdapter<B> + Send + 'static,
    {
        let (req_tx, req_rx) = sync_channel::<ParticleSnapshot>(1);
        let (res_tx, res_rx) = sync_channel::<GeometryResult>(1);

        let handle = std::thread::Builder::new()
            .name("foam-geometry-worker".to_owned())
            .spawn(move || worker_loop(make_adapter(), &req_rx, &res_tx))
            .ok();

        Self {
            req_tx,
            res_rx,
            handle,
            pending: false,
        }
    }

    /// Accept `snapshot` for background processing iff no request is
    /// currently in flight. Never blocks.
    pub fn try_submit(&mut self, snapshot: ParticleSnapshot) -> bool {
        if self.pending {
            return false;
        }
        match self.req_tx.try_send(snapshot) {
            Ok(()) => {
                self.pending = true;
                true
            }
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// Return a completed result if one is ready, else `None`. Never blocks.
    /// Consuming a result re-arms acceptance for the next [`Self::try_submit`].
    pub fn try_poll(&mut self) -> Option<GeometryResult> {
        match self.res_rx.try_recv() {
            Ok(result) => {
                self.pending = false;
                Some(result)
            }
            Err(_) => None,
        }
    }

    /// Whether a request is currently outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Tear down this worker, discarding any in-flight result, and return a
    /// freshly spawned replacement. Callers must only invoke this while
    /// `!is_pending()`; recycling must wait for idle.
    #[must_use]
    pub fn recycle<B, F>(self, make_adapter: F) -> Self
    where
        B: GeometryBackend + 'static,
        F: FnOnce() -> GeometryAdapter<B> + Send + 'static,
    {
        debug_assert!(
            !self.pending,
            "recycle must only run while the worker is idle"
        );
        self.shutdown_thread();
        Self::spawn(make_adapter)
    }

    /// Stop the worker thread, discarding any in-flight result. No further
    /// `try_submit` calls are meaningful after this; the struct should be
    /// dropped.
    pub fn shutdown(mut self) {
        self.shutdown_thread();
    }

    fn shutdown_thread(&mut self) {
        // Dropping the sender closes the channel; the worker thread's blocking
        // `recv()` observes disconnection and exits on its own.
        let (dummy_tx, _dummy_rx) = sync_channel::<ParticleSnapshot>(0);
        let old_tx = std::mem::replace(&mut self.req_tx, dummy_tx);
        drop(old_tx);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GeometryWorker {
    fn drop(&mut self) {
        self.shutdown_thread();
    }
}

/// Body of the dedicated background thread: block on the request channel,
/// run the adapter synchronously, forward the result. Any panic escaping
/// the adapter call (which itself already catches backend panics — this is
/// a second, worker-level safety net) is converted into a total-failure
/// result so the scheduler always makes forward progress.
fn worker_loop<B: GeometryBackend>(
    adapter: GeometryAdapter<B>,
    req_rx: &Receiver<ParticleSnapshot>,
    res_tx: &SyncSender<GeometryResult>,
) {
    while let Ok(snapshot) = req_rx.recv() {
        let n = snapshot.len();
        let start = std::time::Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            adapter.compute(&snapshot.positions, &snapshot.weights)
        }));
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(input_err)) => {
                tracing::warn!(error = %input_err, "geometry adapter rejected malformed snapshot");
                total_failure(n, elapsed_ms)
            }
            Err(_panic) => {
                tracing::error!("geometry worker caught a panic escaping the adapter");
                total_failure(n, elapsed_ms)
            }
        };

        // The single-slot protocol guarantees this channel is empty here:
        // a result is only produced after a `try_submit` succeeded, and
        // `try_submit` refuses a second request until this one is polled.
        if res_tx.try_send(result).is_err() {
            tracing::error!("geometry worker result channel unexpectedly full; dropping result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foam_geom::backend::{BackendBatchOutput, GeometryBackend};
    use foam_geom::SyntheticPeriodicBackend;
    use foam_core::Point3;

    fn snapshot(n: usize, tick: u64) -> ParticleSnapshot {
        let positions: Vec<Point3> = (0..n).map(|i| [(i as f64) / n as f64, 0.1, 0.1]).collect();
        let radii = vec![0.02; n];
        ParticleSnapshot::new(tick, &positions, &radii)
    }

    fn wait_for_result(worker: &mut GeometryWorker) -> GeometryResult {
        loop {
            if let Some(result) = worker.try_poll() {
                return result;
            }
            std::thread::yield_now();
        }
    }

    #[test]
    fn submit_then_poll_round_trips_a_result() {
        let mut worker =
            GeometryWorker::spawn(|| GeometryAdapter::new(SyntheticPeriodicBackend, 1000, 256, 1e-8, 1.0));
        assert!(worker.try_submit(snapshot(8, 0)));
        let result = wait_for_result(&mut worker);
        assert_eq!(result.len(), 8);
        worker.shutdown();
    }

    #[test]
    fn single_flight_rejects_second_submit_while_pending() {
        let mut worker =
            GeometryWorker::spawn(|| GeometryAdapter::new(SyntheticPeriodicBackend, 1000, 256, 1e-8, 1.0));
        assert!(worker.try_submit(snapshot(8, 0)));
        assert!(!worker.try_submit(snapshot(8, 1)), "second submit must be rejected while pending");
        let _ = wait_for_result(&mut worker);
        assert!(worker.try_submit(snapshot(8, 2)), "submit should succeed again once idle");
        worker.shutdown();
    }

    struct PanickingBackend;
    impl GeometryBackend for PanickingBackend {
        fn compute_batch(&self, _: &[Point3], _: &[f64], _: f64) -> BackendBatchOutput {
            panic!("boom");
        }
    }

    #[test]
    fn backend_catastrophe_still_yields_a_forwarded_result() {
        let mut worker =
            GeometryWorker::spawn(|| GeometryAdapter::new(PanickingBackend, 1000, 256, 1e-8, 1.0));
        assert!(worker.try_submit(snapshot(4, 0)));
        let result = wait_for_result(&mut worker);
        assert!(result.is_total_failure());
        worker.shutdown();
    }

    #[test]
    fn recycle_produces_a_fresh_idle_worker() {
        let worker =
            GeometryWorker::spawn(|| GeometryAdapter::new(SyntheticPeriodicBackend, 1000, 256, 1e-8, 1.0));
        let mut worker =
            worker.recycle(|| GeometryAdapter::new(SyntheticPeriodicBackend, 1000, 256, 1e-8, 1.0));
        assert!(!worker.is_pending());
        assert!(worker.try_submit(snapshot(4, 0)));
        let _ = wait_for_result(&mut worker);
        worker.shutdown();
    }
}
