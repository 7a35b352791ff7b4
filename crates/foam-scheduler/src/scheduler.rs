// SPDX-License-Identifier: Apache-2.0
//! The FREEZE/MEASURE/ADJUST/RELAX cycle FSM (C4).
//!
//! [`Scheduler::tick()`] is the single per-frame entry point; everything else
//! on this type is either construction, configuration, or shutdown.

use std::sync::Arc;

use foam_core::{ConfigError, ParticleSnapshot, PartialSchedulerConfig, PendingRequest, SchedulerConfig};
use foam_geom::{GeometryAdapter, GeometryBackend};
use foam_worker::GeometryWorker;

use crate::stepper::DynamicsStepper;
use crate::telemetry::{TelemetryHandle, TelemetrySnapshot};

/// Drives one [`DynamicsStepper`] through repeated FREEZE/MEASURE/ADJUST/RELAX
/// cycles, bridging it to a background [`GeometryWorker`] over the
/// single-in-flight protocol.
///
/// `tick()` is the only method an embedder calls every frame; `set_config`,
/// `telemetry`, and `shutdown` are called as needed from any thread holding
/// the relevant handle (telemetry reads only need a [`TelemetryHandle`]
/// clone, not `&Scheduler`).
pub struct Scheduler<S> {
    stepper: S,
    worker: Option<GeometryWorker>,
    respawn: Box<dyn Fn() -> GeometryWorker + Send + Sync>,
    recycle: Box<dyn Fn(GeometryWorker) -> GeometryWorker + Send + Sync>,
    config: SchedulerConfig,
    pending: Option<PendingRequest>,
    tick_index: u64,
    results_seen: u32,
    telemetry: TelemetryHandle,
    last_distribution: foam_controller::IqDistribution,
    last_t_geom_ms: f64,
    last_flags_nonzero_count: usize,
    shut_down: bool,
}

impl<S: DynamicsStepper> Scheduler<S> {
    /// Build a scheduler around `stepper`, validating `config` up front.
    ///
    /// `make_backend` is called once per worker spawn (initial spawn, plus
    /// every later recycle) to produce a fresh [`GeometryBackend`] instance,
    /// wrapped in a freshly constructed [`GeometryAdapter`] using `config`'s
    /// construction-time bounds (`n_max`, `chunk_max`, `w_min`, `w_max`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation; the scheduler is
    /// not constructed and no worker thread is spawned.
    pub fn new<B, F>(stepper: S, mut config: SchedulerConfig, make_backend: F) -> Result<Self, ConfigError>
    where
        B: GeometryBackend + 'static,
        F: Fn() -> B + Send + Sync + 'static,
    {
        config.validate()?;
        config.k = config.k_initial;

        let n_max = config.n_max;
        let chunk_max = config.chunk_max;
        let w_min = config.w_min;
        let w_max = config.w_max;
        let make_backend = Arc::new(make_backend);

        let respawn_backend = Arc::clone(&make_backend);
        let respawn: Box<dyn Fn() -> GeometryWorker + Send + Sync> = Box::new(move || {
            let make_backend = Arc::clone(&respawn_backend);
            GeometryWorker::spawn(move || GeometryAdapter::new(make_backend(), n_max, chunk_max, w_min, w_max))
        });

        let recycle_backend = Arc::clone(&make_backend);
        let recycle: Box<dyn Fn(GeometryWorker) -> GeometryWorker + Send + Sync> =
            Box::new(move |worker: GeometryWorker| {
                let make_backend = Arc::clone(&recycle_backend);
                worker.recycle(move || GeometryAdapter::new(make_backend(), n_max, chunk_max, w_min, w_max))
            });

        let worker = (respawn)();

        Ok(Self {
            stepper,
            worker: Some(worker),
            respawn,
            recycle,
            config,
            pending: None,
            tick_index: 0,
            results_seen: 0,
            telemetry: TelemetryHandle::new(),
            last_distribution: foam_controller::IqDistribution::default(),
            last_t_geom_ms: 0.0,
            last_flags_nonzero_count: 0,
            shut_down: false,
        })
    }

    /// A cloneable handle to this scheduler's telemetry. Safe to read from
    /// any thread; the scheduler itself remains the sole writer.
    #[must_use]
    pub fn telemetry_handle(&self) -> TelemetryHandle {
        self.telemetry.clone()
    }

    /// The most recently published telemetry snapshot.
    #[must_use]
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.read()
    }

    /// Apply a partial configuration update to the live-tunable parameters.
    ///
    /// A rejected update leaves the scheduler's configuration completely
    /// unchanged: validation runs against the merged result before anything
    /// is committed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the merged configuration would be invalid.
    pub fn set_config(&mut self, partial: &PartialSchedulerConfig) -> Result<(), ConfigError> {
        self.config.apply_partial(partial)
    }

    /// Read-only access to the current configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one FREEZE/MEASURE/ADJUST/RELAX cycle.
    ///
    /// # Panics
    ///
    /// Panics if called after [`Self::shutdown`]; `tick()` is not a permitted
    /// call on a terminated scheduler.
    pub fn tick(&mut self) {
        assert!(!self.shut_down, "tick() called after shutdown()");

        // Step 1: dynamics always advance.
        self.stepper.relax_step();

        // Step 2: poll a pending request.
        if self.pending.is_some() {
            self.poll_and_adjust();
        }

        // Step 3: submit a new snapshot on a cadence boundary.
        let on_cadence_boundary =
            self.tick_index > 0 && self.tick_index % u64::from(self.config.k) == 0;
        if self.pending.is_none() && on_cadence_boundary {
            self.try_submit_snapshot();
        }

        // Step 4: advance the tick counter.
        self.tick_index += 1;

        // Step 5: publish telemetry reflecting this tick's final state.
        self.publish_telemetry();
    }

    /// Terminal shutdown: stop the worker, drop any in-flight result, and
    /// cease telemetry publication. No subsequent `tick()` is permitted.
    pub fn shutdown(mut self) {
        self.shut_down = true;
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn poll_and_adjust(&mut self) {
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        let Some(result) = worker.try_poll() else {
            return;
        };
        let Some(req) = self.pending.take() else {
            return;
        };

        let out = foam_controller::adjust(&result, &req.prior_radii, &self.config);
        self.stepper.set_radii(&out.r_new);

        self.last_distribution = foam_controller::distribution(&out.iq, self.config.iq_min, self.config.iq_max);
        self.last_t_geom_ms = result.elapsed_ms;
        self.last_flags_nonzero_count = result.flags_nonzero_count();

        self.adapt_cadence(result.elapsed_ms);

        self.results_seen += 1;
        if self.results_seen >= self.config.recycle_every {
            self.recycle_worker();
            self.results_seen = 0;
        }

        tracing::debug!(
            tick = self.tick_index,
            t_geom_ms = result.elapsed_ms,
            dampened = out.dampened,
            renormalised = out.renormalised,
            flags_nonzero = self.last_flags_nonzero_count,
            "ADJUST completed"
        );
    }

    fn adapt_cadence(&mut self, t_geom_ms: f64) {
        if !self.config.auto_cadence {
            return;
        }
        let cfg = &mut self.config;
        if t_geom_ms > 2.0 * cfg.t_target_ms && cfg.k < cfg.k_max {
            cfg.k = (cfg.k + cfg.delta_k_up).min(cfg.k_max);
        } else if t_geom_ms < cfg.t_target_ms && cfg.k > cfg.k_min {
            cfg.k = cfg.k.saturating_sub(cfg.delta_k_down).max(cfg.k_min);
        }
    }

    fn try_submit_snapshot(&mut self) {
        let Some(worker) = self.worker.as_mut() else {
            return;
        };

        self.stepper.freeze();
        let positions = self.stepper.get_positions01();
        let radii = self.stepper.get_radii();
        let snapshot = ParticleSnapshot::new(self.tick_index, &positions, &radii);

        if worker.try_submit(snapshot) {
            self.pending = Some(PendingRequest::new(self.tick_index, radii));
        }
        self.stepper.resume();
    }

    fn recycle_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        debug_assert!(!worker.is_pending(), "recycle must only run while idle");
        self.worker = Some((self.recycle)(worker));
        tracing::info!(tick = self.tick_index, "geometry worker recycled");
    }

    fn publish_telemetry(&self) {
        let snapshot = TelemetrySnapshot {
            tick_index: self.tick_index,
            k: self.config.k,
            pending: self.pending.is_some(),
            t_geom_ms: self.last_t_geom_ms,
            iq_mean: self.last_distribution.mean,
            iq_stddev: self.last_distribution.stddev,
            pct_below: self.last_distribution.pct_below,
            pct_within: self.last_distribution.pct_within,
            pct_above: self.last_distribution.pct_above,
            flags_nonzero_count: self.last_flags_nonzero_count,
        };
        self.telemetry.publish(snapshot);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use foam_core::Point3;
    use foam_geom::{BackendBatchOutput, SyntheticPeriodicBackend};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// A minimal `DynamicsStepper` for exercising the scheduler in isolation.
    /// Lives here rather than pulling in `foam-demo-stepper`, which itself
    /// depends on this crate.
    struct StaticStepper {
        positions: Vec<Point3>,
        radii: Vec<f64>,
        relax_calls: u64,
        frozen: bool,
    }

    impl StaticStepper {
        fn new(n: usize, radius: f64) -> Self {
            let positions = (0..n)
                .map(|i| [(i as f64) / n as f64, 0.3, 0.7])
                .collect();
            Self {
                positions,
                radii: vec![radius; n],
                relax_calls: 0,
                frozen: false,
            }
        }
    }

    impl DynamicsStepper for StaticStepper {
        fn get_positions01(&self) -> Vec<Point3> {
            self.positions.clone()
        }

        fn get_radii(&self) -> Vec<f64> {
            self.radii.clone()
        }

        fn set_radii(&mut self, radii: &[f64]) {
            self.radii.copy_from_slice(radii);
        }

        fn relax_step(&mut self) {
            self.relax_calls += 1;
        }

        fn freeze(&mut self) {
            self.frozen = true;
        }

        fn resume(&mut self) {
            self.frozen = false;
        }
    }

    fn scheduler_with(n: usize, config: SchedulerConfig) -> Scheduler<StaticStepper> {
        Scheduler::new(StaticStepper::new(n, 0.02), config, || SyntheticPeriodicBackend)
            .expect("valid config")
    }

    fn wait_for_not_pending(scheduler: &mut Scheduler<StaticStepper>, max_ticks: u32) {
        for _ in 0..max_ticks {
            scheduler.tick();
            if !scheduler.telemetry().pending {
                return;
            }
        }
        panic!("scheduler still pending after {max_ticks} ticks");
    }

    #[test]
    fn relax_step_always_advances_every_tick() {
        let mut scheduler = scheduler_with(8, SchedulerConfig {
            k_initial: 1_000,
            ..SchedulerConfig::default()
        });
        for _ in 0..5 {
            scheduler.tick();
        }
        assert_eq!(scheduler.stepper.relax_calls, 5);
    }

    /// A backend that counts invocations and sleeps long enough that several
    /// ticks elapse while one request is still outstanding.
    struct SlowCountingBackend {
        calls: Arc<AtomicU32>,
    }

    impl GeometryBackend for SlowCountingBackend {
        fn compute_batch(
            &self,
            points: &[Point3],
            weights: &[f64],
            periodicity: f64,
        ) -> BackendBatchOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            SyntheticPeriodicBackend.compute_batch(points, weights, periodicity)
        }
    }

    #[test]
    fn single_flight_holds_across_several_ticks_while_a_request_is_slow() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_for_backend = Arc::clone(&calls);
        let mut cfg = SchedulerConfig::default();
        cfg.k_initial = 1;
        cfg.auto_cadence = false;
        let mut scheduler = Scheduler::new(StaticStepper::new(8, 0.02), cfg, move || {
            SlowCountingBackend {
                calls: Arc::clone(&calls_for_backend),
            }
        })
        .expect("valid config");

        scheduler.tick(); // tick_index 0 -> 1: no boundary yet, nothing submitted.
        assert!(!scheduler.telemetry().pending);

        scheduler.tick(); // tick_index 1 -> 2: boundary fires, submission accepted.
        assert!(scheduler.telemetry().pending);

        // Several more ticks elapse while the slow backend is still running;
        // the single-flight protocol must skip every intervening boundary.
        for _ in 0..5 {
            scheduler.tick();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no second submission while one is outstanding");
        assert!(scheduler.telemetry().pending);

        wait_for_not_pending(&mut scheduler, 10_000);
        assert!(!scheduler.telemetry().pending, "result must eventually arrive and clear pending");
    }

    #[test]
    fn telemetry_reflects_a_completed_adjust_cycle() {
        let mut cfg = SchedulerConfig::default();
        cfg.k_initial = 1;
        cfg.auto_cadence = false;
        let mut scheduler = scheduler_with(16, cfg);

        wait_for_not_pending(&mut scheduler, 10_000);
        let telemetry = scheduler.telemetry();
        assert!(telemetry.t_geom_ms >= 0.0);
        assert_eq!(telemetry.flags_nonzero_count, 0, "synthetic backend should succeed on valid input");
    }

    #[test]
    fn band_idempotence_leaves_radii_unchanged_when_every_cell_is_on_target() {
        // The synthetic backend's volumes are each particle's share of total
        // weight; with uniform radii every cell gets an equal volume and
        // (by construction) IQ <= 1 with a fixed per-index distortion, which
        // is not guaranteed to sit inside the default band. Instead, widen
        // the band to [0, 1] so every defined IQ counts as "within" and no
        // update is proposed.
        let mut cfg = SchedulerConfig::default();
        cfg.k_initial = 1;
        cfg.auto_cadence = false;
        cfg.iq_min = 1e-6;
        cfg.iq_max = 1.0;
        let mut scheduler = scheduler_with(16, cfg);
        let before = scheduler.stepper.get_radii();

        wait_for_not_pending(&mut scheduler, 10_000);

        assert_eq!(scheduler.stepper.get_radii(), before);
    }

    #[test]
    fn rejected_config_update_leaves_scheduler_config_untouched() {
        let mut scheduler = scheduler_with(4, SchedulerConfig::default());
        let before = scheduler.config().clone();
        let bad = PartialSchedulerConfig {
            iq_min: Some(0.95),
            iq_max: Some(0.2),
            ..PartialSchedulerConfig::default()
        };
        assert!(scheduler.set_config(&bad).is_err());
        assert_eq!(scheduler.config(), &before);
    }

    #[test]
    fn cadence_grows_when_geometry_runs_hot() {
        let mut cfg = SchedulerConfig::default();
        cfg.k_initial = 1;
        cfg.k_max = 200;
        cfg.delta_k_up = 8;
        cfg.t_target_ms = 0.0; // any nonzero latency counts as "running hot" (> 2x target)
        cfg.auto_cadence = true;
        let mut scheduler = scheduler_with(8, cfg);
        let k_before = scheduler.config().k;

        wait_for_not_pending(&mut scheduler, 10_000);

        assert!(scheduler.config().k >= k_before);
        assert_eq!(scheduler.config().k_initial, 1, "k_initial is construction-time only");
    }

    #[test]
    #[should_panic(expected = "tick() called after shutdown()")]
    fn tick_after_shutdown_panics() {
        let mut scheduler = scheduler_with(4, SchedulerConfig::default());
        scheduler.tick();
        scheduler.shutdown();
        // `shutdown()` consumes `self`; reconstructing is the only way to
        // exercise the post-shutdown panic path without an extra handle.
        let mut scheduler = scheduler_with(4, SchedulerConfig::default());
        scheduler.shutdown();
        scheduler.tick();
    }

    #[test]
    fn worker_recycles_after_configured_result_count_without_losing_progress() {
        let mut cfg = SchedulerConfig::default();
        cfg.k_initial = 1;
        cfg.auto_cadence = false;
        cfg.recycle_every = 2;
        let mut scheduler = scheduler_with(4, cfg);

        // Drive enough cycles to trigger at least one recycle, then confirm
        // the scheduler keeps making forward progress afterward.
        for _ in 0..3 {
            wait_for_not_pending(&mut scheduler, 10_000);
            scheduler.tick();
        }
        wait_for_not_pending(&mut scheduler, 10_000);
        assert!(!scheduler.telemetry().pending);
    }

    #[test]
    fn telemetry_handle_is_readable_independent_of_scheduler_ownership() {
        let mut cfg = SchedulerConfig::default();
        cfg.k_initial = 1;
        cfg.auto_cadence = false;
        let mut scheduler = scheduler_with(4, cfg);
        let handle = scheduler.telemetry_handle();

        wait_for_not_pending(&mut scheduler, 10_000);

        assert_eq!(handle.read().tick_index, scheduler.telemetry().tick_index);
    }

    /// A panic on another thread while holding the telemetry mutex must not
    /// make subsequent reads from this thread panic too.
    #[test]
    fn telemetry_handle_recovers_from_a_poisoned_mutex() {
        let handle = TelemetryHandle::new();
        let poisoner = handle.clone();
        let joined = std::thread::spawn(move || {
            poisoner.publish(TelemetrySnapshot {
                tick_index: 7,
                ..TelemetrySnapshot::default()
            });
            panic!("simulated writer panic after publish");
        })
        .join();
        assert!(joined.is_err());

        let snapshot = handle.read();
        assert_eq!(snapshot.tick_index, 7, "last successfully published snapshot must survive");
    }
}
