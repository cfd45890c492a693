//! Control loop driver - sense, learn, decide, arbitrate, actuate, sleep.
//!
//! One cycle is [`ControlLoop::step`]; [`ControlLoop::run`] repeats it on the
//! configured cadence until the shutdown future resolves, then drops to the
//! most conservative gear and flushes the policy.

use crate::arbitration::{GearArbiter, ShiftDecision, ShiftReason};
use crate::engine::{DecisionEngine, Recommendation};
use crate::error::{GovernorError, Result, Severity};
use crate::hardware::{GearActuator, TemperatureSource};
use crate::history::TemperatureHistory;
use crate::types::{GearCatalog, GearLevel, GovernorConfig, StrategyKind};
use std::future::Future;
use std::time::{Duration, Instant};

/// Everything the loop mutates between cycles.
pub struct GovernorState {
    pub arbiter: GearArbiter,
    pub engine: DecisionEngine,
    pub history: TemperatureHistory,
}

/// What happened in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    /// Reading was a sentinel or implausible; nothing was updated
    Skipped { reading: f64 },
    Held {
        temp: f64,
        gear: GearLevel,
        recommendation: Recommendation,
    },
    Deferred {
        temp: f64,
        gear: GearLevel,
        wanted: GearLevel,
        remaining: Duration,
    },
    Shifted {
        temp: f64,
        from: GearLevel,
        to: GearLevel,
        reason: ShiftReason,
        recommendation: Recommendation,
    },
}

/// Counters over the lifetime of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStatistics {
    pub cycles: u64,
    pub skipped: u64,
    pub transient_failures: u64,
    pub shifts: u64,
    pub learning_updates: u64,
}

pub struct ControlLoop<H> {
    config: GovernorConfig,
    hardware: H,
    catalog: GearCatalog,
    state: GovernorState,
    stats: LoopStatistics,
}

impl<H: TemperatureSource + GearActuator> ControlLoop<H> {
    /// Validate configuration, enumerate gears and probe the sensor.
    ///
    /// Every error returned here is startup-fatal.
    pub fn new(config: GovernorConfig, hardware: H) -> Result<Self> {
        Self::with_engine(config, hardware, DecisionEngine::from_config)
    }

    /// Like [`ControlLoop::new`], with the decision engine built by `build`.
    pub fn with_engine<F>(config: GovernorConfig, mut hardware: H, build: F) -> Result<Self>
    where
        F: FnOnce(&GovernorConfig, &GearCatalog) -> DecisionEngine,
    {
        config.validate()?;
        let cooldown = Duration::try_from_secs_f64(config.arbitration.cooldown_secs)
            .map_err(|e| GovernorError::Config(format!("cooldown_secs out of range: {}", e)))?;

        let catalog = hardware.list_gears()?;
        if catalog.is_empty() {
            return Err(crate::error::ActuatorError::EmptyCatalog.into());
        }

        let probe = hardware.read_temperature().map_err(GovernorError::SourceUnavailable)?;
        if !is_plausible(probe, config.max_plausible_temp) {
            log::warn!("Initial temperature reading {:.1}°C looks implausible", probe);
        }

        let engine = build(&config, &catalog);
        let initial = config.initial_gear.resolve(&catalog);

        log::info!("═══════════════════════════════════════");
        log::info!("  Thermal Governor");
        log::info!("═══════════════════════════════════════");
        log::info!("Strategy: {:?}", engine.kind());
        log::info!("Gears: {} (boot at {})", catalog.len(), initial);
        log::info!("Cycle: {}ms, cooldown: {}s", config.cycle_ms, config.arbitration.cooldown_secs);
        if engine.kind() == StrategyKind::Predictive {
            let t = &config.thresholds;
            log::info!("Thresholds: danger={} hot={} warm={}", t.danger, t.hot, t.warm);
        }

        let state = GovernorState {
            arbiter: GearArbiter::new(initial, catalog.lowest(), cooldown),
            engine,
            history: TemperatureHistory::new(config.forecast.history_capacity),
        };

        Ok(Self {
            config,
            hardware,
            catalog,
            state,
            stats: LoopStatistics::default(),
        })
    }

    pub fn state(&self) -> &GovernorState {
        &self.state
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn catalog(&self) -> &GearCatalog {
        &self.catalog
    }

    pub fn current_gear(&self) -> GearLevel {
        self.state.arbiter.current()
    }

    pub fn statistics(&self) -> LoopStatistics {
        self.stats
    }

    fn apply(&mut self, level: GearLevel) -> Result<()> {
        let gear = self
            .catalog
            .get(level)
            .ok_or(crate::error::ActuatorError::UnknownGear(level.0))?;
        self.hardware.apply_gear(gear)?;
        Ok(())
    }

    /// Apply the initial gear before the first sample.
    pub fn boot(&mut self) -> Result<()> {
        if let ShiftDecision::Shift { to, .. } = self.state.arbiter.boot() {
            self.apply(to)?;
            log::info!("Boot gear applied: {}", to);
        }
        Ok(())
    }

    /// Run one control cycle at `now`.
    ///
    /// Errors are per-cycle transient failures: the caller backs off and retries.
    pub fn step(&mut self, now: Instant) -> Result<CycleReport> {
        self.stats.cycles += 1;

        let temp = match self.hardware.read_temperature() {
            Ok(temp) => temp,
            Err(e) => {
                self.stats.transient_failures += 1;
                return Err(e.into());
            }
        };

        if !is_plausible(temp, self.config.max_plausible_temp) {
            self.stats.skipped += 1;
            log::warn!("Ignoring implausible reading {:.1}°C, no update this cycle", temp);
            return Ok(CycleReport::Skipped { reading: temp });
        }

        self.state.history.push(temp);
        if self.state.engine.observe(temp).is_some() {
            self.stats.learning_updates += 1;
        }

        let stress = self.hardware.read_stress_score();
        let recommendation = self.state.engine.recommend(temp, &self.state.history, stress);
        let recommendation = Recommendation {
            gear: self.catalog.clamp(recommendation.gear),
            ..recommendation
        };

        let report = match self.state.arbiter.decide(recommendation.gear, now) {
            ShiftDecision::Hold => CycleReport::Held {
                temp,
                gear: self.current_gear(),
                recommendation,
            },
            ShiftDecision::Deferred { wanted, remaining } => CycleReport::Deferred {
                temp,
                gear: self.current_gear(),
                wanted,
                remaining,
            },
            ShiftDecision::Shift { from, to, reason } => {
                if let Err(e) = self.apply(to) {
                    self.stats.transient_failures += 1;
                    self.state.engine.record(temp, from);
                    return Err(e);
                }
                self.state.arbiter.commit(to, now);
                self.stats.shifts += 1;

                match recommendation.forecast {
                    Some(forecast) => log::info!(
                        "[SHIFT] {:.1}°C, forecast {:.1}°C: {} -> {} ({:?})",
                        temp,
                        forecast,
                        from,
                        to,
                        reason
                    ),
                    None => log::info!("[SHIFT] {:.1}°C: {} -> {} ({:?})", temp, from, to, reason),
                }

                CycleReport::Shifted {
                    temp,
                    from,
                    to,
                    reason,
                    recommendation,
                }
            }
        };

        self.state.engine.record(temp, self.current_gear());

        match recommendation.forecast {
            Some(forecast) => log::debug!(
                "[MONITOR] {:.1}°C | forecast {:.1}°C | {}",
                temp,
                forecast,
                self.current_gear()
            ),
            None => log::debug!("[MONITOR] {:.1}°C | {}", temp, self.current_gear()),
        }

        Ok(report)
    }

    /// Force the most conservative gear and flush the learned policy.
    ///
    /// Failures of the final actuation or the flush are logged; the exit stays clean.
    pub fn shutdown(&mut self, now: Instant) {
        log::info!("Shutting down: falling back to {}", self.catalog.lowest());

        if let ShiftDecision::Shift { to, .. } = self.state.arbiter.shutdown() {
            match self.apply(to) {
                Ok(()) => self.state.arbiter.commit(to, now),
                Err(e) => log::error!("Final fallback to {} failed: {}", to, e),
            }
        }

        if let Err(e) = self.state.engine.flush() {
            log::error!("Final policy flush failed: {}", e);
        }
        log::info!(
            "Governor stopped after {} cycles ({} shifts, {} skipped, {} transient failures)",
            self.stats.cycles,
            self.stats.shifts,
            self.stats.skipped,
            self.stats.transient_failures
        );
    }

    /// Boot, cycle until `shutdown` resolves, then shut down.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.boot()?;

        let cycle = Duration::from_millis(self.config.cycle_ms);
        let backoff = cycle * self.config.backoff_factor.max(1);
        tokio::pin!(shutdown);

        log::info!("Monitoring...");
        loop {
            let pause = match self.step(Instant::now()) {
                Ok(_) => cycle,
                Err(e) if e.severity() == Severity::Fatal => {
                    log::error!("Fatal error in control loop: {}", e);
                    self.shutdown(Instant::now());
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("Cycle failed ({}), retrying in {:?}", e, backoff);
                    backoff
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.shutdown(Instant::now());
        Ok(())
    }
}

/// A reading the loop may act on: finite, above zero and below `max`.
pub fn is_plausible(temp: f64, max: f64) -> bool {
    temp.is_finite() && temp > 0.0 && temp <= max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ActuatorError, SensorError};
    use crate::types::{Gear, InitialGear, Thresholds};
    use std::collections::VecDeque;

    /// Scripted readings; records every applied gear.
    struct Scripted {
        readings: VecDeque<std::result::Result<f64, ()>>,
        applied: Vec<GearLevel>,
        fail_apply: bool,
    }

    impl Scripted {
        fn new(readings: &[f64]) -> Self {
            let mut readings: VecDeque<_> = readings.iter().map(|r| Ok(*r)).collect();
            // Probe reading consumed by ControlLoop::new.
            readings.push_front(Ok(35.0));
            Self {
                readings,
                applied: Vec::new(),
                fail_apply: false,
            }
        }
    }

    impl TemperatureSource for Scripted {
        fn read_temperature(&mut self) -> std::result::Result<f64, SensorError> {
            match self.readings.pop_front() {
                Some(Ok(t)) => Ok(t),
                _ => Err(SensorError::Parse("script exhausted".to_string())),
            }
        }
    }

    impl GearActuator for Scripted {
        fn list_gears(&mut self) -> Result<GearCatalog> {
            GearCatalog::with_levels(4)
        }

        fn apply_gear(&mut self, gear: &Gear) -> std::result::Result<(), ActuatorError> {
            if self.fail_apply {
                return Err(ActuatorError::Rejected {
                    level: gear.level.0,
                    reason: "scripted failure".to_string(),
                });
            }
            self.applied.push(gear.level);
            Ok(())
        }
    }

    fn predictive(cooldown_secs: f64) -> GovernorConfig {
        GovernorConfig {
            strategy: StrategyKind::Predictive,
            initial_gear: InitialGear::Performance,
            thresholds: Thresholds { danger: 44.0, hot: 41.0, warm: 38.0 },
            arbitration: crate::types::ArbitrationConfig { cooldown_secs },
            ..Default::default()
        }
    }

    #[test]
    fn test_warm_threshold_crossing() {
        let hw = Scripted::new(&[37.5, 38.0, 39.0]);
        let mut lp = ControlLoop::new(predictive(0.0), hw).unwrap();
        lp.boot().unwrap();

        let t0 = Instant::now();
        let mut gears = Vec::new();
        for i in 0..3 {
            lp.step(t0 + Duration::from_secs(i)).unwrap();
            gears.push(lp.current_gear().0);
        }

        assert_eq!(gears, vec![4, 4, 3]);
        assert_eq!(lp.hardware().applied, vec![GearLevel(4), GearLevel(3)]);
    }

    #[test]
    fn test_emergency_during_cooldown() {
        let hw = Scripted::new(&[39.0, 45.0]);
        let mut lp = ControlLoop::new(predictive(60.0), hw).unwrap();
        lp.boot().unwrap();

        let t0 = Instant::now();
        let first = lp.step(t0).unwrap();
        assert!(matches!(first, CycleReport::Shifted { to: GearLevel(3), .. }));

        // 50 of 60 seconds of cooldown remaining.
        let second = lp.step(t0 + Duration::from_secs(10)).unwrap();
        assert!(matches!(
            second,
            CycleReport::Shifted {
                to: GearLevel(1),
                reason: ShiftReason::Emergency,
                ..
            }
        ));
        assert_eq!(lp.hardware().applied.last(), Some(&GearLevel(1)));
    }

    #[test]
    fn test_sentinel_reading_skips_cycle() {
        let hw = Scripted::new(&[0.0, -3.0, f64::NAN, 400.0]);
        let mut lp = ControlLoop::new(predictive(0.0), hw).unwrap();

        let t0 = Instant::now();
        for i in 0..4 {
            let report = lp.step(t0 + Duration::from_secs(i)).unwrap();
            assert!(matches!(report, CycleReport::Skipped { .. }));
        }
        assert!(lp.state().history.is_empty());
        assert_eq!(lp.statistics().skipped, 4);
        assert!(lp.hardware().applied.is_empty());
    }

    #[test]
    fn test_actuator_failure_is_transient() {
        let hw = Scripted::new(&[45.0, 45.0]);
        let mut lp = ControlLoop::new(predictive(0.0), hw).unwrap();

        lp.hardware_mut().fail_apply = true;
        let err = lp.step(Instant::now()).unwrap_err();
        assert_eq!(err.severity(), Severity::Transient);
        assert_eq!(lp.current_gear(), GearLevel(4));

        lp.hardware_mut().fail_apply = false;
        lp.step(Instant::now()).unwrap();
        assert_eq!(lp.current_gear(), GearLevel(1));
    }

    #[test]
    fn test_shutdown_falls_back_to_lowest() {
        let hw = Scripted::new(&[30.0]);
        let mut lp = ControlLoop::new(predictive(0.0), hw).unwrap();
        lp.boot().unwrap();
        lp.step(Instant::now()).unwrap();
        assert_eq!(lp.current_gear(), GearLevel(4));

        lp.shutdown(Instant::now());
        assert_eq!(lp.current_gear(), GearLevel(1));
        assert_eq!(lp.hardware().applied.last(), Some(&GearLevel(1)));
    }

    #[test]
    fn test_startup_fails_without_sensor() {
        let mut hw = Scripted::new(&[]);
        hw.readings.clear();
        assert!(matches!(
            ControlLoop::new(predictive(0.0), hw),
            Err(GovernorError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_unusable_cooldown_is_config_error() {
        for cooldown in [f64::NAN, f64::INFINITY, 1e30] {
            let hw = Scripted::new(&[]);
            assert!(matches!(
                ControlLoop::new(predictive(cooldown), hw),
                Err(GovernorError::Config(_))
            ));
        }
    }

    #[test]
    fn test_nan_velocity_bound_is_config_error() {
        let mut config = predictive(0.0);
        config.forecast.velocity_max = f64::NAN;
        assert!(matches!(
            ControlLoop::new(config, Scripted::new(&[])),
            Err(GovernorError::Config(_))
        ));
    }

    #[test]
    fn test_is_plausible() {
        assert!(is_plausible(38.5, 120.0));
        assert!(!is_plausible(0.0, 120.0));
        assert!(!is_plausible(-1.0, 120.0));
        assert!(!is_plausible(f64::INFINITY, 120.0));
        assert!(!is_plausible(121.0, 120.0));
    }
}
