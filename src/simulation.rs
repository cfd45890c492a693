//! Dry runs of the full control loop against [`SimulatedDevice`] on a virtual clock.
//!
//! The learner starts from the configured policy but never writes back to it;
//! learned values are kept only when `policy_out` is given.

use crate::driver::{ControlLoop, CycleReport, LoopStatistics};
use crate::engine::DecisionEngine;
use crate::error::{GovernorError, Result};
use crate::hardware::SimulatedDevice;
use crate::types::GovernorConfig;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub cycles: u64,
    /// Workload intensity (1.0 = nominal)
    pub stress: f64,
    pub start: f64,
    pub seed: u64,
    /// Probability that a reading drops out as 0.0
    pub dropout: f64,
    /// Where to save the policy learned during the run
    pub policy_out: Option<PathBuf>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            cycles: 600,
            stress: 1.0,
            start: 35.0,
            seed: 7,
            dropout: 0.0,
            policy_out: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub stats: LoopStatistics,
    pub final_temperature: f64,
    pub peak_temperature: f64,
    /// Cycles spent in each gear, gear 1 first
    pub time_in_gear: Vec<u64>,
}

pub fn simulate(config: GovernorConfig, options: &SimulationOptions) -> Result<SimulationReport> {
    let cycle_ms = config.cycle_ms;
    let mut device = SimulatedDevice::new(options.start, options.stress, config.sysfs.gear_ratios.len(), options.seed);
    device.dropout = options.dropout;

    let policy_out = options.policy_out.as_deref();
    let mut governor = ControlLoop::with_engine(config, device, |config, catalog| {
        DecisionEngine::detached(config, catalog, policy_out)
    })?;
    governor.boot()?;

    let t0 = Instant::now();
    let at = |cycle: u64| cycle_instant(t0, cycle_ms, cycle);

    let mut peak = options.start;
    let mut time_in_gear = vec![0u64; governor.catalog().len()];

    for i in 0..options.cycles {
        match governor.step(at(i)?) {
            Ok(CycleReport::Skipped { reading }) => log::debug!("cycle {}: skipped {:.1}", i, reading),
            Ok(_) => {}
            Err(e) => log::warn!("cycle {}: {}", i, e),
        }

        let device = governor.hardware_mut();
        device.tick();
        peak = peak.max(device.temperature);
        if let Some(slot) = time_in_gear.get_mut(device.gear().index()) {
            *slot += 1;
        }
    }

    governor.shutdown(at(options.cycles)?);

    Ok(SimulationReport {
        stats: governor.statistics(),
        final_temperature: governor.hardware().temperature,
        peak_temperature: peak,
        time_in_gear,
    })
}

/// Virtual time of `cycle`, counted from `t0`.
fn cycle_instant(t0: Instant, cycle_ms: u64, cycle: u64) -> Result<Instant> {
    t0.checked_add(Duration::from_millis(cycle_ms.saturating_mul(cycle)))
        .ok_or_else(|| GovernorError::Config(format!("{} cycles of {}ms overflow the clock", cycle, cycle_ms)))
}
