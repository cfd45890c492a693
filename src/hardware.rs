//! Hardware collaborators - temperature sensing and frequency actuation.
//!
//! The governor core only talks to [`TemperatureSource`] and [`GearActuator`].
//! Two backends are provided:
//!
//! - [`SysfsBackend`]: battery temperature from power-supply / thermal-zone
//!   nodes and cpufreq ceilings, rooted at a configurable directory.
//! - [`SimulatedDevice`]: a lumped thermal model driven by the applied gear,
//!   for dry runs and tests.

use crate::error::{ActuatorError, GovernorError, SensorError};
use crate::types::{FrequencyLimit, Gear, GearCatalog, GearLevel, SysfsConfig};
use std::path::{Path, PathBuf};
use sysinfo::System;

/// Source of the controlled temperature, in degrees Celsius.
pub trait TemperatureSource {
    fn read_temperature(&mut self) -> Result<f64, SensorError>;

    /// Current load estimate for velocity models, when the source has one.
    fn read_stress_score(&mut self) -> Option<f64> {
        None
    }
}

/// Applies gears to the hardware.
pub trait GearActuator {
    /// Enumerate the available gears. Called once at startup.
    fn list_gears(&mut self) -> Result<GearCatalog, GovernorError>;

    /// Apply a gear. Must be safe to call with the gear already active.
    fn apply_gear(&mut self, gear: &Gear) -> Result<(), ActuatorError>;
}

const BATTERY_TEMP: &str = "sys/class/power_supply/battery/temp";
const THERMAL_ROOT: &str = "sys/class/thermal";
const CPUFREQ_ROOT: &str = "sys/devices/system/cpu/cpufreq";
const GPU_BUSY: &str = "sys/class/kgsl/kgsl-3d0/gpubusy";

/// One cpufreq policy (CPU cluster) and its available frequencies, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuPolicy {
    pub name: String,
    pub path: PathBuf,
    pub frequencies: Vec<u64>,
}

/// Sysfs-backed sensor and actuator.
pub struct SysfsBackend {
    root: PathBuf,
    gear_ratios: Vec<f64>,
    policies: Vec<CpuPolicy>,
    sys: System,
}

impl SysfsBackend {
    pub fn new(config: &SysfsConfig) -> Result<Self, ActuatorError> {
        let mut gear_ratios = config.gear_ratios.clone();
        gear_ratios.sort_by(f64::total_cmp);

        let policies = discover_policies(&config.root)?;
        for policy in &policies {
            log::info!(
                "Found {}: {} steps ({}MHz - {}MHz)",
                policy.name,
                policy.frequencies.len(),
                policy.frequencies[0] / 1000,
                policy.frequencies[policy.frequencies.len() - 1] / 1000
            );
        }

        Ok(Self {
            root: config.root.clone(),
            gear_ratios,
            policies,
            sys: System::new(),
        })
    }

    pub fn policies(&self) -> &[CpuPolicy] {
        &self.policies
    }

    fn read_battery_node(&self) -> Option<Result<f64, SensorError>> {
        let path = self.root.join(BATTERY_TEMP);
        if !path.exists() {
            return None;
        }
        // Reported in tenths of a degree.
        Some(read_number(&path).map(|raw| raw / 10.0))
    }

    fn read_thermal_zone(&self) -> Option<Result<f64, SensorError>> {
        let dir = self.root.join(THERMAL_ROOT);
        let mut zones: Vec<PathBuf> = std::fs::read_dir(&dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("thermal_zone"))
            })
            .collect();
        zones.sort();

        zones.into_iter().find_map(|zone| {
            let kind = std::fs::read_to_string(zone.join("type")).ok()?;
            if !kind.to_lowercase().contains("battery") {
                return None;
            }
            // Reported in millidegrees.
            Some(read_number(&zone.join("temp")).map(|raw| raw / 1000.0))
        })
    }

    fn gpu_busy_percent(&self) -> Option<f64> {
        let content = std::fs::read_to_string(self.root.join(GPU_BUSY)).ok()?;
        parse_gpu_busy(&content)
    }
}

impl TemperatureSource for SysfsBackend {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        self.read_battery_node()
            .or_else(|| self.read_thermal_zone())
            .unwrap_or_else(|| Err(SensorError::NotFound(self.root.clone())))
    }

    /// `max_cpu_mhz / 3000 + gpu_busy / 100`.
    fn read_stress_score(&mut self) -> Option<f64> {
        self.sys.refresh_cpu();
        let cpu_mhz = self.sys.cpus().iter().map(|c| c.frequency()).max()? as f64;
        let gpu = self.gpu_busy_percent().unwrap_or(0.0);
        Some(cpu_mhz / 3000.0 + gpu / 100.0)
    }
}

impl GearActuator for SysfsBackend {
    fn list_gears(&mut self) -> Result<GearCatalog, GovernorError> {
        let gears = self
            .gear_ratios
            .iter()
            .enumerate()
            .map(|(i, ratio)| Gear {
                level: GearLevel::from_index(i),
                limits: self.policies.iter().map(|p| policy_limit(p, *ratio)).collect(),
            })
            .collect();

        let catalog = GearCatalog::new(gears)?;
        log::info!("Gears calibrated: {} levels across {} policies", catalog.len(), self.policies.len());
        Ok(catalog)
    }

    fn apply_gear(&mut self, gear: &Gear) -> Result<(), ActuatorError> {
        for limit in &gear.limits {
            let base = self.root.join(CPUFREQ_ROOT).join(&limit.policy);
            // Floor first so the new ceiling is never below it.
            write_node(&base.join("scaling_min_freq"), limit.min_khz)?;
            write_node(&base.join("scaling_max_freq"), limit.max_khz)?;
        }
        log::debug!("Applied {} ({} policies)", gear.level, gear.limits.len());
        Ok(())
    }
}

fn discover_policies(root: &Path) -> Result<Vec<CpuPolicy>, ActuatorError> {
    let dir = root.join(CPUFREQ_ROOT);
    let entries = std::fs::read_dir(&dir).map_err(|_| ActuatorError::NoPolicies(dir.clone()))?;

    let mut policies: Vec<CpuPolicy> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if !name.starts_with("policy") {
                return None;
            }
            let path = entry.path();
            let raw = std::fs::read_to_string(path.join("scaling_available_frequencies")).ok()?;
            let mut frequencies: Vec<u64> = raw.split_whitespace().filter_map(|f| f.parse().ok()).collect();
            if frequencies.is_empty() {
                log::warn!("{} lists no frequencies, skipping", name);
                return None;
            }
            frequencies.sort_unstable();
            frequencies.dedup();
            Some(CpuPolicy {
                name,
                path,
                frequencies,
            })
        })
        .collect();

    if policies.is_empty() {
        return Err(ActuatorError::NoPolicies(dir));
    }
    policies.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(policies)
}

/// Frequency ceiling at `ratio` of the way up the policy's table.
fn policy_limit(policy: &CpuPolicy, ratio: f64) -> FrequencyLimit {
    let count = policy.frequencies.len();
    let index = ((count as f64 * ratio) as usize).min(count - 1);
    FrequencyLimit {
        policy: policy.name.clone(),
        min_khz: policy.frequencies[0],
        max_khz: policy.frequencies[index],
    }
}

fn read_number(path: &Path) -> Result<f64, SensorError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    raw.trim().parse::<f64>().map_err(|_| SensorError::Parse(raw.trim().to_string()))
}

fn write_node(path: &Path, value: u64) -> Result<(), ActuatorError> {
    std::fs::write(path, value.to_string()).map_err(|source| ActuatorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `"<busy> <total>"` → busy percentage.
fn parse_gpu_busy(content: &str) -> Option<f64> {
    let mut parts = content.split_whitespace().map(|p| p.parse::<f64>());
    let busy = parts.next()?.ok()?;
    let total = parts.next()?.ok()?;
    if total == 0.0 {
        return Some(0.0);
    }
    Some(busy / total * 100.0)
}

/// Lumped thermal model: Newton cooling toward ambient plus heating that
/// scales with the load and the applied gear.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub temperature: f64,
    pub ambient: f64,
    /// Fraction of the excess over ambient shed per cycle
    pub cooling: f64,
    /// Degrees per cycle at full stress in the top gear
    pub heating: f64,
    pub stress: f64,
    /// Probability that a read returns the 0.0 sentinel
    pub dropout: f64,
    pub noise: f64,
    gear_count: usize,
    gear: GearLevel,
    applied: Vec<GearLevel>,
    rng: fastrand::Rng,
}

impl SimulatedDevice {
    pub fn new(start: f64, stress: f64, gear_count: usize, seed: u64) -> Self {
        Self {
            temperature: start,
            ambient: 28.0,
            cooling: 0.05,
            heating: 1.2,
            stress,
            dropout: 0.0,
            noise: 0.02,
            gear_count: gear_count.max(1),
            gear: GearLevel::LOWEST,
            applied: Vec::new(),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn gear(&self) -> GearLevel {
        self.gear
    }

    /// Every gear applied so far, in order.
    pub fn applied(&self) -> &[GearLevel] {
        &self.applied
    }

    /// Advance the plant by one control cycle.
    pub fn tick(&mut self) {
        let drive = self.gear.0 as f64 / self.gear_count as f64;
        let heating = self.heating * self.stress * drive * drive;
        let cooling = self.cooling * (self.temperature - self.ambient);
        let jitter = (self.rng.f64() - 0.5) * 2.0 * self.noise;
        self.temperature += heating - cooling + jitter;
    }
}

impl TemperatureSource for SimulatedDevice {
    fn read_temperature(&mut self) -> Result<f64, SensorError> {
        if self.dropout > 0.0 && self.rng.f64() < self.dropout {
            return Ok(0.0);
        }
        Ok(self.temperature)
    }

    fn read_stress_score(&mut self) -> Option<f64> {
        Some(self.stress * self.gear.0 as f64 / self.gear_count as f64)
    }
}

impl GearActuator for SimulatedDevice {
    fn list_gears(&mut self) -> Result<GearCatalog, GovernorError> {
        GearCatalog::with_levels(self.gear_count)
    }

    fn apply_gear(&mut self, gear: &Gear) -> Result<(), ActuatorError> {
        if gear.level.index() >= self.gear_count {
            return Err(ActuatorError::UnknownGear(gear.level.0));
        }
        self.gear = gear.level;
        self.applied.push(gear.level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_tree(root: &Path) {
        let cpufreq = root.join(CPUFREQ_ROOT);
        for (policy, freqs) in [
            ("policy0", "300000 576000 768000 1017600 1248000 1497600 1708800"),
            ("policy4", "710400 1056000 1401600 1804800 2016000 2419200 2841600"),
        ] {
            let dir = cpufreq.join(policy);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("scaling_available_frequencies"), freqs).unwrap();
            std::fs::write(dir.join("scaling_min_freq"), "0").unwrap();
            std::fs::write(dir.join("scaling_max_freq"), "0").unwrap();
        }
    }

    fn backend(root: &Path) -> SysfsBackend {
        SysfsBackend::new(&SysfsConfig {
            root: root.to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_battery_temperature_in_tenths() {
        let dir = tempdir().unwrap();
        fake_tree(dir.path());
        let battery = dir.path().join("sys/class/power_supply/battery");
        std::fs::create_dir_all(&battery).unwrap();
        std::fs::write(battery.join("temp"), "385\n").unwrap();

        assert_eq!(backend(dir.path()).read_temperature().unwrap(), 38.5);
    }

    #[test]
    fn test_thermal_zone_fallback() {
        let dir = tempdir().unwrap();
        fake_tree(dir.path());
        for (zone, kind, temp) in [("thermal_zone0", "cpu-0-0", "61000"), ("thermal_zone1", "battery", "36200")] {
            let path = dir.path().join(THERMAL_ROOT).join(zone);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("type"), kind).unwrap();
            std::fs::write(path.join("temp"), temp).unwrap();
        }

        assert!((backend(dir.path()).read_temperature().unwrap() - 36.2).abs() < 1e-9);
    }

    #[test]
    fn test_missing_sensor_is_error() {
        let dir = tempdir().unwrap();
        fake_tree(dir.path());
        assert!(matches!(backend(dir.path()).read_temperature(), Err(SensorError::NotFound(_))));
    }

    #[test]
    fn test_no_policies_is_error() {
        let dir = tempdir().unwrap();
        let result = SysfsBackend::new(&SysfsConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ActuatorError::NoPolicies(_))));
    }

    #[test]
    fn test_gear_calibration_and_apply() {
        let dir = tempdir().unwrap();
        fake_tree(dir.path());
        let mut backend = backend(dir.path());

        let catalog = backend.list_gears().unwrap();
        assert_eq!(catalog.len(), 4);

        let top = catalog.get(GearLevel(4)).unwrap();
        assert_eq!(top.limits[1].max_khz, 2841600);
        let bottom = catalog.get(GearLevel(1)).unwrap();
        assert_eq!(bottom.limits[0].max_khz, 300000);
        // 7 steps * 0.33 -> index 2
        assert_eq!(catalog.get(GearLevel(2)).unwrap().limits[0].max_khz, 768000);

        backend.apply_gear(top).unwrap();
        backend.apply_gear(top).unwrap();
        let policy4 = dir.path().join(CPUFREQ_ROOT).join("policy4");
        assert_eq!(std::fs::read_to_string(policy4.join("scaling_max_freq")).unwrap(), "2841600");
        assert_eq!(std::fs::read_to_string(policy4.join("scaling_min_freq")).unwrap(), "710400");
    }

    #[test]
    fn test_parse_gpu_busy() {
        assert_eq!(parse_gpu_busy("250 1000"), Some(25.0));
        assert_eq!(parse_gpu_busy("0 0"), Some(0.0));
        assert_eq!(parse_gpu_busy("garbage"), None);
    }

    #[test]
    fn test_simulated_device_heats_with_gear() {
        let mut hot = SimulatedDevice::new(35.0, 1.0, 4, 1);
        hot.noise = 0.0;
        hot.apply_gear(&Gear::new(GearLevel(4))).unwrap();

        let mut cool = hot.clone();
        cool.apply_gear(&Gear::new(GearLevel(1))).unwrap();

        for _ in 0..20 {
            hot.tick();
            cool.tick();
        }
        assert!(hot.temperature > cool.temperature);
        assert!(hot.apply_gear(&Gear::new(GearLevel(5))).is_err());
    }
}
