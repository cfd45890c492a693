//! Core data structures for the governor: gears, learning states and configuration.

use crate::error::{GovernorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Position of a gear in the catalog, 1-based. Lower is cooler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GearLevel(pub u8);

impl GearLevel {
    /// The most conservative gear.
    pub const LOWEST: GearLevel = GearLevel(1);

    pub fn from_index(index: usize) -> Self {
        Self(index as u8 + 1)
    }

    /// Zero-based action index for this gear.
    pub fn index(self) -> usize {
        usize::from(self.0.saturating_sub(1))
    }
}

impl fmt::Display for GearLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gear {}", self.0)
    }
}

/// A single frequency ceiling, as applied to one cpufreq policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyLimit {
    pub policy: String,
    pub min_khz: u64,
    pub max_khz: u64,
}

/// One discrete operating point. The core only looks at `level`;
/// `limits` belongs to the actuator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gear {
    pub level: GearLevel,
    pub limits: Vec<FrequencyLimit>,
}

impl Gear {
    pub fn new(level: GearLevel) -> Self {
        Self { level, limits: Vec::new() }
    }
}

/// Ordered, immutable set of gears supplied by the actuator at startup.
#[derive(Debug, Clone)]
pub struct GearCatalog {
    gears: Vec<Gear>,
}

impl GearCatalog {
    /// Build a catalog. Gears are sorted by level and must be numbered 1..=N.
    pub fn new(mut gears: Vec<Gear>) -> Result<Self> {
        if gears.is_empty() {
            return Err(crate::error::ActuatorError::EmptyCatalog.into());
        }
        gears.sort_by_key(|g| g.level);
        for (i, gear) in gears.iter().enumerate() {
            if gear.level != GearLevel::from_index(i) {
                return Err(GovernorError::Config(format!(
                    "gear levels must be contiguous from 1, found {} at position {}",
                    gear.level.0,
                    i + 1
                )));
            }
        }
        Ok(Self { gears })
    }

    /// Catalog of `count` gears without actuation data.
    pub fn with_levels(count: usize) -> Result<Self> {
        Self::new((0..count).map(|i| Gear::new(GearLevel::from_index(i))).collect())
    }

    pub fn len(&self) -> usize {
        self.gears.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gears.is_empty()
    }

    pub fn lowest(&self) -> GearLevel {
        GearLevel::LOWEST
    }

    pub fn highest(&self) -> GearLevel {
        GearLevel::from_index(self.gears.len() - 1)
    }

    pub fn get(&self, level: GearLevel) -> Option<&Gear> {
        self.gears.get(level.index()).filter(|g| g.level == level)
    }

    /// Clamp an arbitrary level into the catalog range.
    pub fn clamp(&self, level: GearLevel) -> GearLevel {
        level.clamp(self.lowest(), self.highest())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gear> {
        self.gears.iter()
    }
}

/// Temperature bucket used as a learning key: the number of half degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(pub i64);

impl StateKey {
    /// Quantize to the nearest 0.5 degree; exact quarter-degree ties go to the even half-step.
    pub fn from_temperature(temp: f64) -> Self {
        Self((temp * 2.0).round_ties_even() as i64)
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_temperature(degrees)
    }

    pub fn degrees(self) -> f64 {
        self.0 as f64 / 2.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°C", self.degrees())
    }
}

/// Which decision strategy drives the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Learning,
    Predictive,
}

/// Gear applied before the first sample is sensed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialGear {
    /// Boot at gear 1 (safety first).
    Conservative,
    /// Boot at the top gear.
    Performance,
}

impl InitialGear {
    pub fn resolve(self, catalog: &GearCatalog) -> GearLevel {
        match self {
            InitialGear::Conservative => catalog.lowest(),
            InitialGear::Performance => catalog.highest(),
        }
    }
}

/// Forecast bands. Must satisfy `danger > hot > warm`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub danger: f64,
    pub hot: f64,
    pub warm: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            danger: 42.0,
            hot: 39.0,
            warm: 37.0,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        require_finite("thresholds.danger", self.danger)?;
        require_finite("thresholds.hot", self.hot)?;
        require_finite("thresholds.warm", self.warm)?;

        if self.danger > self.hot && self.hot > self.warm {
            Ok(())
        } else {
            Err(GovernorError::Config(format!(
                "thresholds must satisfy danger > hot > warm (got {} / {} / {})",
                self.danger, self.hot, self.warm
            )))
        }
    }

    /// Map a forecast temperature to a gear in a catalog of `gear_count` gears.
    pub fn gear_for(&self, forecast: f64, gear_count: usize) -> GearLevel {
        let top = gear_count.max(1);
        let hot_level = 2.min(top);
        let warm_level = top.saturating_sub(1).max(hot_level);

        let level = if forecast > self.danger {
            1
        } else if forecast > self.hot {
            hot_level
        } else if forecast > self.warm {
            warm_level
        } else {
            top
        };
        GearLevel(level as u8)
    }
}

/// Gear arbitration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Minimum dwell between non-emergency shifts (seconds)
    pub cooldown_secs: f64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self { cooldown_secs: 3.0 }
    }
}

/// Q-learning hyperparameters and reward shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub learning_rate: f64,
    pub discount: f64,
    pub epsilon: f64,
    /// Above this: hard overheat penalty
    pub hard_overheat: f64,
    /// Above this: soft overheat penalty
    pub soft_overheat: f64,
    /// Below this it is safe to run fast
    pub safe_below: f64,
    pub hard_overheat_reward: f64,
    pub soft_overheat_reward: f64,
    pub fast_and_safe_reward: f64,
    pub slow_and_safe_reward: f64,
    pub policy_path: PathBuf,
    /// Fixed RNG seed for reproducible exploration
    pub seed: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount: 0.9,
            epsilon: 0.1,
            hard_overheat: 43.0,
            soft_overheat: 41.0,
            safe_below: 40.0,
            hard_overheat_reward: -20.0,
            soft_overheat_reward: -10.0,
            fast_and_safe_reward: 10.0,
            slow_and_safe_reward: -5.0,
            policy_path: PathBuf::from("q_table.json"),
            seed: None,
        }
    }
}

/// Predictive forecaster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub history_capacity: usize,
    pub min_history: usize,
    /// Look-ahead, in control cycles
    pub horizon_cycles: f64,
    /// Degrees per cycle
    pub velocity_min: f64,
    pub velocity_max: f64,
    /// Samples averaged into the smoothed temperature feature
    pub smoothing_window: usize,
    pub model_path: Option<PathBuf>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            history_capacity: 60,
            min_history: 10,
            horizon_cycles: 30.0,
            velocity_min: -0.1,
            velocity_max: 0.15,
            smoothing_window: 3,
            model_path: None,
        }
    }
}

/// Where the sysfs backend looks for sensors and cpufreq policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SysfsConfig {
    /// Filesystem root; "/" on a device, a temp dir in tests
    pub root: PathBuf,
    /// Position of each gear in a policy's sorted frequency table (0.0 = min, 1.0 = max)
    pub gear_ratios: Vec<f64>,
}

impl Default for SysfsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            gear_ratios: vec![0.0, 0.33, 0.66, 1.0],
        }
    }
}

/// Configuration for the governor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Control cycle period (ms)
    pub cycle_ms: u64,
    /// Backoff after a transient failure, in multiples of the cycle
    pub backoff_factor: u32,
    /// Readings above this are treated as sensor garbage
    pub max_plausible_temp: f64,
    pub strategy: StrategyKind,
    pub initial_gear: InitialGear,
    pub arbitration: ArbitrationConfig,
    pub thresholds: Thresholds,
    pub learning: LearningConfig,
    pub forecast: ForecastConfig,
    pub sysfs: SysfsConfig,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            cycle_ms: 1000,
            backoff_factor: 2,
            max_plausible_temp: 120.0,
            strategy: StrategyKind::Learning,
            initial_gear: InitialGear::Conservative,
            arbitration: ArbitrationConfig::default(),
            thresholds: Thresholds::default(),
            learning: LearningConfig::default(),
            forecast: ForecastConfig::default(),
            sysfs: SysfsConfig::default(),
        }
    }
}

impl GovernorConfig {
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        require_finite("max_plausible_temp", self.max_plausible_temp)?;
        require_finite("arbitration.cooldown_secs", self.arbitration.cooldown_secs)?;
        require_finite("forecast.horizon_cycles", self.forecast.horizon_cycles)?;
        require_finite("forecast.velocity_min", self.forecast.velocity_min)?;
        require_finite("forecast.velocity_max", self.forecast.velocity_max)?;
        for (name, value) in [
            ("learning.hard_overheat", self.learning.hard_overheat),
            ("learning.soft_overheat", self.learning.soft_overheat),
            ("learning.safe_below", self.learning.safe_below),
            ("learning.hard_overheat_reward", self.learning.hard_overheat_reward),
            ("learning.soft_overheat_reward", self.learning.soft_overheat_reward),
            ("learning.fast_and_safe_reward", self.learning.fast_and_safe_reward),
            ("learning.slow_and_safe_reward", self.learning.slow_and_safe_reward),
        ] {
            require_finite(name, value)?;
        }

        if self.max_plausible_temp <= 0.0 {
            return Err(GovernorError::Config("max_plausible_temp must be positive".to_string()));
        }
        if self.forecast.horizon_cycles < 0.0 {
            return Err(GovernorError::Config("horizon_cycles must not be negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.learning.learning_rate) {
            return Err(GovernorError::Config(format!(
                "learning_rate must be within [0, 1], got {}",
                self.learning.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.learning.discount) {
            return Err(GovernorError::Config(format!(
                "discount must be within [0, 1], got {}",
                self.learning.discount
            )));
        }
        if self.cycle_ms == 0 {
            return Err(GovernorError::Config("cycle_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.learning.epsilon) {
            return Err(GovernorError::Config(format!(
                "epsilon must be within [0, 1], got {}",
                self.learning.epsilon
            )));
        }
        if self.forecast.min_history < 4 {
            return Err(GovernorError::Config(format!(
                "min_history must be at least 4 samples, got {}",
                self.forecast.min_history
            )));
        }
        if self.forecast.history_capacity < self.forecast.min_history {
            return Err(GovernorError::Config(
                "history_capacity must not be smaller than min_history".to_string(),
            ));
        }
        if self.forecast.velocity_min > self.forecast.velocity_max {
            return Err(GovernorError::Config("velocity_min exceeds velocity_max".to_string()));
        }
        if self.arbitration.cooldown_secs < 0.0 {
            return Err(GovernorError::Config("cooldown_secs must not be negative".to_string()));
        }
        if self.sysfs.gear_ratios.is_empty()
            || self.sysfs.gear_ratios.iter().any(|r| !(0.0..=1.0).contains(r))
        {
            return Err(GovernorError::Config(
                "gear_ratios must be a non-empty list of values within [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}

fn require_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(GovernorError::Config(format!("{} must be a finite number, got {}", name, value)))
    }
}
