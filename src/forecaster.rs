//! Predictive forecaster - projects the temperature a fixed horizon ahead.
//!
//! Velocity comes from one of two places:
//! - the recent history (difference between the averaged ends of a trailing window), or
//! - a linear velocity model fitted offline on `[stress_score, temp_smooth]`.
//!
//! Either way the velocity is clamped to a physically plausible range before
//! extrapolating, and every failure degrades to "the future looks like now".

use crate::error::ModelError;
use crate::history::TemperatureHistory;
use crate::types::ForecastConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FEATURE_STRESS: &str = "stress_score";
pub const FEATURE_TEMP_SMOOTH: &str = "temp_smooth";
pub const FEATURE_TEMPERATURE: &str = "temperature";

/// `velocity = intercept + Σ coefficient_i * feature_i`, in degrees per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearVelocityModel {
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// Inputs a model may ask for on a given cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureInputs {
    pub temperature: f64,
    pub temp_smooth: f64,
    pub stress_score: Option<f64>,
}

impl LinearVelocityModel {
    pub fn new(features: Vec<String>, coefficients: Vec<f64>, intercept: f64) -> Result<Self, ModelError> {
        let model = Self {
            features,
            coefficients,
            intercept,
        };
        model.check()?;
        Ok(model)
    }

    /// Load a model artifact from JSON.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: Self = serde_json::from_str(&content)?;
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<(), ModelError> {
        if self.features.len() != self.coefficients.len() {
            return Err(ModelError::CoefficientShape {
                features: self.features.len(),
                coefficients: self.coefficients.len(),
            });
        }
        for name in &self.features {
            if ![FEATURE_STRESS, FEATURE_TEMP_SMOOTH, FEATURE_TEMPERATURE].contains(&name.as_str()) {
                return Err(ModelError::UnknownFeature(name.clone()));
            }
        }
        Ok(())
    }

    /// Build the feature vector in the order the model was fitted with.
    pub fn features_for(&self, inputs: &FeatureInputs) -> Result<Vec<f64>, ModelError> {
        self.features
            .iter()
            .map(|name| match name.as_str() {
                FEATURE_STRESS => inputs.stress_score.ok_or(ModelError::MissingFeature(FEATURE_STRESS)),
                FEATURE_TEMP_SMOOTH => Ok(inputs.temp_smooth),
                FEATURE_TEMPERATURE => Ok(inputs.temperature),
                other => Err(ModelError::UnknownFeature(other.to_string())),
            })
            .collect()
    }

    /// Evaluate on a raw feature vector.
    pub fn evaluate(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.coefficients.len() {
            return Err(ModelError::FeatureShape {
                expected: self.coefficients.len(),
                found: features.len(),
            });
        }

        let velocity = self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>();

        if velocity.is_finite() {
            Ok(velocity)
        } else {
            Err(ModelError::NonFinite)
        }
    }

    /// Iterate the model under constant stress: `temp += velocity(stress, temp)` per step.
    ///
    /// The returned trajectory starts with `start` and has `steps + 1` points.
    pub fn rollout(&self, stress: f64, start: f64, steps: usize) -> Result<Vec<f64>, ModelError> {
        let mut temps = Vec::with_capacity(steps + 1);
        let mut temp = start;
        temps.push(temp);

        for _ in 0..steps {
            let inputs = FeatureInputs {
                temperature: temp,
                temp_smooth: temp,
                stress_score: Some(stress),
            };
            temp += self.evaluate(&self.features_for(&inputs)?)?;
            temps.push(temp);
        }

        Ok(temps)
    }
}

pub struct Forecaster {
    config: ForecastConfig,
    model: Option<LinearVelocityModel>,
}

impl Forecaster {
    /// History-velocity forecaster.
    pub fn new(config: ForecastConfig) -> Self {
        Self { config, model: None }
    }

    pub fn with_model(config: ForecastConfig, model: LinearVelocityModel) -> Self {
        Self {
            config,
            model: Some(model),
        }
    }

    /// Use the configured model artifact if it loads; otherwise fall back to history velocity.
    pub fn from_config(config: ForecastConfig) -> Self {
        let model = config.model_path.as_deref().and_then(|path| match LinearVelocityModel::load(path) {
            Ok(model) => {
                log::info!(
                    "Velocity model loaded from {} (features: {})",
                    path.display(),
                    model.features.join(", ")
                );
                Some(model)
            }
            Err(e) => {
                log::warn!("Velocity model unusable ({}), using history velocity", e);
                None
            }
        });

        Self { config, model }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Velocity from the trailing window of history, in degrees per cycle (unclamped).
    pub fn history_velocity(&self, history: &TemperatureHistory) -> Option<f64> {
        if history.len() < self.config.min_history {
            return None;
        }

        let window = history.tail(self.config.min_history);
        let n = window.len();
        if n < 4 {
            return None;
        }

        let start = (window[0] + window[1]) / 2.0;
        let end = (window[n - 2] + window[n - 1]) / 2.0;
        // Pair midpoints are n - 2 cycles apart.
        Some((end - start) / (n - 2) as f64)
    }

    fn clamp_velocity(&self, velocity: f64) -> f64 {
        velocity.clamp(self.config.velocity_min, self.config.velocity_max)
    }

    /// Forecast with the history-velocity method.
    pub fn predict(&self, current: f64, history: &TemperatureHistory) -> f64 {
        self.predict_with(current, history, None)
    }

    /// Forecast, passing the stress score a velocity model may need.
    pub fn predict_with(&self, current: f64, history: &TemperatureHistory, stress_score: Option<f64>) -> f64 {
        let velocity = match &self.model {
            Some(model) => {
                let inputs = FeatureInputs {
                    temperature: current,
                    temp_smooth: history.smoothed(self.config.smoothing_window).unwrap_or(current),
                    stress_score,
                };
                match model.features_for(&inputs).and_then(|f| model.evaluate(&f)) {
                    Ok(v) => v,
                    Err(e) => {
                        log::debug!("Velocity model evaluation failed ({}), holding forecast", e);
                        return current;
                    }
                }
            }
            None => match self.history_velocity(history) {
                Some(v) => v,
                None => return current,
            },
        };

        current + self.clamp_velocity(velocity) * self.config.horizon_cycles
    }
}
