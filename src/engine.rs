//! Decision engine - the two interchangeable "brains" behind one contract.

use crate::agent::{LearningUpdate, QAgent};
use crate::error::PolicyError;
use crate::forecaster::Forecaster;
use crate::history::TemperatureHistory;
use crate::policy_store::PolicyStore;
use crate::types::{GearCatalog, GearLevel, GovernorConfig, StrategyKind, Thresholds};
use std::path::Path;

/// What the engine wants this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recommendation {
    pub gear: GearLevel,
    /// Projected temperature (predictive strategy only)
    pub forecast: Option<f64>,
}

/// Strategy chosen once at startup.
pub enum DecisionEngine {
    Learning(QAgent),
    Predictive {
        forecaster: Forecaster,
        thresholds: Thresholds,
        gear_count: usize,
    },
}

impl DecisionEngine {
    pub fn from_config(config: &GovernorConfig, catalog: &GearCatalog) -> Self {
        match config.strategy {
            StrategyKind::Learning => {
                let store = PolicyStore::new(&config.learning.policy_path, catalog.len());
                DecisionEngine::Learning(QAgent::new(config.learning.clone(), catalog.len(), Some(store)))
            }
            StrategyKind::Predictive => DecisionEngine::Predictive {
                forecaster: Forecaster::from_config(config.forecast.clone()),
                thresholds: config.thresholds,
                gear_count: catalog.len(),
            },
        }
    }

    /// Like [`from_config`](Self::from_config), but the learner only reads the
    /// configured policy; updates go to `save_to`, or nowhere when `None`.
    pub fn detached(config: &GovernorConfig, catalog: &GearCatalog, save_to: Option<&Path>) -> Self {
        match config.strategy {
            StrategyKind::Learning => {
                let table = PolicyStore::new(&config.learning.policy_path, catalog.len()).load();
                let store = save_to.map(|path| PolicyStore::new(path, catalog.len()));
                DecisionEngine::Learning(QAgent::with_table(config.learning.clone(), table, store))
            }
            StrategyKind::Predictive => Self::from_config(config, catalog),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            DecisionEngine::Learning(_) => StrategyKind::Learning,
            DecisionEngine::Predictive { .. } => StrategyKind::Predictive,
        }
    }

    /// Feed the new reading to the learner (no-op for the forecaster).
    pub fn observe(&mut self, temp: f64) -> Option<LearningUpdate> {
        match self {
            DecisionEngine::Learning(agent) => agent.learn(temp),
            DecisionEngine::Predictive { .. } => None,
        }
    }

    /// Raw gear recommendation for this cycle.
    pub fn recommend(&mut self, temp: f64, history: &TemperatureHistory, stress_score: Option<f64>) -> Recommendation {
        match self {
            DecisionEngine::Learning(agent) => Recommendation {
                gear: agent.choose_action(temp),
                forecast: None,
            },
            DecisionEngine::Predictive {
                forecaster,
                thresholds,
                gear_count,
            } => {
                let forecast = forecaster.predict_with(temp, history, stress_score);
                Recommendation {
                    gear: thresholds.gear_for(forecast, *gear_count),
                    forecast: Some(forecast),
                }
            }
        }
    }

    /// Tell the learner which gear is in effect for the reading it just saw.
    pub fn record(&mut self, temp: f64, gear: GearLevel) {
        if let DecisionEngine::Learning(agent) = self {
            agent.remember(temp, gear);
        }
    }

    /// Persist whatever the engine has learned.
    pub fn flush(&self) -> Result<(), PolicyError> {
        match self {
            DecisionEngine::Learning(agent) => agent.flush(),
            DecisionEngine::Predictive { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ForecastConfig, LearningConfig};

    #[test]
    fn test_predictive_recommendation_uses_thresholds() {
        let mut engine = DecisionEngine::Predictive {
            forecaster: Forecaster::new(ForecastConfig::default()),
            thresholds: Thresholds { danger: 44.0, hot: 41.0, warm: 38.0 },
            gear_count: 4,
        };
        let history = TemperatureHistory::new(60);

        let rec = engine.recommend(45.0, &history, None);
        assert_eq!(rec.gear, GearLevel(1));
        assert_eq!(rec.forecast, Some(45.0));

        assert_eq!(engine.recommend(37.0, &history, None).gear, GearLevel(4));
        assert!(engine.observe(37.0).is_none());
        assert_eq!(engine.kind(), StrategyKind::Predictive);
    }

    #[test]
    fn test_learning_engine_records_and_learns() {
        let config = LearningConfig {
            epsilon: 0.0,
            ..Default::default()
        };
        let mut engine = DecisionEngine::Learning(QAgent::new(config, 4, None));

        assert!(engine.observe(38.0).is_none());
        let rec = engine.recommend(38.0, &TemperatureHistory::new(4), None);
        assert_eq!(rec.gear, GearLevel(1));
        assert!(rec.forecast.is_none());

        engine.record(38.0, GearLevel(4));
        let update = engine.observe(38.0).unwrap();
        assert_eq!(update.action, 3);
        assert_eq!(update.reward, 10.0);
        assert!(engine.flush().is_ok());
    }

    #[test]
    fn test_from_config_selects_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = GearCatalog::with_levels(4).unwrap();

        let mut config = GovernorConfig::default();
        config.learning.policy_path = dir.path().join("q_table.json");
        assert_eq!(DecisionEngine::from_config(&config, &catalog).kind(), StrategyKind::Learning);

        config.strategy = StrategyKind::Predictive;
        assert_eq!(DecisionEngine::from_config(&config, &catalog).kind(), StrategyKind::Predictive);
    }
}
