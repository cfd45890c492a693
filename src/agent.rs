//! Reinforcement-learning agent - online Q-learning over discretized temperature.
//!
//! The agent keeps a table of action values per 0.5 °C bucket. Each cycle the
//! driver first calls [`QAgent::learn`] with the fresh reading, which scores the
//! action taken on the previous cycle, then [`QAgent::choose_action`] for the
//! next gear, then [`QAgent::remember`] with what was chosen.

use crate::error::PolicyError;
use crate::policy_store::PolicyStore;
use crate::types::{GearLevel, LearningConfig, StateKey};
use std::collections::HashMap;

/// Learned action values keyed by temperature bucket.
///
/// Every stored row has exactly `actions` entries. A state that has never been
/// seen reads as all zeros; [`ValueTable::entry_or_default`] materializes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTable {
    actions: usize,
    rows: HashMap<StateKey, Vec<f64>>,
}

impl ValueTable {
    pub fn new(actions: usize) -> Self {
        Self {
            actions,
            rows: HashMap::new(),
        }
    }

    pub fn actions(&self) -> usize {
        self.actions
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, state: StateKey) -> Option<&[f64]> {
        self.rows.get(&state).map(Vec::as_slice)
    }

    /// Row for `state`, inserting a zero row first if the state is new.
    pub fn entry_or_default(&mut self, state: StateKey) -> &mut Vec<f64> {
        let actions = self.actions;
        self.rows.entry(state).or_insert_with(|| vec![0.0; actions])
    }

    /// Replace a row. Rows of the wrong width are resized (zero-filled).
    pub fn insert(&mut self, state: StateKey, mut values: Vec<f64>) {
        values.resize(self.actions, 0.0);
        self.rows.insert(state, values);
    }

    /// Highest value in the row for `state` (zero for unseen states).
    pub fn max_value(&mut self, state: StateKey) -> f64 {
        self.entry_or_default(state)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Vec<f64>)> {
        self.rows.iter()
    }
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Outcome of one Bellman update, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningUpdate {
    pub state: StateKey,
    pub action: usize,
    pub reward: f64,
    pub old_value: f64,
    pub new_value: f64,
}

pub struct QAgent {
    table: ValueTable,
    config: LearningConfig,
    store: Option<PolicyStore>,
    rng: fastrand::Rng,
    last: Option<(StateKey, usize)>,
}

impl QAgent {
    /// Create an agent for `actions` gears, restoring the table from `store` if given.
    pub fn new(config: LearningConfig, actions: usize, store: Option<PolicyStore>) -> Self {
        let table = match &store {
            Some(store) => store.load(),
            None => ValueTable::new(actions),
        };
        Self::with_table(config, table, store)
    }

    pub fn with_table(config: LearningConfig, table: ValueTable, store: Option<PolicyStore>) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };

        log::info!(
            "Q-learning agent ready: {} actions, {} states, alpha={} gamma={} epsilon={}",
            table.actions(),
            table.len(),
            config.learning_rate,
            config.discount,
            config.epsilon
        );

        Self {
            table,
            config,
            store,
            rng,
            last: None,
        }
    }

    pub fn table(&self) -> &ValueTable {
        &self.table
    }

    /// Epsilon-greedy gear choice for the current temperature.
    pub fn choose_action(&mut self, temp: f64) -> GearLevel {
        let state = StateKey::from_temperature(temp);
        let actions = self.table.actions();

        let index = if self.rng.f64() < self.config.epsilon {
            let index = self.rng.usize(0..actions);
            log::debug!("Exploring at {}: random action {}", state, index);
            index
        } else {
            argmax(self.table.entry_or_default(state))
        };

        GearLevel::from_index(index)
    }

    /// Best known gear for the temperature, without exploration.
    pub fn greedy_action(&mut self, temp: f64) -> GearLevel {
        let state = StateKey::from_temperature(temp);
        GearLevel::from_index(argmax(self.table.entry_or_default(state)))
    }

    /// Record the state/action pair the next [`learn`](Self::learn) call will score.
    pub fn remember(&mut self, temp: f64, gear: GearLevel) {
        let action = gear.index().min(self.table.actions().saturating_sub(1));
        self.last = Some((StateKey::from_temperature(temp), action));
    }

    /// Reward for having taken `action` when the temperature is now `temp`.
    pub fn reward(&self, temp: f64, action: usize) -> f64 {
        let c = &self.config;
        let top = self.table.actions().saturating_sub(1);

        if temp > c.hard_overheat {
            c.hard_overheat_reward
        } else if temp > c.soft_overheat {
            c.soft_overheat_reward
        } else if temp < c.safe_below && action == top {
            c.fast_and_safe_reward
        } else if temp < c.safe_below && action == 0 {
            c.slow_and_safe_reward
        } else {
            0.0
        }
    }

    /// Score the previous decision against the new reading and persist the table.
    ///
    /// Returns `None` on the first cycle, before any decision was recorded.
    pub fn learn(&mut self, temp: f64) -> Option<LearningUpdate> {
        let (prev_state, prev_action) = self.last?;
        let current = StateKey::from_temperature(temp);

        let reward = self.reward(temp, prev_action);
        let next_max = self.table.max_value(current);

        let alpha = self.config.learning_rate;
        let gamma = self.config.discount;
        let row = self.table.entry_or_default(prev_state);
        let old_value = row[prev_action];
        let new_value = old_value + alpha * (reward + gamma * next_max - old_value);
        row[prev_action] = new_value;

        log::trace!(
            "Q[{}][{}]: {:.4} -> {:.4} (reward {})",
            prev_state,
            prev_action,
            old_value,
            new_value,
            reward
        );

        if let Some(store) = &self.store {
            // Logged inside the store; a failed write never stops learning.
            let _ = store.save(&self.table);
        }

        Some(LearningUpdate {
            state: prev_state,
            action: prev_action,
            reward,
            old_value,
            new_value,
        })
    }

    /// Write the table to the attached store, if any.
    pub fn flush(&self) -> Result<(), PolicyError> {
        match &self.store {
            Some(store) => {
                store.save(&self.table)?;
                log::info!("Policy flushed to {} ({} states)", store.path().display(), self.table.len());
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(epsilon: f64) -> LearningConfig {
        LearningConfig {
            epsilon,
            seed: Some(7),
            ..Default::default()
        }
    }

    #[test]
    fn test_argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.0, 0.0, 0.0, 0.0]), 0);
        assert_eq!(argmax(&[1.0, 3.0, 3.0, -1.0]), 1);
        assert_eq!(argmax(&[-5.0, -2.0, -3.0, -2.0]), 1);
    }

    #[test]
    fn test_entry_or_default_materializes_zero_row() {
        let mut table = ValueTable::new(4);
        let state = StateKey::from_temperature(37.2);
        assert!(table.get(state).is_none());

        assert_eq!(table.entry_or_default(state).as_slice(), &[0.0; 4]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_greedy_choice_without_exploration() {
        let mut table = ValueTable::new(4);
        table.insert(StateKey::from_temperature(42.0), vec![5.0, 1.0, 0.0, -3.0]);
        let mut agent = QAgent::with_table(config(0.0), table, None);

        assert_eq!(agent.choose_action(42.1), GearLevel(1));
        // Unseen state: all zeros, first index wins.
        assert_eq!(agent.choose_action(30.0), GearLevel(1));
        assert!(agent.table().get(StateKey::from_temperature(30.0)).is_some());
    }

    #[test]
    fn test_full_exploration_stays_in_range() {
        let mut agent = QAgent::new(config(1.0), 4, None);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let gear = agent.choose_action(38.0);
            assert!(gear >= GearLevel(1) && gear <= GearLevel(4));
            seen[gear.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_reward_priority() {
        let agent = QAgent::new(config(0.0), 4, None);

        assert_eq!(agent.reward(43.5, 3), -20.0);
        assert_eq!(agent.reward(42.0, 0), -10.0);
        assert_eq!(agent.reward(39.0, 3), 10.0);
        assert_eq!(agent.reward(39.0, 0), -5.0);
        assert_eq!(agent.reward(39.0, 2), 0.0);
        assert_eq!(agent.reward(40.5, 3), 0.0);
    }

    #[test]
    fn test_learn_is_noop_without_previous_decision() {
        let mut agent = QAgent::new(config(0.0), 4, None);
        assert!(agent.learn(38.0).is_none());
        assert!(agent.table().is_empty());
    }

    #[test]
    fn test_bellman_update() {
        let mut agent = QAgent::new(config(0.0), 4, None);
        agent.remember(42.0, GearLevel(4));

        let update = agent.learn(42.0).unwrap();
        assert_eq!(update.reward, -10.0);
        assert_eq!(update.old_value, 0.0);
        assert!((update.new_value - -1.0).abs() < 1e-12);
        assert_eq!(agent.table().get(StateKey::from_temperature(42.0)).unwrap()[3], update.new_value);
    }

    #[test]
    fn test_converges_when_fast_and_cool() {
        let mut agent = QAgent::new(config(0.0), 4, None);
        let state = StateKey::from_temperature(38.0);
        let mut previous = 0.0;

        for _ in 0..500 {
            agent.remember(38.0, GearLevel(4));
            let update = agent.learn(38.0).unwrap();
            assert_eq!(update.reward, 10.0);
            assert!(update.new_value > previous);
            previous = update.new_value;
        }

        let value = agent.table().get(state).unwrap()[3];
        // Fixed point of v = v + 0.1 * (10 + 0.9 v - v) is 100.
        assert!(value > 99.0 && value < 100.0, "value = {}", value);
        assert_eq!(agent.greedy_action(38.0), GearLevel(4));
    }

    #[test]
    fn test_learning_persists_every_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q_table.json");

        let mut agent = QAgent::new(config(0.0), 4, Some(PolicyStore::new(&path, 4)));
        agent.remember(39.0, GearLevel(4));
        agent.learn(39.0).unwrap();

        let reloaded = PolicyStore::new(&path, 4).load();
        assert_eq!(&reloaded, agent.table());

        let restored = QAgent::new(config(0.0), 4, Some(PolicyStore::new(&path, 4)));
        assert_eq!(restored.table().len(), 1);
    }

    #[test]
    fn test_learning_continues_when_save_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "plain file").unwrap();
        let path = blocker.join("q_table.json");

        let mut agent = QAgent::new(config(0.0), 4, Some(PolicyStore::new(&path, 4)));
        agent.remember(39.0, GearLevel(4));

        let update = agent.learn(39.0).unwrap();
        assert_eq!(update.reward, 10.0);
        assert!((update.new_value - 1.0).abs() < 1e-12);
        assert_eq!(agent.table().get(StateKey::from_temperature(39.0)).unwrap()[3], update.new_value);

        assert!(agent.flush().is_err());
        assert!(!path.exists());
    }
}
