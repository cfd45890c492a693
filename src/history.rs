//! Temperature history - fixed-capacity ring of recent samples.

use std::collections::VecDeque;

/// Recent temperature samples, oldest first. Evicts from the front once full.
#[derive(Debug, Clone)]
pub struct TemperatureHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl TemperatureHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, dropping the oldest when over capacity.
    pub fn push(&mut self, temp: f64) {
        self.samples.push_back(temp);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// The last `count` samples, oldest first. Shorter if not enough history.
    pub fn tail(&self, count: usize) -> Vec<f64> {
        let skip = self.samples.len().saturating_sub(count);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Mean of the last `window` samples.
    pub fn smoothed(&self, window: usize) -> Option<f64> {
        let tail = self.tail(window.max(1));
        if tail.is_empty() {
            return None;
        }
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }
}

impl Extend<f64> for TemperatureHistory {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for temp in iter {
            self.push(temp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut history = TemperatureHistory::new(3);
        history.extend([30.0, 31.0, 32.0, 33.0]);

        assert_eq!(history.len(), 3);
        assert_eq!(history.tail(10), vec![31.0, 32.0, 33.0]);
        assert_eq!(history.latest(), Some(33.0));
    }

    #[test]
    fn test_tail_and_smoothing() {
        let mut history = TemperatureHistory::new(10);
        assert_eq!(history.smoothed(3), None);

        history.extend([30.0, 33.0, 36.0, 39.0]);
        assert_eq!(history.tail(2), vec![36.0, 39.0]);
        assert_eq!(history.smoothed(3), Some(36.0));
        assert_eq!(history.smoothed(100), Some(34.5));
    }
}
