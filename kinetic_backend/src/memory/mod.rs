use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::agent::Strategy;

/// Entries kept per strategy before the oldest is evicted.
pub const STRATEGY_WINDOW: usize = 10;

/// Outcome of one round that used a given strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub quality_score: f64,
    pub result_count: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Rolling, per-strategy record of how well each strategy performed.
///
/// Lives as long as the coach instance that owns it and is never persisted.
#[derive(Debug, Default)]
pub struct AgentMemory {
    outcomes: BTreeMap<Strategy, VecDeque<StrategyOutcome>>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, strategy: Strategy, quality_score: f64, result_count: usize) {
        let window = self.outcomes.entry(strategy).or_default();
        window.push_back(StrategyOutcome {
            quality_score,
            result_count,
            recorded_at: Utc::now(),
        });
        while window.len() > STRATEGY_WINDOW {
            window.pop_front();
        }
    }

    pub fn outcomes(&self, strategy: Strategy) -> impl Iterator<Item = &StrategyOutcome> {
        self.outcomes.get(&strategy).into_iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.values().all(VecDeque::is_empty)
    }

    /// Strategy with the highest summed quality score across its window.
    pub fn best_strategy(&self) -> Option<Strategy> {
        self.outcomes
            .iter()
            .filter(|(_, window)| !window.is_empty())
            .map(|(strategy, window)| {
                let total: f64 = window.iter().map(|o| o.quality_score).sum();
                (*strategy, total)
            })
            .fold(None, |best: Option<(Strategy, f64)>, (strategy, total)| match best {
                Some((_, best_total)) if best_total >= total => best,
                _ => Some((strategy, total)),
            })
            .map(|(strategy, _)| strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_evicts_oldest_first() {
        let mut memory = AgentMemory::new();
        for i in 0..15 {
            memory.record(Strategy::BroadSearch, i as f64, i);
        }

        let counts: Vec<usize> = memory
            .outcomes(Strategy::BroadSearch)
            .map(|o| o.result_count)
            .collect();
        assert_eq!(counts.len(), STRATEGY_WINDOW);
        assert_eq!(counts, (5..15).collect::<Vec<_>>());
    }

    #[test]
    fn windows_are_independent_per_strategy() {
        let mut memory = AgentMemory::new();
        for _ in 0..12 {
            memory.record(Strategy::TargetedSearch, 0.5, 3);
        }
        memory.record(Strategy::MultiAngleApproach, 0.2, 6);

        assert_eq!(memory.outcomes(Strategy::TargetedSearch).count(), 10);
        assert_eq!(memory.outcomes(Strategy::MultiAngleApproach).count(), 1);
        assert_eq!(memory.outcomes(Strategy::BroadSearch).count(), 0);
    }

    #[test]
    fn best_strategy_uses_summed_quality() {
        let mut memory = AgentMemory::new();
        assert!(memory.is_empty());
        assert_eq!(memory.best_strategy(), None);

        memory.record(Strategy::BroadSearch, 0.8, 8);
        memory.record(Strategy::TargetedSearch, 0.5, 3);
        memory.record(Strategy::TargetedSearch, 0.5, 3);

        assert!(!memory.is_empty());
        assert_eq!(memory.best_strategy(), Some(Strategy::TargetedSearch));
    }
}
