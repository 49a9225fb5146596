use std::collections::VecDeque;

use rand::{rngs::SmallRng, Rng, SeedableRng};

/// Source of uniform draws in `[0, 1)` deciding stochastic tool outcomes.
pub trait OutcomeSource: Send {
    /// Next draw.
    fn draw(&mut self) -> f64;
}

/// Pseudo-random outcomes backed by `SmallRng`.
#[derive(Debug, Clone)]
pub struct SeededOutcomes {
    rng: SmallRng,
}

impl SeededOutcomes {
    /// Reproducible sequence for a seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Sequence seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }
}

impl OutcomeSource for SeededOutcomes {
    fn draw(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Scripted draws, repeating the last one once exhausted.
#[derive(Debug, Clone)]
pub struct FixedOutcomes {
    draws: VecDeque<f64>,
    last: f64,
}

impl FixedOutcomes {
    /// Plays `draws` in order.
    #[must_use]
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
            last: 1.0,
        }
    }

    /// Every draw succeeds for any failure probability below 1.
    #[must_use]
    pub fn always_succeed() -> Self {
        Self::new([])
    }

    /// Every draw fails for any failure probability above 0.
    #[must_use]
    pub fn always_fail() -> Self {
        Self {
            draws: VecDeque::new(),
            last: 0.0,
        }
    }
}

impl OutcomeSource for FixedOutcomes {
    fn draw(&mut self) -> f64 {
        if let Some(next) = self.draws.pop_front() {
            self.last = next;
        }
        self.last
    }
}
