use std::collections::VecDeque;

use sysinfo::System;

/// Reports resource utilization as a percentage.
pub trait ResourceSampler: Send {
    /// Current utilization in `[0, 100]`.
    fn utilization(&mut self) -> f64;
}

/// Global CPU usage from the host.
pub struct SystemSampler {
    system: System,
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler").finish_non_exhaustive()
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    /// Sampler with a primed CPU baseline.
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system }
    }
}

impl ResourceSampler for SystemSampler {
    fn utilization(&mut self) -> f64 {
        self.system.refresh_cpu();
        f64::from(self.system.global_cpu_info().cpu_usage()).clamp(0.0, 100.0)
    }
}

/// Replays a fixed series, holding the last value once exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedSampler {
    samples: VecDeque<f64>,
    last: f64,
}

impl ScriptedSampler {
    /// Plays `samples` in order.
    #[must_use]
    pub fn new(samples: impl IntoIterator<Item = f64>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            last: 0.0,
        }
    }
}

impl ResourceSampler for ScriptedSampler {
    fn utilization(&mut self) -> f64 {
        if let Some(next) = self.samples.pop_front() {
            self.last = next;
        }
        self.last
    }
}
