//! Solver options.

use trellis_core::Strength;

/// Options shared by the solver and the proxy resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SolverConfig {
    /// Strength of the edit variables created for touch positions.
    ///
    /// Must stay below required so a drag never breaks required layout.
    pub touch_strength: Strength,
    /// Forget variables once no constraint references them.
    pub collect_unused_variables: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            touch_strength: Strength::TOUCH,
            collect_unused_variables: true,
        }
    }
}

impl SolverConfig {
    pub fn with_touch_strength(mut self, strength: Strength) -> Self {
        self.touch_strength = Strength::new(strength.0);
        self
    }

    pub fn with_collect_unused_variables(mut self, collect: bool) -> Self {
        self.collect_unused_variables = collect;
        self
    }
}
