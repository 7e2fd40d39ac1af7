mod graph;
mod monte_carlo;

pub use graph::{CausalGraph, CausalGraphBuilder, CausalGraphError, Realisation};
pub use monte_carlo::{Forecast, MonteCarlo};

use serde::{Deserialize, Serialize};

const fn default_min_chance() -> f64 {
    0.05
}

const fn default_max_chance() -> f64 {
    0.95
}

/// Success probability that moves linearly with the player's standing.
/// Weights are per point of relation or reputation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChanceSpec {
    pub base: f64,
    #[serde(default)]
    pub relation_weight: f64,
    #[serde(default)]
    pub reputation_weight: f64,
    #[serde(default = "default_min_chance")]
    pub min: f64,
    #[serde(default = "default_max_chance")]
    pub max: f64,
}

impl ChanceSpec {
    pub fn fixed(probability: f64) -> Self {
        Self {
            base: probability,
            relation_weight: 0.0,
            reputation_weight: 0.0,
            min: 0.0,
            max: 1.0,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        [
            self.base,
            self.relation_weight,
            self.reputation_weight,
            self.min,
            self.max,
        ]
        .iter()
        .all(|value| value.is_finite())
            && 0.0 <= self.min
            && self.min <= self.max
            && self.max <= 1.0
    }
}

pub fn linear_chance(spec: &ChanceSpec, relation: f64, reputation: f64) -> f64 {
    let raw = spec.base + spec.relation_weight * relation + spec.reputation_weight * reputation;
    if raw.is_nan() {
        return spec.min.clamp(0.0, 1.0);
    }
    raw.max(spec.min).min(spec.max).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chance_respects_its_window() {
        let spec = ChanceSpec {
            base: 0.3,
            relation_weight: 0.01,
            reputation_weight: 0.005,
            min: 0.1,
            max: 0.9,
        };
        assert!((linear_chance(&spec, 20.0, 20.0) - 0.6).abs() < 1e-12);
        assert_eq!(linear_chance(&spec, -100.0, 0.0), 0.1);
        assert_eq!(linear_chance(&spec, 100.0, 100.0), 0.9);
        assert_eq!(linear_chance(&spec, f64::NAN, 0.0), 0.1);
    }

    #[test]
    fn chance_spec_defaults_its_window() {
        let spec: ChanceSpec =
            serde_yaml::from_str("base: 0.5\nrelation_weight: 0.01\n").expect("spec");
        assert_eq!(spec.min, 0.05);
        assert_eq!(spec.max, 0.95);
        assert!(spec.is_valid());
        assert!(!ChanceSpec { min: 0.8, max: 0.2, ..spec }.is_valid());
    }
}
