use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;

use super::graph::CausalGraph;
use crate::game::DEFAULT_MONTE_CARLO_SAMPLES;

const CHUNK_SIZE: usize = 256;
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Advisory frequencies; never fed back into the game state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub samples: usize,
    pub frequencies: BTreeMap<String, f64>,
}

impl Forecast {
    pub fn frequency(&self, node: &str) -> Option<f64> {
        self.frequencies.get(node).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonteCarlo {
    samples: usize,
    seed: u64,
}

impl MonteCarlo {
    pub fn new(seed: u64) -> Self {
        Self {
            samples: DEFAULT_MONTE_CARLO_SAMPLES,
            seed,
        }
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Samples are split into fixed-size chunks, each with its own generator
    /// derived from the seed and chunk index, so the result does not depend on
    /// how rayon schedules the chunks.
    pub fn estimate(&self, graph: &CausalGraph) -> Forecast {
        let width = graph.len();
        let chunks = self.samples.div_ceil(CHUNK_SIZE);
        let counts = (0..chunks)
            .into_par_iter()
            .map(|chunk| {
                let start = chunk * CHUNK_SIZE;
                let size = CHUNK_SIZE.min(self.samples - start);
                let chunk_seed = self.seed.wrapping_add((chunk as u64).wrapping_mul(SEED_STRIDE));
                let mut rng = StdRng::seed_from_u64(chunk_seed);
                let mut counts = vec![0usize; width];
                let mut outcomes = Vec::with_capacity(width);
                for _ in 0..size {
                    graph.sample_into(&mut rng, &mut outcomes);
                    for (count, &hit) in counts.iter_mut().zip(&outcomes) {
                        *count += usize::from(hit);
                    }
                }
                counts
            })
            .reduce(
                || vec![0usize; width],
                |mut left, right| {
                    for (total, count) in left.iter_mut().zip(right) {
                        *total += count;
                    }
                    left
                },
            );

        let frequencies = graph
            .node_names()
            .zip(counts)
            .map(|(name, count)| {
                let frequency = if self.samples == 0 {
                    0.0
                } else {
                    count as f64 / self.samples as f64
                };
                (name.to_string(), frequency)
            })
            .collect();
        Forecast {
            samples: self.samples,
            frequencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unrest_graph() -> CausalGraph {
        CausalGraph::builder()
            .node("harvest_fails", 0.5)
            .node("grain_riots", 0.2)
            .influence("harvest_fails", "grain_riots", 0.4)
            .build()
            .expect("graph")
    }

    #[test]
    fn estimates_match_the_analytic_marginals() {
        let forecast = MonteCarlo::new(42).with_samples(10_000).estimate(&unrest_graph());
        let harvest = forecast.frequency("harvest_fails").expect("node");
        let riots = forecast.frequency("grain_riots").expect("node");
        assert!((harvest - 0.5).abs() < 0.03);
        assert!((riots - 0.4).abs() < 0.03);
    }

    #[test]
    fn identical_seeds_give_identical_forecasts() {
        let graph = unrest_graph();
        let first = MonteCarlo::new(2024).with_samples(10_000).estimate(&graph);
        let second = MonteCarlo::new(2024).with_samples(10_000).estimate(&graph);
        assert_eq!(first, second);

        let other = MonteCarlo::new(7).with_samples(10_000).estimate(&graph);
        for (node, frequency) in &first.frequencies {
            assert!((frequency - other.frequencies[node]).abs() < 0.03);
        }
    }

    #[test]
    fn zero_samples_report_zero_frequencies() {
        let forecast = MonteCarlo::new(1).with_samples(0).estimate(&unrest_graph());
        assert_eq!(forecast.samples, 0);
        assert!(forecast.frequencies.values().all(|frequency| *frequency == 0.0));
        assert_eq!(MonteCarlo::new(1).samples(), 2_000);
    }
}
