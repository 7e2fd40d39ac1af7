use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use rand::{SeedableRng, rngs::StdRng};
use tracing::debug;

use super::causal::CausalGraph;
use super::config::GameConfig;
use super::diplomacy::DiplomacyConfig;
use super::effects::Effect;
use super::senate::{DisabledEvent, SenateEngine, compile_catalog};
use super::simulation::Simulation;
use super::state::GameState;

pub struct GameBuilder {
    config: GameConfig,
    rng: StdRng,
}

impl GameBuilder {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn from_builtin() -> Result<Self> {
        Ok(Self::new(GameConfig::builtin()?))
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Validates and compiles the configuration, then opens the first round.
    pub fn build(self) -> Result<Simulation> {
        let bootstrap = self.into_bootstrap()?;
        Simulation::open(bootstrap)
    }

    pub(crate) fn into_bootstrap(self) -> Result<GameBootstrap> {
        self.config.validate()?;
        let GameBuilder { config, rng } = self;

        let roster = config.roster();
        let graphs = compile_graphs(&config)?;
        let catalog = compile_catalog(config.arcs.clone(), &roster)?;
        let senate = SenateEngine::new(catalog);

        let mut state = config.initial_state();
        let disabled = senate.initialise(&mut state);
        state.validate()?;
        debug!(
            senators = roster.len(),
            events = senate.event_count(),
            graphs = graphs.len(),
            "campaign compiled"
        );

        Ok(GameBootstrap {
            rng,
            state,
            senate,
            diplomacy: config.diplomacy,
            graphs,
            disabled,
        })
    }
}

/// A compiled causal graph plus the effects its nodes trigger when drawn.
#[derive(Debug, Clone)]
pub(crate) struct ConfiguredGraph {
    pub(crate) graph: CausalGraph,
    pub(crate) draw_each_round: bool,
    pub(crate) node_effects: BTreeMap<String, Vec<Effect>>,
}

pub(crate) struct GameBootstrap {
    pub(crate) rng: StdRng,
    pub(crate) state: GameState,
    pub(crate) senate: SenateEngine,
    pub(crate) diplomacy: DiplomacyConfig,
    pub(crate) graphs: BTreeMap<String, ConfiguredGraph>,
    pub(crate) disabled: Vec<DisabledEvent>,
}

fn compile_graphs(config: &GameConfig) -> Result<BTreeMap<String, ConfiguredGraph>> {
    config
        .graphs
        .iter()
        .map(|definition| {
            let graph = definition
                .build()
                .map_err(|err| anyhow!("causal graph '{}' is invalid: {}", definition.name, err))?;
            Ok((
                definition.name.clone(),
                ConfiguredGraph {
                    graph,
                    draw_each_round: definition.draw_each_round,
                    node_effects: definition.node_effects(),
                },
            ))
        })
        .collect()
}
